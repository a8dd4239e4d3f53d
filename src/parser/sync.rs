//! Where the two directions meet: transaction completion and CONNECT tunnels.

use super::{ConnectionParser, Halt, RequestState, ResponseState, StreamState};
use crate::hook::TxHook;
use crate::transaction::{RequestProgress, ResponseProgress};

impl ConnectionParser {
    /// Called by either side when it is done with a transaction. The transaction complete hook
    /// runs once, when both halves are done.
    pub(crate) fn finalize_tx(&mut self, index: usize) -> Result<(), Halt> {
        let Some(tx) = self.conn.tx_mut(index) else {
            return Ok(());
        };
        if tx.finalized || !tx.is_complete() {
            return Ok(());
        }
        tx.finalized = true;

        trace!("Transaction {} complete", index);
        self.run_hook(index, TxHook::TransactionComplete)?;

        if self.cfg.tx_auto_destroy {
            debug!("Auto destroy transaction {}", index);
            self.conn.remove_tx(index);
        }

        Ok(())
    }

    /// A CONNECT succeeded. Both halves of the transaction complete and both directions stop
    /// interpreting data.
    pub(crate) fn tunnel(&mut self, index: usize) -> Result<(), Halt> {
        debug!("Tunnel established, transaction {}", index);

        if let Some(tx) = self.conn.tx_mut(index) {
            if tx.request_progress != RequestProgress::Complete {
                let has_body = tx.has_request_body();
                tx.request_progress = RequestProgress::Complete;
                if has_body {
                    self.req_flush_body(index)?;
                }
                self.run_hook(index, TxHook::RequestComplete)?;
            }
        }
        self.req.tx = None;
        self.req.set_state(RequestState::Idle);

        if let Some(tx) = self.conn.tx_mut(index) {
            tx.response_progress = ResponseProgress::Complete;
            self.run_hook(index, TxHook::ResponseComplete)?;
        }
        self.res.tx = None;
        self.res.set_state(ResponseState::Idle);

        self.finalize_tx(index)?;

        self.req.status = StreamState::Tunnel;
        self.res.status = StreamState::Tunnel;

        Ok(())
    }
}
