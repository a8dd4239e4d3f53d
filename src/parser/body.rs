//! Body data delivery.
//!
//! The state functions hand over de-chunked bytes. Response bytes pass through the decompressor
//! when one is active. A message framed with a body ends with a flush, delivered to the hooks
//! as `None`. That includes a body of zero length.

use std::io;

use super::{tx_mut, ConnectionParser, Halt};
use crate::hook::run_data;
use crate::transaction::ContentEncoding;
use crate::Direction;

impl ConnectionParser {
    pub(crate) fn req_process_body_data(&mut self, index: usize, data: &[u8]) -> Result<(), Halt> {
        let tx = tx_mut(&mut self.conn, index)?;
        tx.request_message_len += data.len() as u64;
        tx.request_entity_len += data.len() as u64;
        self.run_body_hooks(Direction::Request, index, Some(data))
    }

    pub(crate) fn req_flush_body(&mut self, index: usize) -> Result<(), Halt> {
        self.run_body_hooks(Direction::Request, index, None)
    }

    pub(crate) fn res_process_body_data(&mut self, index: usize, data: &[u8]) -> Result<(), Halt> {
        let tx = tx_mut(&mut self.conn, index)?;
        tx.response_message_len += data.len() as u64;

        let mut rest = data;
        while !rest.is_empty() {
            let Some(d) = self.decompressor.as_mut() else {
                return self.res_deliver(index, rest);
            };
            match d.step(rest) {
                Ok(step) => {
                    self.res_deliver(index, &step.output)?;
                    if step.consumed == 0 {
                        self.decompression_ended(index)?;
                    } else {
                        rest = &rest[step.consumed..];
                    }
                }
                Err(e) => self.decompression_failed(index, e)?,
            }
        }

        Ok(())
    }

    /// Drain the decompressor and deliver the final flush.
    pub(crate) fn res_flush_body(&mut self, index: usize) -> Result<(), Halt> {
        if let Some(mut d) = self.decompressor.take() {
            match d.finish() {
                Ok(out) => self.res_deliver(index, &out)?,
                Err(e) => {
                    htp_log!(
                        self,
                        Warning,
                        Some(index),
                        "{:?} decompression failed at end of body: {}",
                        d.encoding(),
                        e
                    );
                }
            }
        }
        self.run_body_hooks(Direction::Response, index, None)
    }

    fn res_deliver(&mut self, index: usize, data: &[u8]) -> Result<(), Halt> {
        let tx = tx_mut(&mut self.conn, index)?;
        tx.response_entity_len += data.len() as u64;
        self.run_body_hooks(Direction::Response, index, Some(data))
    }

    /// Give up on decompression. The rest of the body is relayed as is.
    fn decompression_failed(&mut self, index: usize, e: io::Error) -> Result<(), Halt> {
        let encoding = self.decompressor.take().map(|d| d.encoding());
        let tx = tx_mut(&mut self.conn, index)?;
        tx.response_content_encoding_processing = ContentEncoding::None;
        htp_log!(
            self,
            Warning,
            Some(index),
            "{:?} decompression failed, relaying raw body: {}",
            encoding.unwrap_or(ContentEncoding::Unknown),
            e
        );
        Ok(())
    }

    /// The compressed stream ended before the body did. What follows is relayed as is.
    fn decompression_ended(&mut self, index: usize) -> Result<(), Halt> {
        if let Some(mut d) = self.decompressor.take() {
            match d.finish() {
                Ok(out) => self.res_deliver(index, &out)?,
                Err(e) => {
                    htp_log!(self, Warning, Some(index), "{:?} stream invalid: {}", d.encoding(), e);
                }
            }
        }
        htp_log!(
            self,
            Warning,
            Some(index),
            "Response body continues after the end of the compressed stream"
        );
        Ok(())
    }

    /// Per transaction callbacks first, then the configured ones. Empty chunks are skipped, the
    /// flush (`None`) never is.
    fn run_body_hooks(
        &mut self,
        direction: Direction,
        index: usize,
        data: Option<&[u8]>,
    ) -> Result<(), Halt> {
        if data.map(|d| d.is_empty()).unwrap_or(false) {
            return Ok(());
        }

        let name = match direction {
            Direction::Request => "request_body_data",
            Direction::Response => "response_body_data",
        };

        let tx = tx_mut(&mut self.conn, index)?;
        let callbacks = tx.body_hook(direction).snapshot();
        run_data(&callbacks, tx, data).into_result(name)?;

        self.cfg
            .body_data_hook(direction)
            .run_all(tx, data)
            .into_result(name)
    }
}
