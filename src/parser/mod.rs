//! The connection parser.
//!
//! One [`ConnectionParser`] follows one TCP connection. Request bytes and response bytes are fed
//! separately, in whatever pieces they arrive. Each direction runs its own resumable state
//! machine and only the transaction list connects the two.
//!
//! Request side:
//!
//! ```text
//!        ┌──────────────────┐
//!   ┌───▶│       Idle       │
//!   │    └──────────────────┘
//!   │              │
//!   │              ▼
//!   │    ┌──────────────────┐  HTTP/0.9
//!   │    │  Line, Protocol  │──────────────────────────┐
//!   │    └──────────────────┘                          │
//!   │              │                                   │
//!   │              ▼                                   │
//!   │    ┌──────────────────┐     ┌────────────────┐   │
//!   │    │ Headers          │────▶│ ConnectWait    │   │
//!   │    │ ConnectCheck     │     │ Response       │   │
//!   │    └──────────────────┘     └────────────────┘   │
//!   │              │                       │           │
//!   │              ▼                       │           │
//!   │    ┌──────────────────┐              │           │
//!   │    │  BodyDetermine   │──────┐       │           │
//!   │    └──────────────────┘      │       │           │
//!   │              │               │       │           │
//!   │              ▼               │       │           │
//!   │    ┌──────────────────┐      │       │           │
//!   │    │ BodyIdentity     │      │       │           │
//!   │    │ BodyChunked*     │      │       │           │
//!   │    └──────────────────┘      │       │           │
//!   │              │               ▼       ▼           ▼
//!   │              │         ┌──────────────────┐
//!   │              └────────▶│     Finalize     │────▶ IgnoreDataAfterHttp09
//!   │                        └──────────────────┘
//!   └──────────────────────────────────┘
//! ```
//!
//! Response side:
//!
//! ```text
//!        ┌──────────────────┐
//!   ┌───▶│       Idle       │───────────────────┐ HTTP/0.9
//!   │    └──────────────────┘                   │
//!   │              │                            │
//!   │              ▼                            │
//!   │    ┌──────────────────┐  not HTTP         │
//!   │    │       Line       │───────────────────┤
//!   │    └──────────────────┘                   │
//!   │              │   ▲ 100 Continue           ▼
//!   │              ▼   │              ┌─────────────────────────┐
//!   │    ┌──────────────────┐         │ BodyIdentityStreamClose │
//!   │    │  BodyDetermine   │────────▶└─────────────────────────┘
//!   │    └──────────────────┘                   │
//!   │       │           │                       │
//!   │       ▼           ▼                       │
//!   │  BodyIdentity  BodyChunked*               │
//!   │  ClKnown          │ trailer               │
//!   │       │           ▼                       │
//!   │       │    ┌──────────────────┐           │
//!   │       └───▶│     Finalize     │◀──────────┘
//!   │            └──────────────────┘
//!   └─────────────────────┘
//! ```
//!
//! A CONNECT answered with 2xx moves both directions to [`StreamState::Tunnel`] and no more
//! bytes are interpreted.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::{Config, ConfigRef, LogLevel};
use crate::connection::{Connection, LogMessage};
use crate::decompress::Decompressor;
use crate::hook::{HookResult, TxHook};
use crate::transaction::Transaction;
use crate::util::LF;
use crate::{Direction, Error};

/// Record a message in the connection log (subject to the configured level), pass it to the log
/// hooks and emit it through the `log` facade.
macro_rules! htp_log {
    ($connp:expr, $level:ident, $tx:expr, $($arg:tt)+) => {
        $connp.log(
            $crate::config::LogLevel::$level,
            file!(),
            line!(),
            $tx,
            format!($($arg)+),
        )
    };
}

mod body;
mod generic;
mod headers;
mod request;
mod response;
mod sync;

pub use request::RequestState;
pub use response::ResponseState;

use headers::PendingHeader;

#[cfg(test)]
mod test;

/// Status of one direction, returned from every feed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Nothing fed yet.
    New,
    /// All input consumed, waiting for more.
    Data,
    /// Parsing can't continue until the other direction is fed.
    ///
    /// Any unconsumed input must be fed again afterwards, see
    /// [`ConnectionParser::request_data_consumed`].
    DataOther,
    /// A CONNECT succeeded. Further data is not HTTP and is ignored.
    Tunnel,
    /// The connection was closed.
    Closed,
    /// A hook asked to stop. Further data is ignored.
    Stop,
    /// A fatal error occurred.
    Error,
}

/// Why a state function gave up control.
#[derive(Debug)]
pub(crate) enum Halt {
    Stop,
    Fatal(Error),
}

impl From<Error> for Halt {
    fn from(e: Error) -> Self {
        Halt::Fatal(e)
    }
}

/// Result of one successful state function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Run the (possibly new) state again.
    Continue,
    /// The input is exhausted.
    NeedData,
    /// The other direction must make progress first.
    Yield,
}

/// The span passed to one feed call.
pub(crate) struct Input<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Input<'a> {
    fn new(data: &'a [u8]) -> Self {
        Input { data, pos: 0 }
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn next_byte(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        Some(b)
    }

    pub fn rest(&self) -> &'a [u8] {
        let data: &'a [u8] = self.data;
        &data[self.pos..]
    }

    /// Consume up to `max` bytes.
    pub fn take(&mut self, max: u64) -> &'a [u8] {
        let rest = self.rest();
        let n = usize::try_from(max).unwrap_or(usize::MAX).min(rest.len());
        self.pos += n;
        &rest[..n]
    }

    pub fn take_all(&mut self) -> &'a [u8] {
        let rest = self.rest();
        self.pos = self.data.len();
        rest
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn consumed(&self) -> usize {
        self.pos
    }
}

/// Per direction parsing state.
#[derive(Debug)]
pub(crate) struct Cursor<S> {
    direction: Direction,
    pub state: S,
    pub status: StreamState,
    pub error: Option<Error>,
    /// Line accumulation buffer.
    pub line: Vec<u8>,
    /// Header waiting for possible folded continuation lines.
    pub header: Option<PendingHeader>,
    /// Transaction being parsed.
    pub tx: Option<usize>,
    /// Body bytes left of a known length or of the current chunk.
    pub remaining: u64,
    /// Bytes of the last span that were consumed.
    pub consumed: usize,
    pub timestamp: Option<SystemTime>,
}

impl<S: fmt::Debug + Copy + PartialEq> Cursor<S> {
    fn new(direction: Direction, state: S) -> Self {
        Cursor {
            direction,
            state,
            status: StreamState::New,
            error: None,
            line: Vec::new(),
            header: None,
            tx: None,
            remaining: 0,
            consumed: 0,
            timestamp: None,
        }
    }

    pub fn set_state(&mut self, state: S) {
        if self.state != state {
            debug!("{:?} {:?} -> {:?}", self.direction, self.state, state);
        }
        self.state = state;
    }

    pub fn tx_index(&self) -> Result<usize, Halt> {
        self.tx.ok_or(Halt::Fatal(Error::MissingTransaction))
    }

    pub fn is_closed(&self) -> bool {
        self.status == StreamState::Closed
    }

    /// Buffer bytes up to and including the next LF.
    ///
    /// Returns true once a complete line is buffered. When the stream is closed, whatever is
    /// buffered counts as a complete line.
    pub fn read_line(&mut self, input: &mut Input<'_>, hard_limit: usize) -> Result<bool, Error> {
        let rest = input.rest();
        let (len, complete) = match memchr::memchr(LF, rest) {
            Some(p) => (p + 1, true),
            None => (rest.len(), false),
        };
        self.line.extend_from_slice(input.take(len as u64));

        if self.line.len() > hard_limit {
            return Err(Error::LineTooLong(hard_limit));
        }

        Ok(complete || (self.is_closed() && !self.line.is_empty()))
    }

    pub fn take_line(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.line)
    }

    fn fail(&mut self, e: Error) -> Error {
        self.status = StreamState::Error;
        self.error = Some(e.clone());
        e
    }
}

pub(crate) fn tx_mut(conn: &mut Connection, index: usize) -> Result<&mut Transaction, Halt> {
    conn.tx_mut(index)
        .ok_or(Halt::Fatal(Error::MissingTransaction))
}

/// Incremental parser for both directions of one connection.
#[derive(Debug)]
pub struct ConnectionParser {
    pub(crate) cfg: ConfigRef,
    pub(crate) conn: Connection,
    pub(crate) req: Cursor<RequestState>,
    pub(crate) res: Cursor<ResponseState>,
    /// Next transaction the response side pairs with.
    pub(crate) out_next_tx_index: usize,
    /// Yield to the request side once the current response is done.
    pub(crate) out_data_other_at_tx_end: bool,
    pub(crate) decompressor: Option<Decompressor>,
    last_error: Option<Error>,
}

impl ConnectionParser {
    pub fn new(config: Arc<Config>) -> Self {
        ConnectionParser {
            cfg: ConfigRef::new(config),
            conn: Connection::default(),
            req: Cursor::new(Direction::Request, RequestState::Idle),
            res: Cursor::new(Direction::Response, ResponseState::Idle),
            out_next_tx_index: 0,
            out_data_other_at_tx_end: false,
            decompressor: None,
            last_error: None,
        }
    }

    /// Record the connection endpoints and when it was opened.
    pub fn open(
        &mut self,
        client: Option<(IpAddr, u16)>,
        server: Option<(IpAddr, u16)>,
        timestamp: SystemTime,
    ) {
        self.conn.open(client, server, timestamp);
    }

    pub fn feed(
        &mut self,
        direction: Direction,
        timestamp: SystemTime,
        data: &[u8],
    ) -> Result<StreamState, Error> {
        match direction {
            Direction::Request => self.request_data(timestamp, data),
            Direction::Response => self.response_data(timestamp, data),
        }
    }

    /// Feed request (client to server) bytes.
    ///
    /// On [`StreamState::DataOther`] only [`ConnectionParser::request_data_consumed`] bytes were
    /// used. Feed the response side, then the rest of this span again.
    pub fn request_data(
        &mut self,
        timestamp: SystemTime,
        data: &[u8],
    ) -> Result<StreamState, Error> {
        self.req.consumed = 0;

        if let Some(e) = &self.req.error {
            return Err(e.clone());
        }
        if self.req.status == StreamState::Stop {
            return Ok(StreamState::Stop);
        }
        if self.req.tx.is_none()
            && !matches!(
                self.req.state,
                RequestState::Idle | RequestState::IgnoreDataAfterHttp09
            )
        {
            return Err(self.fail(Direction::Request, Error::MissingTransaction));
        }
        if self.req.status == StreamState::Tunnel {
            return Ok(StreamState::Tunnel);
        }
        if data.is_empty() && !self.req.is_closed() {
            return Ok(StreamState::Data);
        }

        self.req.timestamp = Some(timestamp);
        self.conn.track_inbound(data.len());

        // The response side may have been waiting for this.
        if self.res.status == StreamState::DataOther {
            self.res.status = StreamState::Data;
        }
        if self.req.status == StreamState::New {
            self.req.status = StreamState::Data;
        }

        let mut input = Input::new(data);

        let result = loop {
            match self.req_step(&mut input) {
                Ok(Step::Continue) => {
                    if self.req.status == StreamState::Tunnel {
                        break Ok(StreamState::Tunnel);
                    }
                }
                Ok(Step::NeedData) => {
                    if !self.req.is_closed() {
                        self.req.status = StreamState::Data;
                    }
                    break Ok(self.req.status);
                }
                Ok(Step::Yield) => {
                    break Ok(if input.is_empty() {
                        StreamState::Data
                    } else {
                        StreamState::DataOther
                    });
                }
                Err(Halt::Stop) => {
                    self.req.status = StreamState::Stop;
                    break Ok(StreamState::Stop);
                }
                Err(Halt::Fatal(e)) => break Err(self.fail(Direction::Request, e)),
            }
        };

        self.req.consumed = input.consumed();
        result
    }

    /// Feed response (server to client) bytes.
    ///
    /// On [`StreamState::DataOther`] only [`ConnectionParser::response_data_consumed`] bytes were
    /// used. Feed the request side, then the rest of this span again.
    pub fn response_data(
        &mut self,
        timestamp: SystemTime,
        data: &[u8],
    ) -> Result<StreamState, Error> {
        self.res.consumed = 0;

        if let Some(e) = &self.res.error {
            return Err(e.clone());
        }
        if self.res.status == StreamState::Stop {
            return Ok(StreamState::Stop);
        }
        if self.res.tx.is_none() && self.res.state != ResponseState::Idle {
            return Err(self.fail(Direction::Response, Error::MissingTransaction));
        }
        if self.res.status == StreamState::Tunnel {
            return Ok(StreamState::Tunnel);
        }
        if data.is_empty() && !self.res.is_closed() {
            return Ok(StreamState::Data);
        }

        self.res.timestamp = Some(timestamp);
        self.conn.track_outbound(data.len());

        if self.res.status == StreamState::New {
            self.res.status = StreamState::Data;
        }

        let mut input = Input::new(data);

        let result = loop {
            match self.res_step(&mut input) {
                Ok(Step::Continue) => {
                    if self.res.status == StreamState::Tunnel {
                        break Ok(StreamState::Tunnel);
                    }
                }
                Ok(Step::NeedData) => {
                    if !self.res.is_closed() {
                        self.res.status = StreamState::Data;
                    }
                    break Ok(self.res.status);
                }
                Ok(Step::Yield) => {
                    let status = if input.is_empty() {
                        StreamState::Data
                    } else {
                        StreamState::DataOther
                    };
                    self.res.status = status;
                    break Ok(status);
                }
                Err(Halt::Stop) => {
                    self.res.status = StreamState::Stop;
                    break Ok(StreamState::Stop);
                }
                Err(Halt::Fatal(e)) => break Err(self.fail(Direction::Response, e)),
            }
        };

        self.res.consumed = input.consumed();
        result
    }

    /// The connection closed. Completes whatever the end of stream completes, such as a
    /// close-delimited response body.
    ///
    /// Returns the first error raised by that final processing.
    pub fn close(&mut self, timestamp: SystemTime) -> Result<(), Error> {
        debug!("Close connection");
        self.conn.close(timestamp);

        let done = |s: StreamState| {
            matches!(
                s,
                StreamState::Error | StreamState::Stop | StreamState::Tunnel
            )
        };
        if !done(self.req.status) {
            self.req.status = StreamState::Closed;
        }
        if !done(self.res.status) {
            self.res.status = StreamState::Closed;
        }

        // A failed direction reports its error again.
        let req = match self.req.status {
            StreamState::Closed | StreamState::Error => self.request_data(timestamp, &[]).err(),
            _ => None,
        };
        let res = match self.res.status {
            StreamState::Closed | StreamState::Error => self.response_data(timestamp, &[]).err(),
            _ => None,
        };

        match req.or(res) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Destroy a completed transaction. Its slot stays, empty.
    pub fn destroy_tx(&mut self, index: usize) -> Result<(), Error> {
        match self.conn.tx(index) {
            None => Err(Error::NoSuchTransaction(index)),
            Some(tx) if !tx.is_complete() => Err(Error::TransactionIncomplete(index)),
            Some(_) => {
                debug!("Destroy transaction {}", index);
                self.conn.remove_tx(index);
                Ok(())
            }
        }
    }

    pub fn request_status(&self) -> StreamState {
        self.req.status
    }

    pub fn response_status(&self) -> StreamState {
        self.res.status
    }

    pub fn request_state(&self) -> RequestState {
        self.req.state
    }

    pub fn response_state(&self) -> ResponseState {
        self.res.state
    }

    /// Bytes of the last request span that were consumed.
    pub fn request_data_consumed(&self) -> usize {
        self.req.consumed
    }

    /// Bytes of the last response span that were consumed.
    pub fn response_data_consumed(&self) -> usize {
        self.res.consumed
    }

    /// Index of the transaction the request side is parsing.
    pub fn request_tx(&self) -> Option<usize> {
        self.req.tx
    }

    /// Index of the transaction the response side is parsing.
    pub fn response_tx(&self) -> Option<usize> {
        self.res.tx
    }

    /// The most recent fatal error on either direction.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn tx(&self, index: usize) -> Option<&Transaction> {
        self.conn.tx(index)
    }

    pub fn tx_mut(&mut self, index: usize) -> Option<&mut Transaction> {
        self.conn.tx_mut(index)
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Configuration private to this parser, copied from the shared one on first use.
    pub fn config_mut(&mut self) -> &mut Config {
        self.cfg.to_mut()
    }

    fn fail(&mut self, direction: Direction, e: Error) -> Error {
        let tx = match direction {
            Direction::Request => self.req.tx,
            Direction::Response => self.res.tx,
        };
        error!("{:?} failed: {}", direction, e);
        htp_log!(self, Error, tx, "{}", e);
        self.last_error = Some(e.clone());
        match direction {
            Direction::Request => self.req.fail(e),
            Direction::Response => self.res.fail(e),
        }
    }

    pub(crate) fn log(
        &mut self,
        level: LogLevel,
        file: &'static str,
        line: u32,
        tx: Option<usize>,
        message: String,
    ) {
        if level != LogLevel::Error {
            log!(level.as_log(), "{}", message);
        }

        if level > self.cfg.log_level {
            return;
        }

        let message = LogMessage {
            level,
            message,
            file,
            line,
            tx,
        };

        if self.cfg.hook_log.run_all(&message) != HookResult::Continue {
            debug!("Log hook did not continue");
        }

        self.conn.messages.push(message);
    }

    pub(crate) fn run_hook(&mut self, index: usize, hook: TxHook) -> Result<(), Halt> {
        let tx = tx_mut(&mut self.conn, index)?;
        self.cfg.tx_hook(hook).run_all(tx).into_result(hook.name())
    }
}
