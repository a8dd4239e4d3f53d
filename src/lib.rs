//! Incremental HTTP/1.x transaction reconstruction for traffic inspection.
//!
//! The crate rebuilds HTTP transactions from the two byte streams of one TCP connection, as
//! seen by a passive observer (an IDS, a proxy tap, a capture tool). It does no I/O. The caller
//! feeds client-to-server and server-to-client bytes as they are captured, in pieces of any
//! size, and the parser advances one resumable state machine per direction.
//!
//! Parsing is deliberately lenient. Real traffic is full of malformed requests and responses,
//! and an inspection tool wants to see them, not reject them. Anomalies are recorded as
//! [`Flags`] on the transaction and as [`LogMessage`]s on the connection. Only a few
//! conditions (such as an unparseable chunk length) stop a direction for good.
//!
//! # Transactions
//!
//! A [`Transaction`] is created when the first byte of a request arrives. Responses are paired
//! with transactions in order, so pipelined requests are handled. Each transaction carries the
//! raw and parsed request line, the raw header lines and the parsed headers, body lengths,
//! and the same for the response.
//!
//! # Hooks
//!
//! Callbacks registered on the [`Config`] are invoked at fixed points: request start, request
//! line, headers, body data, trailer, completion, and the same for the response. Body data
//! arrives de-chunked and, for responses, decompressed. A callback can ask the parser to
//! stop by returning [`HookResult::Stop`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::SystemTime;
//!
//! use htp_proto::{Config, ConnectionParser, StreamState};
//!
//! let mut connp = ConnectionParser::new(Arc::new(Config::default()));
//! let now = SystemTime::now();
//! connp.open(None, None, now);
//!
//! let state = connp.request_data(now, b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n")?;
//! assert_eq!(state, StreamState::Data);
//!
//! connp.response_data(now, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi")?;
//!
//! let tx = connp.tx(0).unwrap();
//! assert!(tx.is_complete());
//! assert_eq!(tx.request_uri(), Some(&b"/index.html"[..]));
//! assert_eq!(tx.request_hostname(), Some(&b"example.com"[..]));
//! assert_eq!(tx.response_status_number(), Some(200));
//! assert_eq!(tx.response_entity_len(), 2);
//! # Ok::<(), htp_proto::Error>(())
//! ```
//!
//! # Feeding both directions
//!
//! A request parser can get ahead of the responses it needs to see. The main case is CONNECT:
//! what follows the request depends on whether the server accepted it. When a feed call returns
//! [`StreamState::DataOther`], only part of the span was used. Feed the other direction and then
//! feed the unused rest again:
//!
//! ```
//! # use std::sync::Arc;
//! # use std::time::SystemTime;
//! # use htp_proto::{Config, ConnectionParser, StreamState};
//! # let mut connp = ConnectionParser::new(Arc::new(Config::default()));
//! # let now = SystemTime::now();
//! let request = b"CONNECT example.com:443 HTTP/1.1\r\n\r\n\x16\x03\x01";
//!
//! let state = connp.request_data(now, request)?;
//! assert_eq!(state, StreamState::DataOther);
//! let used = connp.request_data_consumed();
//!
//! connp.response_data(now, b"HTTP/1.1 200 Connection established\r\n\r\n")?;
//!
//! // The tunnel is up and the rest is not HTTP.
//! let state = connp.request_data(now, &request[used..])?;
//! assert_eq!(state, StreamState::Tunnel);
//! # Ok::<(), htp_proto::Error>(())
//! ```

#![forbid(unsafe_code)]

#[macro_use]
extern crate log;

// Re-export the http crate since we use it in the public API.
pub use http;

mod config;
mod connection;
mod decompress;
mod error;
mod hook;
mod parser;
mod transaction;
mod util;

pub use config::{Config, LogLevel, Personality};
pub use config::{DEFAULT_FIELD_LIMIT_HARD, DEFAULT_FIELD_LIMIT_SOFT};
pub use connection::{Connection, ConnectionFlag, ConnectionFlags, LogMessage};
pub use error::Error;
pub use hook::{DataCallback, Hook, HookResult, LogCallback, TxCallback};
pub use parser::{ConnectionParser, RequestState, ResponseState, StreamState};
pub use transaction::{ContentEncoding, Flag, Flags, Header, HeaderLine, Headers, Param, Protocol};
pub use transaction::{RequestProgress, ResponseProgress, Transaction, TransferCoding};

/// Which way bytes travel on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    Request,
    /// Server to client.
    Response,
}
