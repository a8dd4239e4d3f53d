//! Connection level record: transactions, messages, endpoints and traffic counters.

use std::net::IpAddr;
use std::time::SystemTime;

use enumflags2::{bitflags, BitFlags};

use crate::config::LogLevel;
use crate::transaction::Transaction;

/// Anomalies that concern the connection rather than one transaction.
#[bitflags]
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionFlag {
    /// A request started while earlier responses were still outstanding.
    Pipelined = 0x1,
    /// Request data arrived after an HTTP/0.9 request.
    Http09Extra = 0x2,
}

/// A set of [`ConnectionFlag`]s.
pub type ConnectionFlags = BitFlags<ConnectionFlag>;

/// A diagnostic recorded while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
    pub file: &'static str,
    pub line: u32,
    /// The transaction being parsed when the message was recorded.
    pub tx: Option<usize>,
}

/// One connection worth of transactions.
///
/// Transaction slots are index-stable. Destroying a transaction vacates its slot, the index is
/// never reused.
#[derive(Debug, Default)]
pub struct Connection {
    pub(crate) client_addr: Option<IpAddr>,
    pub(crate) client_port: Option<u16>,
    pub(crate) server_addr: Option<IpAddr>,
    pub(crate) server_port: Option<u16>,
    pub(crate) transactions: Vec<Option<Transaction>>,
    pub(crate) messages: Vec<LogMessage>,
    pub(crate) flags: ConnectionFlags,
    pub(crate) open_timestamp: Option<SystemTime>,
    pub(crate) close_timestamp: Option<SystemTime>,
    pub(crate) in_data_counter: u64,
    pub(crate) out_data_counter: u64,
}

impl Connection {
    pub(crate) fn open(
        &mut self,
        client: Option<(IpAddr, u16)>,
        server: Option<(IpAddr, u16)>,
        timestamp: SystemTime,
    ) {
        self.client_addr = client.map(|c| c.0);
        self.client_port = client.map(|c| c.1);
        self.server_addr = server.map(|s| s.0);
        self.server_port = server.map(|s| s.1);
        self.open_timestamp = Some(timestamp);
    }

    pub(crate) fn close(&mut self, timestamp: SystemTime) {
        self.close_timestamp = Some(timestamp);
    }

    /// Append a new transaction and return its index.
    pub(crate) fn create_tx(&mut self) -> usize {
        let index = self.transactions.len();
        self.transactions.push(Some(Transaction::new(index)));
        index
    }

    /// Vacate the slot, returning the transaction if it was there.
    pub(crate) fn remove_tx(&mut self, index: usize) -> Option<Transaction> {
        self.transactions.get_mut(index).and_then(Option::take)
    }

    pub(crate) fn track_inbound(&mut self, len: usize) {
        self.in_data_counter += len as u64;
    }

    pub(crate) fn track_outbound(&mut self, len: usize) {
        self.out_data_counter += len as u64;
    }

    /// Transaction at `index`, unless destroyed.
    pub fn tx(&self, index: usize) -> Option<&Transaction> {
        self.transactions.get(index).and_then(Option::as_ref)
    }

    pub fn tx_mut(&mut self, index: usize) -> Option<&mut Transaction> {
        self.transactions.get_mut(index).and_then(Option::as_mut)
    }

    /// Number of transactions ever created, destroyed ones included.
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// Transactions that have not been destroyed, in creation order.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().flatten()
    }

    pub fn messages(&self) -> &[LogMessage] {
        &self.messages
    }

    pub fn flags(&self) -> ConnectionFlags {
        self.flags
    }

    pub fn client_addr(&self) -> Option<IpAddr> {
        self.client_addr
    }

    pub fn client_port(&self) -> Option<u16> {
        self.client_port
    }

    pub fn server_addr(&self) -> Option<IpAddr> {
        self.server_addr
    }

    pub fn server_port(&self) -> Option<u16> {
        self.server_port
    }

    pub fn open_timestamp(&self) -> Option<SystemTime> {
        self.open_timestamp
    }

    pub fn close_timestamp(&self) -> Option<SystemTime> {
        self.close_timestamp
    }

    /// Request bytes fed so far.
    pub fn in_data_counter(&self) -> u64 {
        self.in_data_counter
    }

    /// Response bytes fed so far.
    pub fn out_data_counter(&self) -> u64 {
        self.out_data_counter
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slots_are_stable() {
        let mut conn = Connection::default();
        assert_eq!(conn.create_tx(), 0);
        assert_eq!(conn.create_tx(), 1);
        assert_eq!(conn.create_tx(), 2);

        assert!(conn.remove_tx(1).is_some());
        assert!(conn.remove_tx(1).is_none());

        assert_eq!(conn.tx_count(), 3);
        assert!(conn.tx(1).is_none());
        assert_eq!(conn.tx(2).map(|t| t.index()), Some(2));
        assert_eq!(conn.transactions().count(), 2);

        assert_eq!(conn.create_tx(), 3);
    }

    #[test]
    fn open_and_close() {
        let mut conn = Connection::default();
        let now = SystemTime::now();
        let client = ("10.0.0.1".parse().unwrap(), 40000);
        conn.open(Some(client), None, now);
        conn.close(now);

        assert_eq!(conn.client_addr(), Some(client.0));
        assert_eq!(conn.client_port(), Some(40000));
        assert_eq!(conn.server_addr(), None);
        assert_eq!(conn.open_timestamp(), Some(now));
        assert_eq!(conn.close_timestamp(), Some(now));
    }
}
