use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::{Config, ConnectionParser, Direction, Error, Flag, HookResult, StreamState};

use super::scenario::{now, Scenario};

#[test]
fn split_get_with_response() {
    Scenario::builder()
        .request("GET /index.html?a=1 HTTP/1.1\r\nHost: www.example.com\r\nUser-Agent: curl\r\nAccept: */*\r\n\r\n")
        .response("HTTP/1.1 200 OK\r\nServer: test\r\nContent-Type: text/html\r\nContent-Length: 13\r\n\r\n<html></html>")
        .build()
        .assert_split_invariant();
}

#[test]
fn split_folding() {
    // Whether a line continues the previous header is only known once the next line starts.
    let outcome = Scenario::builder()
        .request("GET / HTTP/1.1\r\nHost: a\r\nX-Long: one\r\n two\r\n\tthree\r\nX-Next: 1\r\n\r\n")
        .response("HTTP/1.1 200 OK\r\nX-Folded: a\r\n b\r\nContent-Length: 0\r\n\r\n")
        .build()
        .assert_split_invariant();

    let tx = outcome.tx(0);
    assert_eq!(tx.request_headers().len(), 3);
    assert_eq!(
        tx.response_headers().get("x-folded").unwrap().value(),
        b"a b"
    );
}

#[test]
fn split_chunked_response() {
    let outcome = Scenario::builder()
        .request("GET / HTTP/1.1\r\nHost: a\r\n\r\n")
        .response("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\n\r\n")
        .build()
        .assert_split_invariant();

    assert_eq!(outcome.response_body, b"Wikipedia in\r\n\r\nchunks.");
}

#[test]
fn split_gzip_response() {
    let plain = b"the quick brown fox jumps over the lazy dog, again and again and again";
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(plain).unwrap();
    let body = enc.finish().unwrap();

    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(&body);

    let outcome = Scenario::builder()
        .request("GET / HTTP/1.1\r\nHost: a\r\n\r\n")
        .response(response)
        .build()
        .assert_split_invariant();

    assert_eq!(outcome.response_body, plain);
}

#[test]
fn split_pipelined() {
    let outcome = Scenario::builder()
        .request("GET /a HTTP/1.1\r\nHost: a\r\n\r\nPOST /b HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\n\r\nxyzGET /c HTTP/1.0\r\n\r\n")
        .response("HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\n1")
        .response("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 1\r\n\r\n2")
        .response("HTTP/1.0 200 OK\r\n\r\n3")
        .build()
        .assert_split_invariant();

    assert_eq!(outcome.tx_count(), 3);
    assert_eq!(outcome.request_body, b"xyz");
    assert_eq!(outcome.response_body, b"123");
    assert_eq!(outcome.tx(1).seen_100continue(), 1);
    assert!((0..3).all(|i| outcome.tx(i).is_complete()));
}

#[test]
fn split_http_0_9() {
    Scenario::builder()
        .request("GET /old\r\n")
        .response("plain old body")
        .build()
        .assert_split_invariant();
}

#[test]
fn split_anomalies() {
    let outcome = Scenario::builder()
        .request("  GET http://a/ HTTP/1.1\r\nHost: b\r\n Bad fold\r\nNo colon\r\nX-Nul: a\0b\r\nContent-Length: 1\r\nContent-Length: 1\r\n\r\nz")
        .response("HTTPX 99 Huh\r\nContent-Length: 0\r\n\r\n")
        .build()
        .assert_split_invariant();

    let flags = outcome.tx(0).flags();
    assert!(flags.contains(Flag::HostAmbiguous));
    assert!(flags.contains(Flag::FieldUnparseable));
    assert!(flags.contains(Flag::FieldRawNul));
    assert!(flags.contains(Flag::FieldRepeated));
    assert!(flags.contains(Flag::StatusLineInvalid));
}

#[test]
fn zero_length_feed() {
    let mut connp = ConnectionParser::new(Arc::new(Config::default()));

    assert_eq!(connp.request_data(now(), b"").unwrap(), StreamState::Data);
    assert_eq!(connp.response_data(now(), b"").unwrap(), StreamState::Data);
    assert_eq!(connp.conn().tx_count(), 0);

    connp.request_data(now(), b"GET / HT").unwrap();
    assert_eq!(connp.request_data(now(), b"").unwrap(), StreamState::Data);
    connp.request_data(now(), b"TP/1.0\r\n\r\n").unwrap();

    assert_eq!(connp.tx(0).unwrap().request_uri(), Some(&b"/"[..]));
}

#[test]
fn feed_by_direction() {
    let mut connp = ConnectionParser::new(Arc::new(Config::default()));

    connp
        .feed(Direction::Request, now(), b"GET / HTTP/1.0\r\n\r\n")
        .unwrap();
    connp
        .feed(Direction::Response, now(), b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n")
        .unwrap();

    assert!(connp.tx(0).unwrap().is_complete());
}

#[test]
fn connection_record() {
    let client = (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 50000);
    let server = (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 80);

    let mut connp = ConnectionParser::new(Arc::new(Config::default()));
    connp.open(Some(client), Some(server), now());

    let request = b"GET / HTTP/1.0\r\n\r\n";
    let response = b"HTTP/1.0 200 OK\r\n\r\nbody";
    connp.request_data(now(), request).unwrap();
    connp.response_data(now(), response).unwrap();
    connp.close(now()).unwrap();

    let conn = connp.conn();
    assert_eq!(conn.client_addr(), Some(client.0));
    assert_eq!(conn.client_port(), Some(50000));
    assert_eq!(conn.server_addr(), Some(server.0));
    assert_eq!(conn.server_port(), Some(80));
    assert_eq!(conn.open_timestamp(), Some(now()));
    assert_eq!(conn.close_timestamp(), Some(now()));
    assert_eq!(conn.in_data_counter(), request.len() as u64);
    assert_eq!(conn.out_data_counter(), response.len() as u64);

    assert_eq!(connp.request_status(), StreamState::Closed);
    assert_eq!(connp.response_status(), StreamState::Closed);
    assert!(connp.tx(0).unwrap().is_complete());
    assert_eq!(connp.tx(0).unwrap().to_string(), "tx#0 \"GET / HTTP/1.0\"");
}

#[test]
fn destroy_completed_transaction() {
    let mut connp = ConnectionParser::new(Arc::new(Config::default()));
    connp
        .request_data(now(), b"GET / HTTP/1.0\r\n\r\nGET /2 HTTP/1.0\r\n\r\n")
        .unwrap();
    connp
        .response_data(now(), b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n")
        .unwrap();

    // NoSuchTransaction, TransactionIncomplete
    assert_eq!(connp.destroy_tx(5), Err(Error::NoSuchTransaction(5)));
    assert_eq!(connp.destroy_tx(1), Err(Error::TransactionIncomplete(1)));

    connp.destroy_tx(0).unwrap();
    assert!(connp.tx(0).is_none());
    assert_eq!(connp.destroy_tx(0), Err(Error::NoSuchTransaction(0)));

    // The response side still pairs with the right transaction.
    connp
        .response_data(now(), b"HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n\r\n")
        .unwrap();
    assert_eq!(connp.tx(1).unwrap().response_status_number(), Some(404));
    assert_eq!(connp.conn().transactions().count(), 1);
}

#[test]
fn config_copy_on_write() {
    let shared = Arc::new(Config::default());

    let mut a = ConnectionParser::new(shared.clone());
    let mut b = ConnectionParser::new(shared.clone());

    a.config_mut().set_field_limits(10, 20);
    a.config_mut()
        .register_request_line(|_| HookResult::Stop);

    assert_eq!(a.config().field_limit_hard(), 20);
    assert_eq!(b.config().field_limit_hard(), 18000);
    assert_eq!(shared.field_limit_hard(), 18000);

    assert_eq!(
        a.request_data(now(), b"GET / HTTP/1.0\r\n").unwrap(),
        StreamState::Stop
    );
    assert_eq!(
        b.request_data(now(), b"GET / HTTP/1.0\r\n").unwrap(),
        StreamState::Data
    );
}

#[test]
fn errors_repeat() {
    let mut connp = ConnectionParser::new(Arc::new(Config::default()));

    let err = connp
        .request_data(now(), b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\nxyz\r\n")
        .unwrap_err();
    assert!(matches!(err, Error::InvalidChunkLength(_)));

    // Same error, no more parsing.
    assert_eq!(connp.request_data(now(), b"0\r\n\r\n").unwrap_err(), err);
    assert_eq!(connp.request_status(), StreamState::Error);
    assert_eq!(connp.close(now()), Err(err));
}

#[test]
fn close_repeats_response_error() {
    let mut connp = ConnectionParser::new(Arc::new(Config::default()));

    let err = connp
        .response_data(now(), b"HTTP/1.1 200 OK\r\n\r\n")
        .unwrap_err();
    assert_eq!(err, Error::UnmatchedResponse);

    assert_eq!(connp.close(now()), Err(err));
    assert_eq!(connp.response_status(), StreamState::Error);
    assert_eq!(connp.request_status(), StreamState::Closed);
}
