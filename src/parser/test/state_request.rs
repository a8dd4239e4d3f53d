use http::Method;

use crate::{Config, ConnectionFlag, Flag, Flags, Personality, Protocol, RequestProgress};
use crate::{RequestState, StreamState, TransferCoding};

use super::scenario::Scenario;

#[test]
fn parse_get() {
    let scenario = Scenario::builder()
        .request("GET /index.html HTTP/1.1\r\nHost: www.example.com\r\nUser-Agent: test\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert_eq!(tx.request_line(), Some(&b"GET /index.html HTTP/1.1"[..]));
    assert_eq!(tx.request_method(), Some(&b"GET"[..]));
    assert_eq!(tx.method(), Some(&Method::GET));
    assert_eq!(tx.request_uri(), Some(&b"/index.html"[..]));
    assert_eq!(tx.request_protocol(), Some(&b"HTTP/1.1"[..]));
    assert_eq!(tx.request_protocol_number(), Protocol::V1_1);
    assert_eq!(tx.request_hostname(), Some(&b"www.example.com"[..]));
    assert_eq!(tx.request_transfer_coding(), TransferCoding::NoBody);
    assert_eq!(tx.request_progress(), RequestProgress::Complete);
    assert_eq!(tx.request_headers().len(), 2);
    assert_eq!(tx.request_header_lines().len(), 2);
    assert_eq!(
        tx.request_headers().get("user-agent").unwrap().value(),
        b"test"
    );
    assert_eq!(tx.flags(), Flags::empty());
    assert!(outcome.errors.is_empty());
}

#[test]
fn request_without_response_waits() {
    let scenario = Scenario::builder()
        .request("GET / HTTP/1.1\r\nHost: a\r\n\r\n")
        .no_close()
        .build();

    let outcome = scenario.run();

    assert_eq!(outcome.connp.request_state(), RequestState::Idle);
    assert_eq!(outcome.connp.request_status(), StreamState::Data);
    assert!(!outcome.tx(0).is_complete());
}

#[test]
fn leading_empty_lines_are_ignored() {
    let scenario = Scenario::builder()
        .request("\r\n\n\r\nGET / HTTP/1.0\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert_eq!(tx.request_ignored_lines(), 3);
    assert_eq!(tx.request_uri(), Some(&b"/"[..]));
}

#[test]
fn unknown_method() {
    let scenario = Scenario::builder()
        .request("FOO / HTTP/1.0\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert_eq!(tx.request_method(), Some(&b"FOO"[..]));
    assert_eq!(tx.method(), None);
    assert_eq!(tx.request_progress(), RequestProgress::Complete);
}

#[test]
fn invalid_protocol() {
    let scenario = Scenario::builder()
        .request("GET / HTTP/1.2\r\n\r\n")
        .build();

    let outcome = scenario.run();

    assert_eq!(outcome.tx(0).request_protocol_number(), Protocol::Invalid);
}

#[test]
fn http_0_9() {
    let scenario = Scenario::builder()
        .request("GET /\r\n")
        .response("<html>hello</html>")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert!(tx.is_protocol_0_9());
    assert_eq!(tx.request_protocol_number(), Protocol::V0_9);
    assert!(tx.request_headers().is_empty());
    assert_eq!(tx.response_line(), None);
    assert_eq!(outcome.response_body, b"<html>hello</html>");
    assert!(tx.is_complete());
    assert_eq!(
        outcome.connp.request_state(),
        RequestState::IgnoreDataAfterHttp09
    );
}

#[test]
fn http_0_9_extra_data() {
    let scenario = Scenario::builder()
        .request("GET /\r\nGET /again HTTP/1.1\r\n\r\n")
        .build();

    let outcome = scenario.run();

    assert_eq!(outcome.tx_count(), 1);
    assert!(outcome
        .connp
        .conn()
        .flags()
        .contains(ConnectionFlag::Http09Extra));
    assert!(outcome.has_message("after HTTP/0.9"));
}

#[test]
fn host_missing() {
    let scenario = Scenario::builder()
        .request("GET / HTTP/1.1\r\n\r\n")
        .build();
    let outcome = scenario.run();
    assert!(outcome.tx(0).flags().contains(Flag::HostMissing));

    // Not required before 1.1
    let scenario = Scenario::builder()
        .request("GET / HTTP/1.0\r\n\r\n")
        .build();
    let outcome = scenario.run();
    assert!(!outcome.tx(0).flags().contains(Flag::HostMissing));
}

#[test]
fn host_from_uri() {
    let scenario = Scenario::builder()
        .request("GET http://www.Example.com:8080/x HTTP/1.1\r\nHost: www.example.com:8080\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert_eq!(tx.request_hostname(), Some(&b"www.example.com"[..]));
    assert_eq!(tx.request_port_number(), Some(8080));
    assert!(!tx.flags().contains(Flag::HostAmbiguous));
}

#[test]
fn host_ambiguous() {
    let scenario = Scenario::builder()
        .request("GET http://a.example/ HTTP/1.1\r\nHost: b.example\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert_eq!(tx.request_hostname(), Some(&b"a.example"[..]));
    assert!(tx.flags().contains(Flag::HostAmbiguous));
}

#[test]
fn content_length_body() {
    let scenario = Scenario::builder()
        .request("POST /form HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\nContent-Type: text/plain; charset=utf-8\r\n\r\nhello")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert_eq!(tx.request_transfer_coding(), TransferCoding::Identity);
    assert_eq!(tx.request_content_length(), Some(5));
    assert_eq!(tx.request_content_type(), Some(&b"text/plain"[..]));
    assert_eq!(tx.request_entity_len(), 5);
    assert_eq!(tx.request_message_len(), 5);
    assert_eq!(outcome.request_body, b"hello");
    assert_eq!(outcome.flushes, 1);
}

#[test]
fn zero_content_length() {
    let scenario = Scenario::builder()
        .request("POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 0\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert_eq!(tx.request_progress(), RequestProgress::Complete);
    assert_eq!(tx.request_entity_len(), 0);
    assert!(outcome.request_body.is_empty());
}

#[test]
fn invalid_content_length() {
    let scenario = Scenario::builder()
        .request("POST / HTTP/1.1\r\nHost: a\r\nContent-Length: abc\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert!(tx.flags().contains(Flag::RequestInvalidCL));
    assert!(tx.flags().contains(Flag::RequestInvalid));
    assert_eq!(tx.request_transfer_coding(), TransferCoding::Invalid);
    assert_eq!(outcome.errors, vec![crate::Error::InvalidRequestBody]);
    assert_eq!(outcome.connp.request_status(), StreamState::Error);
}

#[test]
fn content_length_and_chunked() {
    let scenario = Scenario::builder()
        .request("POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 100\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    // Chunked wins.
    assert_eq!(tx.request_transfer_coding(), TransferCoding::Chunked);
    assert!(tx.flags().contains(Flag::RequestSmuggling));
    assert_eq!(outcome.request_body, b"abc");
}

#[test]
fn chunked_on_http_1_0() {
    let scenario = Scenario::builder()
        .request("POST / HTTP/1.0\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert!(tx.flags().contains(Flag::RequestInvalidTE));
    assert!(tx.flags().contains(Flag::RequestSmuggling));
    assert_eq!(tx.request_progress(), RequestProgress::Complete);
}

#[test]
fn repeated_content_length() {
    let scenario = Scenario::builder()
        .request("POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 2\r\nContent-Length: 2\r\n\r\nok")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert!(tx.flags().contains(Flag::FieldRepeated));
    assert!(tx.flags().contains(Flag::RequestSmuggling));
    assert_eq!(tx.request_content_length(), Some(2));
    assert_eq!(outcome.request_body, b"ok");
}

#[test]
fn folded_header() {
    let scenario = Scenario::builder()
        .request("GET / HTTP/1.1\r\nHost: a\r\nX-Folded: one\r\n\ttwo\r\n three\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    let h = tx.request_headers().get("x-folded").unwrap();
    assert_eq!(h.value(), b"one\ttwo three");
    assert!(h.flags().contains(Flag::FieldFolded));

    let lines = tx.request_header_lines();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0].header(), Some(0));
    assert!(lines[1..].iter().all(|l| l.header() == Some(1)));
    assert!(!tx.flags().contains(Flag::InvalidFolding));
}

#[test]
fn invalid_folding() {
    let scenario = Scenario::builder()
        .request("GET / HTTP/1.1\r\n Host: a\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert!(tx.flags().contains(Flag::InvalidFolding));
    // Kept as a header of its own, whitespace and all.
    let h = tx.request_headers().get_index(0).unwrap();
    assert_eq!(h.name(), b" Host");
    assert!(h.flags().contains(Flag::FieldInvalid));
}

#[test]
fn repeated_header_merged() {
    let scenario = Scenario::builder()
        .request("GET / HTTP/1.1\r\nHost: a\r\nAccept: text/html\r\naccept: text/plain\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert_eq!(tx.request_headers().len(), 2);
    assert_eq!(
        tx.request_headers().get("Accept").unwrap().value(),
        b"text/html, text/plain"
    );
    assert!(tx.flags().contains(Flag::FieldRepeated));
}

#[test]
fn header_without_colon() {
    let scenario = Scenario::builder()
        .request("GET / HTTP/1.0\r\nNo colon here\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert!(tx.flags().contains(Flag::FieldUnparseable));
    let h = tx.request_headers().get_index(0).unwrap();
    assert!(h.name().is_empty());
    assert_eq!(h.value(), b"No colon here");
}

#[test]
fn header_with_space_before_colon() {
    let scenario = Scenario::builder()
        .request("GET / HTTP/1.0\r\nX-Bad : value\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert!(tx.flags().contains(Flag::FieldInvalid));
    assert_eq!(tx.request_headers().get("x-bad").unwrap().value(), b"value");
}

#[test]
fn header_with_nul() {
    let scenario = Scenario::builder()
        .request("GET / HTTP/1.0\r\nX-Nul: a\0b\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert!(tx.flags().contains(Flag::FieldRawNul));
    assert_eq!(tx.request_headers().get("x-nul").unwrap().value(), b"a");
    assert_eq!(tx.request_header_lines()[0].nul_count(), 1);
}

#[test]
fn long_header_line() {
    let config = Config::default().with_field_limits(32, 1024);
    let long = "x".repeat(40);

    let scenario = Scenario::builder()
        .config(config)
        .request(format!("GET / HTTP/1.0\r\nX-Long: {}\r\n\r\n", long))
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert!(tx.flags().contains(Flag::FieldLong));
    // Kept whole.
    assert_eq!(
        tx.request_headers().get("x-long").unwrap().value(),
        long.as_bytes()
    );
}

#[test]
fn line_feed_only() {
    let scenario = Scenario::builder()
        .request("GET /lf HTTP/1.1\nHost: a\n\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert_eq!(tx.request_uri(), Some(&b"/lf"[..]));
    assert_eq!(tx.request_hostname(), Some(&b"a"[..]));
    assert_eq!(tx.request_progress(), RequestProgress::Complete);
}

#[test]
fn pipelined() {
    let scenario = Scenario::builder()
        .request("GET /a HTTP/1.1\r\nHost: a\r\n\r\nGET /b HTTP/1.1\r\nHost: a\r\n\r\n")
        .response("HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\naHTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nb")
        .build();

    let outcome = scenario.run();

    assert_eq!(outcome.tx_count(), 2);
    assert_eq!(outcome.tx(1).request_uri(), Some(&b"/b"[..]));
    assert!(outcome.tx(0).is_complete());
    assert!(outcome.tx(1).is_complete());
    assert_eq!(outcome.response_body, b"ab");
    assert!(outcome
        .connp
        .conn()
        .flags()
        .contains(ConnectionFlag::Pipelined));
}

#[test]
fn not_pipelined() {
    let scenario = Scenario::builder()
        .request("GET /a HTTP/1.1\r\nHost: a\r\n\r\n")
        .response("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
        .request("GET /b HTTP/1.1\r\nHost: a\r\n\r\n")
        .response("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
        .build();

    let outcome = scenario.run();

    assert_eq!(outcome.tx_count(), 2);
    assert!(!outcome
        .connp
        .conn()
        .flags()
        .contains(ConnectionFlag::Pipelined));
}

#[test]
fn apache_nul_terminates_request_line() {
    let config = Config::default().with_personality(Personality::Apache2);

    let scenario = Scenario::builder()
        .config(config)
        .request("GET /a\0b HTTP/1.0\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert_eq!(tx.request_uri(), Some(&b"/a"[..]));
    assert_eq!(tx.request_line_nul(), (1, Some(6)));
}

#[test]
fn nul_kept_in_request_line() {
    let scenario = Scenario::builder()
        .request("GET /a\0b HTTP/1.0\r\n\r\n")
        .build();

    let outcome = scenario.run();
    let tx = outcome.tx(0);

    assert_eq!(tx.request_uri(), Some(&b"/a\0b"[..]));
    assert_eq!(tx.request_protocol_number(), Protocol::V1_0);
    assert_eq!(tx.request_line_nul(), (1, Some(6)));
    assert!(outcome.has_message("NUL"));
}

#[test]
fn leading_whitespace() {
    let scenario = Scenario::builder()
        .request("  GET / HTTP/1.0\r\n\r\n")
        .build();
    let outcome = scenario.run();
    let tx = outcome.tx(0);
    assert_eq!(tx.request_method(), Some(&b"GET"[..]));
    assert_eq!(tx.response_status_expected_number(), None);

    let config = Config::default().with_personality(Personality::Apache2);
    let scenario = Scenario::builder()
        .config(config)
        .request("  GET / HTTP/1.0\r\n\r\n")
        .build();
    let outcome = scenario.run();
    let tx = outcome.tx(0);
    assert_eq!(tx.request_method(), Some(&b"  GET"[..]));
    assert_eq!(tx.method(), None);
    assert_eq!(tx.response_status_expected_number(), Some(400));
}

#[test]
fn whitespace_line_terminates_headers() {
    let request = "GET / HTTP/1.0\r\nHost: a\r\n \r\nX-After: 1\r\n\r\n";

    let config = Config::default().with_personality(Personality::Iis5_1);
    let scenario = Scenario::builder()
        .config(config)
        .request(request)
        .no_close()
        .build();
    let outcome = scenario.run();
    let tx = outcome.tx(0);
    assert_eq!(tx.request_headers().len(), 1);
    assert_eq!(tx.request_progress(), RequestProgress::Complete);

    // Otherwise it is a folded continuation.
    let scenario = Scenario::builder().request(request).no_close().build();
    let outcome = scenario.run();
    let tx = outcome.tx(0);
    assert_eq!(tx.request_headers().len(), 2);
    assert_eq!(tx.request_headers().get("host").unwrap().value(), b"a");
}
