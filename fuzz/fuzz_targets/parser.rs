#![no_main]

use std::sync::Arc;
use std::time::SystemTime;

use htp_proto::{Config, ConnectionParser, Direction, HookResult, Personality, StreamState};
use libfuzzer_sys::fuzz_target;

// Personalities to pick from
const PERSONALITIES: &[Personality] = &[
    Personality::Minimal,
    Personality::Apache2,
    Personality::Iis5_1,
];

// Seed conversations the fuzz data is mixed into
const REQUESTS: &[&[u8]] = &[
    b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n",
    b"POST /form HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello",
    b"POST /up HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
    b"CONNECT example.com:443 HTTP/1.1\r\n\r\n",
    b"GET /\r\n",
];

const RESPONSES: &[&[u8]] = &[
    b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
    b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n",
    b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\n\r\n",
    b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n",
    b"HTTP/1.0 200 OK\r\nContent-Encoding: gzip\r\n\r\n\x1f\x8b\x08",
];

fuzz_target!(|data: &[u8]| {
    // Ensure we have enough data to work with
    if data.len() < 4 {
        return;
    }

    let personality = PERSONALITIES[(data[0] as usize) % PERSONALITIES.len()];
    let request = REQUESTS[(data[1] as usize) % REQUESTS.len()];
    let response = RESPONSES[(data[2] as usize) % RESPONSES.len()];
    let split = (data[3] as usize % 16) + 1;
    let noise = &data[4..];

    let mut config = Config::default()
        .with_personality(personality)
        .with_field_limits(256, 1024);

    // Exercise the body callbacks too.
    config.register_request_body_data(|_, _| HookResult::Continue);
    config.register_response_body_data(|_, _| HookResult::Continue);

    let mut connp = ConnectionParser::new(Arc::new(config));
    let now = SystemTime::now();

    // Seed request, fuzz bytes on both directions, seed response.
    let mut inbound = request.to_vec();
    inbound.extend_from_slice(noise);
    let mut outbound = response.to_vec();
    outbound.extend_from_slice(noise);

    let mut pending = [Vec::new(), Vec::new()];

    let pieces = inbound
        .chunks(split)
        .map(|c| (Direction::Request, c))
        .chain(outbound.chunks(split).map(|c| (Direction::Response, c)));

    for (direction, piece) in pieces {
        let slot = match direction {
            Direction::Request => 0,
            Direction::Response => 1,
        };
        let mut buf = std::mem::take(&mut pending[slot]);
        buf.extend_from_slice(piece);

        match connp.feed(direction, now, &buf) {
            Ok(StreamState::DataOther) => {
                let used = match direction {
                    Direction::Request => connp.request_data_consumed(),
                    Direction::Response => connp.response_data_consumed(),
                };
                pending[slot] = buf[used..].to_vec();
            }
            Ok(_) => {}
            Err(_) => return, // Fatal for the direction, nothing more to learn
        }
    }

    let _ = connp.close(now);

    // Every completed transaction must be destroyable, others not.
    for index in 0..connp.conn().tx_count() {
        let complete = connp.tx(index).map(|tx| tx.is_complete()).unwrap_or(false);
        assert_eq!(connp.destroy_tx(index).is_ok(), complete);
    }
});
