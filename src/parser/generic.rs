//! Line level parsing shared by the personalities.
//!
//! These functions only split bytes; the state machine decides what to record and log.

use crate::transaction::{Flag, Flags, Header};
use crate::util::{is_lws, is_space, is_token, trim_lws};
use crate::Direction;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct RequestLine<'a> {
    pub method: &'a [u8],
    pub uri: Option<&'a [u8]>,
    pub protocol: Option<&'a [u8]>,
    /// The line started with whitespace.
    pub leading_whitespace: bool,
    pub warnings: Vec<&'static str>,
}

/// Split a request line (terminator removed) into method, URI and protocol.
///
/// With `keep_leading_whitespace` any whitespace before the method becomes part of it.
pub(crate) fn parse_request_line(line: &[u8], keep_leading_whitespace: bool) -> RequestLine<'_> {
    let len = line.len();
    let mut out = RequestLine::default();
    let mut pos = 0;

    while pos < len && is_space(line[pos]) {
        pos += 1;
    }

    let method_start = if pos > 0 {
        out.leading_whitespace = true;
        out.warnings.push("Request line: leading whitespace");
        if keep_leading_whitespace {
            0
        } else {
            pos
        }
    } else {
        0
    };

    while pos < len && !is_space(line[pos]) {
        pos += 1;
    }
    out.method = &line[method_start..pos];

    let mut bad_delim = false;
    while pos < len && is_space(line[pos]) {
        if line[pos] != b' ' {
            bad_delim = true;
        }
        pos += 1;
    }
    if bad_delim {
        out.warnings
            .push("Request line: non-compliant delimiter between Method and URI");
    }

    if pos == len {
        // Method only.
        return out;
    }

    // The URI ends at the first SP. Other whitespace only counts when there is no SP at all.
    let uri_start = pos;
    let mut bad_delim = false;
    while pos < len && line[pos] != b' ' {
        if is_space(line[pos]) {
            bad_delim = true;
        }
        pos += 1;
    }
    if bad_delim && pos == len {
        pos = uri_start;
        while pos < len && !is_space(line[pos]) {
            pos += 1;
        }
    }
    if bad_delim {
        out.warnings
            .push("Request line: URI contains non-compliant delimiter");
    }
    out.uri = Some(&line[uri_start..pos]);

    while pos < len && is_space(line[pos]) {
        pos += 1;
    }

    if pos < len {
        out.protocol = Some(&line[pos..]);
    }

    out
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ResponseLine<'a> {
    pub protocol: Option<&'a [u8]>,
    pub status: Option<&'a [u8]>,
    pub message: Option<&'a [u8]>,
}

/// Split a status line (terminator removed) into protocol, status and message.
pub(crate) fn parse_response_line(line: &[u8]) -> ResponseLine<'_> {
    let len = line.len();
    let mut out = ResponseLine::default();
    let mut pos = 0;

    while pos < len && is_space(line[pos]) {
        pos += 1;
    }

    let start = pos;
    while pos < len && !is_space(line[pos]) {
        pos += 1;
    }
    if pos == start {
        return out;
    }
    out.protocol = Some(&line[start..pos]);

    while pos < len && is_space(line[pos]) {
        pos += 1;
    }
    if pos == len {
        return out;
    }

    let start = pos;
    while pos < len && !is_space(line[pos]) {
        pos += 1;
    }
    out.status = Some(&line[start..pos]);

    while pos < len && is_space(line[pos]) {
        pos += 1;
    }
    if pos < len {
        out.message = Some(&line[pos..]);
    }

    out
}

/// A status line must begin with "HTTP", case-insensitive, after optional whitespace.
pub(crate) fn looks_like_response_line(line: &[u8]) -> bool {
    let start = line
        .iter()
        .position(|c| !is_space(*c))
        .unwrap_or(line.len());
    let rest = &line[start..];
    rest.len() >= 4 && rest[..4].eq_ignore_ascii_case(b"http")
}

/// Parse one logical header (folded continuations already joined, terminator removed).
pub(crate) fn parse_header(direction: Direction, data: &[u8]) -> Header {
    let mut flags = Flags::empty();

    let colon = match memchr::memchr(b':', data) {
        Some(c) => c,
        None => {
            // A header with an empty name, the whole line is the value.
            let value = match direction {
                Direction::Request => {
                    flags |= Flag::FieldUnparseable;
                    data
                }
                Direction::Response => {
                    flags |= Flag::FieldUnparseable | Flag::FieldInvalid;
                    trim_lws(data)
                }
            };
            return Header {
                name: Vec::new(),
                value: value.to_vec(),
                flags,
            };
        }
    };

    if colon == 0 {
        flags |= Flag::FieldInvalid;
    }

    let mut name_end = colon;
    while name_end > 0 && is_lws(data[name_end - 1]) {
        name_end -= 1;
        flags |= Flag::FieldInvalid;
    }
    let name = &data[..name_end];

    if !name.iter().all(|c| is_token(*c)) {
        flags |= Flag::FieldInvalid;
    }

    // The value stops at a NUL byte.
    let value = &data[colon + 1..];
    let value = match memchr::memchr(0, value) {
        Some(nul) => &value[..nul],
        None => value,
    };

    Header {
        name: name.to_vec(),
        value: trim_lws(value).to_vec(),
        flags,
    }
}
