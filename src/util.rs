use crate::transaction::Protocol;
use crate::Error;

pub(crate) const CR: u8 = b'\r';
pub(crate) const LF: u8 = b'\n';

/// Linear white space, SP or HT.
pub(crate) fn is_lws(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

/// Same set as C `isspace()`.
pub(crate) fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}

pub(crate) fn is_separator(c: u8) -> bool {
    matches!(
        c,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

pub(crate) fn is_token(c: u8) -> bool {
    (32..=126).contains(&c) && !is_separator(c)
}

/// Strip trailing line terminators (LF, or CR LF), repeatedly.
pub(crate) fn chomp(mut line: &[u8]) -> &[u8] {
    while let Some((&LF, rest)) = line.split_last() {
        line = rest;
        if let Some((&CR, rest)) = line.split_last() {
            line = rest;
        }
    }
    line
}

/// A bare LF or CR LF.
pub(crate) fn is_line_empty(line: &[u8]) -> bool {
    line == b"\n" || line == b"\r\n"
}

pub(crate) fn is_line_whitespace(line: &[u8]) -> bool {
    line.iter().all(|c| is_space(*c))
}

pub(crate) fn is_line_folded(line: &[u8]) -> bool {
    line.first().map(|c| is_lws(*c)).unwrap_or(false)
}

pub(crate) fn trim_lws(mut value: &[u8]) -> &[u8] {
    while let Some((first, rest)) = value.split_first() {
        if !is_lws(*first) {
            break;
        }
        value = rest;
    }
    while let Some((last, rest)) = value.split_last() {
        if !is_lws(*last) {
            break;
        }
        value = rest;
    }
    value
}

/// Parses a number surrounded by optional whitespace. Leading whitespace must be LWS,
/// trailing whitespace can be anything `isspace()` accepts.
fn parse_positive_integer_whitespace(data: &[u8], radix: u32) -> Option<u64> {
    let start = data.iter().position(|c| !is_lws(*c))?;
    let data = &data[start..];

    let end = data
        .iter()
        .position(|c| !(*c as char).is_digit(radix))
        .unwrap_or(data.len());

    if end == 0 || !data[end..].iter().all(|c| is_space(*c)) {
        return None;
    }

    // Only ascii digits, so this is valid utf-8.
    let digits = std::str::from_utf8(&data[..end]).ok()?;
    u64::from_str_radix(digits, radix).ok()
}

pub(crate) fn parse_content_length(value: &[u8]) -> Option<u64> {
    parse_positive_integer_whitespace(value, 10)
}

/// Chunk lengths are capped at `i32::MAX`; anything bigger is an error rather than a wrap.
pub(crate) fn parse_chunked_length(line: &[u8]) -> Result<u64, Error> {
    let invalid = || Error::InvalidChunkLength(String::from_utf8_lossy(line).into_owned());

    let trimmed = chomp(line);
    let start = trimmed
        .iter()
        .position(|c| !is_lws(*c))
        .unwrap_or(trimmed.len());
    let digits = &trimmed[start..];

    if !digits.first().map(u8::is_ascii_hexdigit).unwrap_or(false) {
        return Err(invalid());
    }

    // httparse wants the full size line including CRLF.
    let mut buf = Vec::with_capacity(digits.len() + 2);
    buf.extend_from_slice(digits);
    buf.extend_from_slice(b"\r\n");

    match httparse::parse_chunk_size(&buf).map_err(|_| invalid())? {
        httparse::Status::Complete((_, len)) if len <= i32::MAX as u64 => Ok(len),
        httparse::Status::Complete((_, len)) => Err(Error::ChunkLengthTooLarge(len)),
        httparse::Status::Partial => Err(invalid()),
    }
}

pub(crate) fn parse_protocol(protocol: &[u8]) -> Protocol {
    match protocol {
        b"HTTP/0.9" => Protocol::V0_9,
        b"HTTP/1.0" => Protocol::V1_0,
        b"HTTP/1.1" => Protocol::V1_1,
        _ => Protocol::Invalid,
    }
}

/// Status numbers outside 100..=999 are not statuses.
pub(crate) fn parse_status(status: &[u8]) -> Option<u16> {
    let n = parse_positive_integer_whitespace(status, 10)?;
    if (100..=999).contains(&n) {
        Some(n as u16)
    } else {
        None
    }
}

/// Lowercase media type without parameters.
pub(crate) fn parse_content_type(value: &[u8]) -> Vec<u8> {
    let end = value
        .iter()
        .position(|c| matches!(c, b';' | b',' | b' '))
        .unwrap_or(value.len());
    value[..end].to_ascii_lowercase()
}

/// Split `host[:port]` into a lowercase hostname and an optional port.
///
/// An unparseable port is reported as `Err` with the hostname still extracted.
pub(crate) fn parse_hostport(value: &[u8]) -> (Vec<u8>, Result<Option<u16>, ()>) {
    let value = trim_lws(value);

    // IPv6 literal
    let host_end = if value.first() == Some(&b'[') {
        value
            .iter()
            .position(|c| *c == b']')
            .map(|p| p + 1)
            .unwrap_or(value.len())
    } else {
        value
            .iter()
            .position(|c| *c == b':')
            .unwrap_or(value.len())
    };

    let mut host = value[..host_end].to_ascii_lowercase();
    while host.last() == Some(&b'.') {
        host.pop();
    }

    let rest = &value[host_end..];
    let port = match rest.split_first() {
        None => Ok(None),
        Some((b':', port)) if port.is_empty() => Ok(None),
        Some((b':', port)) => std::str::from_utf8(trim_lws(port))
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .map(Some)
            .ok_or(()),
        Some(_) => Err(()),
    };

    (host, port)
}

/// The authority part of an absolute URI, `http://authority/path`.
pub(crate) fn uri_authority(uri: &[u8]) -> Option<&[u8]> {
    let pos = memchr::memmem::find(uri, b"://")?;
    let scheme = &uri[..pos];
    if scheme.is_empty() || !scheme.iter().all(|c| c.is_ascii_alphanumeric() || b"+-.".contains(c))
    {
        return None;
    }
    let rest = &uri[pos + 3..];
    let end = rest
        .iter()
        .position(|c| matches!(c, b'/' | b'?' | b'#'))
        .unwrap_or(rest.len());
    let authority = &rest[..end];
    // Drop any userinfo.
    let authority = match memchr::memrchr(b'@', authority) {
        Some(at) => &authority[at + 1..],
        None => authority,
    };
    Some(authority)
}
