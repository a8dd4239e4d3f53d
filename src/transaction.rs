//! Transactions, one request/response pair each.
//!
//! A [`Transaction`] is created by the request side of the
//! [`ConnectionParser`][crate::ConnectionParser] as soon as the first byte of a new request
//! arrives, and is filled in as parsing progresses. The response side picks transactions up in
//! creation order. Hooks receive a `&mut Transaction` at every checkpoint.

use std::fmt;
use std::time::SystemTime;

use enumflags2::{bitflags, BitFlags};
use http::{Method, StatusCode, Version};

use crate::hook::{DataCallback, Hook};
use crate::Direction;

/// Anomalies recorded on a transaction (and on individual headers and header lines).
///
/// None of these stop parsing.
#[bitflags]
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Header line without a colon.
    FieldUnparseable = 0x4,
    /// Empty header name, whitespace before the colon or a name that is not a token.
    FieldInvalid = 0x8,
    /// Header value continued on a folded line.
    FieldFolded = 0x10,
    /// Header name seen more than once.
    FieldRepeated = 0x20,
    /// Line longer than the soft field limit.
    FieldLong = 0x40,
    /// Raw NUL byte in a header line.
    FieldRawNul = 0x80,
    /// Ambiguous body length.
    RequestSmuggling = 0x100,
    /// Folded line with no header before it.
    InvalidFolding = 0x200,
    /// Transfer-Encoding other than chunked, or chunked before HTTP/1.1.
    RequestInvalidTE = 0x400,
    /// HTTP/1.1 request without host information.
    HostMissing = 0x1000,
    /// Host header and URI authority disagree.
    HostAmbiguous = 0x2000,
    /// Response protocol or status number is invalid.
    StatusLineInvalid = 0x100_0000,
    /// Request body length can't be determined.
    RequestInvalid = 0x1_0000_0000,
    /// Request Content-Length is not a number.
    RequestInvalidCL = 0x2_0000_0000,
}

/// A set of [`Flag`]s.
pub type Flags = BitFlags<Flag>;

/// Protocol version as found in a request or status line.
///
/// Ordered so that `< Protocol::V1_1` covers unknown and invalid protocols too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    /// Something that is not one of the known versions.
    Invalid,
    /// Not seen (yet).
    Unknown,
    V0_9,
    V1_0,
    V1_1,
}

impl Protocol {
    /// The [`http::Version`] for a known protocol.
    pub fn version(&self) -> Option<Version> {
        match self {
            Protocol::V0_9 => Some(Version::HTTP_09),
            Protocol::V1_0 => Some(Version::HTTP_10),
            Protocol::V1_1 => Some(Version::HTTP_11),
            _ => None,
        }
    }
}

/// Request half progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestProgress {
    NotStarted,
    Line,
    Headers,
    Body,
    Trailer,
    Complete,
}

/// Response half progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResponseProgress {
    NotStarted,
    Line,
    Headers,
    Body,
    Trailer,
    Complete,
}

/// How the end of a message body is found on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferCoding {
    /// Not determined yet.
    Unknown,
    /// Known length, or until the stream closes.
    Identity,
    Chunked,
    NoBody,
    /// The headers don't allow a decision.
    Invalid,
}

/// Compression applied to a response entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentEncoding {
    /// Not determined yet.
    Unknown,
    None,
    Gzip,
    Deflate,
}

/// One raw header line as seen on the wire, line terminator removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    pub(crate) line: Vec<u8>,
    pub(crate) flags: Flags,
    pub(crate) header: Option<usize>,
    pub(crate) nul_count: usize,
    pub(crate) first_nul_offset: Option<usize>,
}

impl HeaderLine {
    pub(crate) fn new(line: Vec<u8>) -> Self {
        let nul_count = memchr::memchr_iter(0, &line).count();
        let first_nul_offset = memchr::memchr(0, &line);
        let mut flags = Flags::empty();
        if nul_count > 0 {
            flags.insert(Flag::FieldRawNul);
        }
        HeaderLine {
            line,
            flags,
            header: None,
            nul_count,
            first_nul_offset,
        }
    }

    /// The raw bytes of the line.
    pub fn line(&self) -> &[u8] {
        &self.line
    }

    /// Flags for this line.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Index into the header table of the header this line contributes to.
    pub fn header(&self) -> Option<usize> {
        self.header
    }

    /// Number of NUL bytes in the line.
    pub fn nul_count(&self) -> usize {
        self.nul_count
    }

    /// Offset of the first NUL byte.
    pub fn first_nul_offset(&self) -> Option<usize> {
        self.first_nul_offset
    }
}

/// A logical header, possibly assembled from several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub(crate) name: Vec<u8>,
    pub(crate) value: Vec<u8>,
    pub(crate) flags: Flags,
}

impl Header {
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The value, if it is valid UTF-8.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }
}

/// Header table keyed by case-insensitive name.
///
/// Repeated names are merged into the first occurrence, so every name appears once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    /// Look up a header by name, ignoring case.
    ///
    /// Accepts anything byte-like, including [`http::HeaderName`].
    pub fn get(&self, name: impl AsRef<[u8]>) -> Option<&Header> {
        self.index_of(name.as_ref()).map(|i| &self.entries[i])
    }

    pub fn get_index(&self, index: usize) -> Option<&Header> {
        self.entries.get(index)
    }

    pub fn contains(&self, name: impl AsRef<[u8]>) -> bool {
        self.index_of(name.as_ref()).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub(crate) fn index_of(&self, name: &[u8]) -> Option<usize> {
        self.entries
            .iter()
            .position(|h| h.name.eq_ignore_ascii_case(name))
    }

    /// Add a header, merging into an existing one with the same name.
    ///
    /// Returns the index of the header and whether it was a repeat.
    pub(crate) fn add(&mut self, header: Header) -> (usize, bool) {
        match self.index_of(&header.name) {
            Some(i) => {
                let existing = &mut self.entries[i];
                // Repeated Content-Length keeps the first value so it still parses as a number.
                if !existing
                    .name
                    .eq_ignore_ascii_case(http::header::CONTENT_LENGTH.as_str().as_bytes())
                {
                    existing.value.extend_from_slice(b", ");
                    existing.value.extend_from_slice(&header.value);
                }
                existing.flags |= header.flags | Flag::FieldRepeated;
                (i, true)
            }
            None => {
                self.entries.push(header);
                (self.entries.len() - 1, false)
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A name/value pair extracted from the transaction by a content parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    /// Which half of the transaction the parameter came from.
    pub source: Direction,
}

/// One HTTP request/response pair.
#[derive(Debug)]
pub struct Transaction {
    pub(crate) index: usize,

    // Request
    pub(crate) request_timestamp: Option<SystemTime>,
    pub(crate) request_ignored_lines: u32,
    pub(crate) request_line: Option<Vec<u8>>,
    pub(crate) request_line_nul: usize,
    pub(crate) request_line_nul_offset: Option<usize>,
    pub(crate) request_method: Option<Vec<u8>>,
    pub(crate) request_method_number: Option<Method>,
    pub(crate) request_uri: Option<Vec<u8>>,
    pub(crate) request_protocol: Option<Vec<u8>>,
    pub(crate) request_protocol_number: Protocol,
    pub(crate) is_protocol_0_9: bool,
    pub(crate) request_header_lines: Vec<HeaderLine>,
    pub(crate) request_headers: Headers,
    pub(crate) request_message_len: u64,
    pub(crate) request_entity_len: u64,
    pub(crate) request_transfer_coding: TransferCoding,
    pub(crate) request_content_length: Option<u64>,
    pub(crate) request_content_type: Option<Vec<u8>>,
    pub(crate) request_hostname: Option<Vec<u8>>,
    pub(crate) request_port_number: Option<u16>,
    pub(crate) request_progress: RequestProgress,

    // Response
    pub(crate) response_timestamp: Option<SystemTime>,
    pub(crate) response_ignored_lines: u32,
    pub(crate) response_line: Option<Vec<u8>>,
    pub(crate) response_protocol: Option<Vec<u8>>,
    pub(crate) response_protocol_number: Protocol,
    pub(crate) response_status: Option<Vec<u8>>,
    pub(crate) response_status_number: Option<u16>,
    pub(crate) response_status_expected_number: Option<u16>,
    pub(crate) response_message: Option<Vec<u8>>,
    pub(crate) seen_100continue: u32,
    pub(crate) response_header_lines: Vec<HeaderLine>,
    pub(crate) response_headers: Headers,
    pub(crate) response_message_len: u64,
    pub(crate) response_entity_len: u64,
    pub(crate) response_transfer_coding: TransferCoding,
    pub(crate) response_content_length: Option<u64>,
    pub(crate) response_content_type: Option<Vec<u8>>,
    pub(crate) response_content_encoding: ContentEncoding,
    pub(crate) response_content_encoding_processing: ContentEncoding,
    pub(crate) response_progress: ResponseProgress,

    pub(crate) flags: Flags,
    pub(crate) params: Vec<Param>,
    pub(crate) finalized: bool,

    pub(crate) hook_request_body_data: Hook<DataCallback>,
    pub(crate) hook_response_body_data: Hook<DataCallback>,
}

impl Transaction {
    pub(crate) fn new(index: usize) -> Self {
        Transaction {
            index,
            request_timestamp: None,
            request_ignored_lines: 0,
            request_line: None,
            request_line_nul: 0,
            request_line_nul_offset: None,
            request_method: None,
            request_method_number: None,
            request_uri: None,
            request_protocol: None,
            request_protocol_number: Protocol::Unknown,
            is_protocol_0_9: false,
            request_header_lines: Vec::new(),
            request_headers: Headers::default(),
            request_message_len: 0,
            request_entity_len: 0,
            request_transfer_coding: TransferCoding::Unknown,
            request_content_length: None,
            request_content_type: None,
            request_hostname: None,
            request_port_number: None,
            request_progress: RequestProgress::NotStarted,
            response_timestamp: None,
            response_ignored_lines: 0,
            response_line: None,
            response_protocol: None,
            response_protocol_number: Protocol::Unknown,
            response_status: None,
            response_status_number: None,
            response_status_expected_number: None,
            response_message: None,
            seen_100continue: 0,
            response_header_lines: Vec::new(),
            response_headers: Headers::default(),
            response_message_len: 0,
            response_entity_len: 0,
            response_transfer_coding: TransferCoding::Unknown,
            response_content_length: None,
            response_content_type: None,
            response_content_encoding: ContentEncoding::Unknown,
            response_content_encoding_processing: ContentEncoding::Unknown,
            response_progress: ResponseProgress::NotStarted,
            flags: Flags::empty(),
            params: Vec::new(),
            finalized: false,
            hook_request_body_data: Hook::default(),
            hook_response_body_data: Hook::default(),
        }
    }

    /// Position of this transaction in the connection.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Both halves have completed.
    pub fn is_complete(&self) -> bool {
        self.request_progress == RequestProgress::Complete
            && self.response_progress == ResponseProgress::Complete
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Record an anomaly from a hook.
    pub fn set_flags(&mut self, flags: impl Into<Flags>) {
        self.flags |= Into::<Flags>::into(flags);
    }

    // //////////////////////////////////////////////////////////////////////////////////////////// REQUEST

    /// When the first byte of the request was fed.
    pub fn request_timestamp(&self) -> Option<SystemTime> {
        self.request_timestamp
    }

    /// Empty lines seen before the request line.
    pub fn request_ignored_lines(&self) -> u32 {
        self.request_ignored_lines
    }

    /// The request line without its terminator.
    pub fn request_line(&self) -> Option<&[u8]> {
        self.request_line.as_deref()
    }

    /// Number of NUL bytes in the request line, and the offset of the first one.
    pub fn request_line_nul(&self) -> (usize, Option<usize>) {
        (self.request_line_nul, self.request_line_nul_offset)
    }

    pub fn request_method(&self) -> Option<&[u8]> {
        self.request_method.as_deref()
    }

    /// The parsed method, for the standard methods only.
    pub fn method(&self) -> Option<&Method> {
        self.request_method_number.as_ref()
    }

    pub fn request_uri(&self) -> Option<&[u8]> {
        self.request_uri.as_deref()
    }

    pub fn request_protocol(&self) -> Option<&[u8]> {
        self.request_protocol.as_deref()
    }

    pub fn request_protocol_number(&self) -> Protocol {
        self.request_protocol_number
    }

    /// The request line had no protocol.
    pub fn is_protocol_0_9(&self) -> bool {
        self.is_protocol_0_9
    }

    pub fn request_header_lines(&self) -> &[HeaderLine] {
        &self.request_header_lines
    }

    pub fn request_headers(&self) -> &Headers {
        &self.request_headers
    }

    /// Body bytes as seen on the wire, chunk framing included.
    pub fn request_message_len(&self) -> u64 {
        self.request_message_len
    }

    /// Body bytes after removing the transfer coding.
    pub fn request_entity_len(&self) -> u64 {
        self.request_entity_len
    }

    pub fn request_transfer_coding(&self) -> TransferCoding {
        self.request_transfer_coding
    }

    pub fn request_content_length(&self) -> Option<u64> {
        self.request_content_length
    }

    /// Lowercase media type of the request body, parameters removed.
    pub fn request_content_type(&self) -> Option<&[u8]> {
        self.request_content_type.as_deref()
    }

    pub fn request_hostname(&self) -> Option<&[u8]> {
        self.request_hostname.as_deref()
    }

    pub fn request_port_number(&self) -> Option<u16> {
        self.request_port_number
    }

    pub fn request_progress(&self) -> RequestProgress {
        self.request_progress
    }

    /// Add a per-transaction request body callback.
    ///
    /// These run before the callbacks registered in the configuration. Typically registered
    /// from a request headers hook by a content parser.
    pub fn register_request_body_data<F>(&mut self, f: F)
    where
        F: Fn(&mut Transaction, Option<&[u8]>) -> crate::HookResult + Send + Sync + 'static,
    {
        self.hook_request_body_data.register(std::sync::Arc::new(f));
    }

    // //////////////////////////////////////////////////////////////////////////////////////////// RESPONSE

    /// When the first byte of the response was fed.
    pub fn response_timestamp(&self) -> Option<SystemTime> {
        self.response_timestamp
    }

    /// Empty lines seen before the status line.
    pub fn response_ignored_lines(&self) -> u32 {
        self.response_ignored_lines
    }

    /// The status line without its terminator.
    pub fn response_line(&self) -> Option<&[u8]> {
        self.response_line.as_deref()
    }

    pub fn response_protocol(&self) -> Option<&[u8]> {
        self.response_protocol.as_deref()
    }

    pub fn response_protocol_number(&self) -> Protocol {
        self.response_protocol_number
    }

    /// The raw status token.
    pub fn response_status(&self) -> Option<&[u8]> {
        self.response_status.as_deref()
    }

    /// The status number, when it is in 100..=999.
    pub fn response_status_number(&self) -> Option<u16> {
        self.response_status_number
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response_status_number
            .and_then(|n| StatusCode::from_u16(n).ok())
    }

    /// The status a real server is predicted to answer with, when a personality quirk applies.
    pub fn response_status_expected_number(&self) -> Option<u16> {
        self.response_status_expected_number
    }

    pub fn response_message(&self) -> Option<&[u8]> {
        self.response_message.as_deref()
    }

    /// Number of interim 100-Continue responses.
    pub fn seen_100continue(&self) -> u32 {
        self.seen_100continue
    }

    pub fn response_header_lines(&self) -> &[HeaderLine] {
        &self.response_header_lines
    }

    pub fn response_headers(&self) -> &Headers {
        &self.response_headers
    }

    /// Body bytes as seen on the wire, chunk framing included.
    pub fn response_message_len(&self) -> u64 {
        self.response_message_len
    }

    /// Body bytes after removing the transfer coding and any decompression.
    pub fn response_entity_len(&self) -> u64 {
        self.response_entity_len
    }

    pub fn response_transfer_coding(&self) -> TransferCoding {
        self.response_transfer_coding
    }

    pub fn response_content_length(&self) -> Option<u64> {
        self.response_content_length
    }

    /// Lowercase media type of the response body, parameters removed.
    pub fn response_content_type(&self) -> Option<&[u8]> {
        self.response_content_type.as_deref()
    }

    /// Encoding declared by the Content-Encoding header.
    pub fn response_content_encoding(&self) -> ContentEncoding {
        self.response_content_encoding
    }

    /// Encoding the body is actually being decoded with.
    pub fn response_content_encoding_processing(&self) -> ContentEncoding {
        self.response_content_encoding_processing
    }

    /// Override decompression for this response.
    ///
    /// Only effective from the response headers hook; the decompressor is chosen right after it.
    pub fn set_response_content_encoding_processing(&mut self, encoding: ContentEncoding) {
        self.response_content_encoding_processing = encoding;
    }

    pub fn response_progress(&self) -> ResponseProgress {
        self.response_progress
    }

    /// Add a per-transaction response body callback.
    ///
    /// See [`Transaction::register_request_body_data`].
    pub fn register_response_body_data<F>(&mut self, f: F)
    where
        F: Fn(&mut Transaction, Option<&[u8]>) -> crate::HookResult + Send + Sync + 'static,
    {
        self.hook_response_body_data.register(std::sync::Arc::new(f));
    }

    // //////////////////////////////////////////////////////////////////////////////////////////// PARAMS

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// First parameter with the given name, case-sensitive.
    pub fn param(&self, name: &[u8]) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn add_param(&mut self, param: Param) {
        self.params.push(param);
    }

    // ////////////////////////////////////////////////////////////////////////////////////////////

    pub(crate) fn header_parts_mut(&mut self, dir: Direction) -> (&mut Vec<HeaderLine>, &mut Headers) {
        match dir {
            Direction::Request => (&mut self.request_header_lines, &mut self.request_headers),
            Direction::Response => (&mut self.response_header_lines, &mut self.response_headers),
        }
    }

    pub(crate) fn body_hook(&self, dir: Direction) -> &Hook<DataCallback> {
        match dir {
            Direction::Request => &self.hook_request_body_data,
            Direction::Response => &self.hook_response_body_data,
        }
    }

    /// Framed for a body. `Content-Length: 0` counts.
    pub(crate) fn has_request_body(&self) -> bool {
        matches!(
            self.request_transfer_coding,
            TransferCoding::Identity | TransferCoding::Chunked
        )
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = self
            .request_line
            .as_deref()
            .map(String::from_utf8_lossy)
            .unwrap_or_default();
        write!(f, "tx#{} {:?}", self.index, line)
    }
}
