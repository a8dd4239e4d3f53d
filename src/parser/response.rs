//! Response side state machine.

use http::{header, Method};

use super::generic::{looks_like_response_line, parse_response_line};
use super::{tx_mut, ConnectionParser, Halt, Input, Step, StreamState};
use crate::decompress::Decompressor;
use crate::hook::TxHook;
use crate::transaction::{ContentEncoding, Flag, Protocol, ResponseProgress, TransferCoding};
use crate::util::{
    chomp, parse_chunked_length, parse_content_length, parse_content_type, parse_protocol,
    parse_status, trim_lws, LF,
};
use crate::{Direction, Error};

/// Where the response side is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseState {
    /// Between responses.
    Idle,
    Line,
    Headers,
    BodyDetermine,
    BodyChunkedLength,
    BodyChunkedData,
    /// The line ending after chunk data.
    BodyChunkedDataEnd,
    /// Body with a known Content-Length.
    BodyIdentityClKnown,
    /// Body that ends when the connection closes.
    BodyIdentityStreamClose,
    Finalize,
}

impl ConnectionParser {
    pub(crate) fn res_step(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        match self.res.state {
            ResponseState::Idle => self.res_idle(input),
            ResponseState::Line => self.res_line(input),
            ResponseState::Headers => self.res_headers(input),
            ResponseState::BodyDetermine => self.res_body_determine(),
            ResponseState::BodyChunkedLength => self.res_body_chunked_length(input),
            ResponseState::BodyChunkedData => self.res_body_chunked_data(input),
            ResponseState::BodyChunkedDataEnd => self.res_body_chunked_data_end(input),
            ResponseState::BodyIdentityClKnown => self.res_body_identity_cl_known(input),
            ResponseState::BodyIdentityStreamClose => self.res_body_identity_stream_close(input),
            ResponseState::Finalize => self.res_finalize(),
        }
    }

    fn res_idle(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        if input.peek_byte().is_none() {
            return Ok(Step::NeedData);
        }

        let index = self.out_next_tx_index;
        if self.conn.tx(index).is_none() {
            return Err(Error::UnmatchedResponse.into());
        }
        self.out_next_tx_index += 1;
        self.res.tx = Some(index);
        self.res.remaining = 0;
        self.decompressor = None;
        debug!("Response start, transaction {}", index);

        if self.req.tx == Some(index) && self.req.state == super::RequestState::Line {
            let tx = tx_mut(&mut self.conn, index)?;
            if tx.request_method.is_none() && tx.request_uri.is_none() {
                htp_log!(self, Warning, Some(index), "Request line incomplete");
            }
        }

        let tx = tx_mut(&mut self.conn, index)?;
        tx.response_timestamp = self.res.timestamp;
        tx.response_progress = ResponseProgress::Line;

        self.run_hook(index, TxHook::ResponseStart)?;

        let tx = tx_mut(&mut self.conn, index)?;
        if tx.is_protocol_0_9 {
            // No status line and no headers, just a body until the connection closes.
            tx.response_transfer_coding = TransferCoding::Identity;
            tx.response_content_encoding_processing = ContentEncoding::None;
            tx.response_progress = ResponseProgress::Body;
            self.res.set_state(ResponseState::BodyIdentityStreamClose);
        } else {
            self.res.set_state(ResponseState::Line);
        }

        Ok(Step::Continue)
    }

    fn res_line(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.res.tx_index()?;

        if !self.res.read_line(input, self.cfg.field_limit_hard)? {
            return Ok(Step::NeedData);
        }
        let line = self.res.take_line();

        if chomp(&line).is_empty() {
            let tx = tx_mut(&mut self.conn, index)?;
            tx.response_ignored_lines += 1;
            return Ok(Step::Continue);
        }

        self.check_line_length(index, &line)?;

        let tx = tx_mut(&mut self.conn, index)?;
        tx.response_line = None;
        tx.response_protocol = None;
        tx.response_protocol_number = Protocol::Unknown;
        tx.response_status = None;
        tx.response_status_number = None;
        tx.response_message = None;

        let data = chomp(&line);

        if !looks_like_response_line(data) {
            // Not a status line. Everything from here on is body.
            tx.response_content_encoding_processing = ContentEncoding::None;
            tx.response_transfer_coding = TransferCoding::Identity;
            tx.response_progress = ResponseProgress::Body;
            htp_log!(self, Warning, Some(index), "Response line is not HTTP, treating as body");

            self.res.set_state(ResponseState::BodyIdentityStreamClose);
            self.res_process_body_data(index, &line)?;
            return Ok(Step::Continue);
        }

        let parsed = parse_response_line(data);

        tx.response_line = Some(data.to_vec());
        tx.response_protocol = parsed.protocol.map(<[u8]>::to_vec);
        tx.response_protocol_number = parsed
            .protocol
            .map(parse_protocol)
            .unwrap_or(Protocol::Invalid);
        tx.response_status = parsed.status.map(<[u8]>::to_vec);
        tx.response_status_number = parsed.status.and_then(parse_status);
        tx.response_message = parsed.message.map(<[u8]>::to_vec);

        let invalid_protocol = tx.response_protocol_number == Protocol::Invalid;
        let invalid_status = tx.response_status_number.is_none();
        if invalid_protocol || invalid_status {
            tx.flags |= Flag::StatusLineInvalid;
        }

        if invalid_protocol {
            htp_log!(self, Warning, Some(index), "Response line: invalid protocol");
        }
        if invalid_status {
            htp_log!(self, Warning, Some(index), "Response line: invalid status");
        }

        self.run_hook(index, TxHook::ResponseLine)?;

        let tx = tx_mut(&mut self.conn, index)?;
        tx.response_progress = ResponseProgress::Headers;
        self.res.set_state(ResponseState::Headers);

        Ok(Step::Continue)
    }

    fn res_headers(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.res.tx_index()?;

        if !self.res.read_line(input, self.cfg.field_limit_hard)? {
            return Ok(Step::NeedData);
        }
        let line = self.res.take_line();

        if !self.header_line(Direction::Response, index, line)? {
            return Ok(Step::Continue);
        }

        let tx = tx_mut(&mut self.conn, index)?;
        if tx.response_progress == ResponseProgress::Trailer {
            self.run_hook(index, TxHook::ResponseTrailer)?;
            self.res.set_state(ResponseState::Finalize);
        } else {
            self.res.set_state(ResponseState::BodyDetermine);
        }

        Ok(Step::Continue)
    }

    /// Decide how the response body is delimited.
    fn res_body_determine(&mut self) -> Result<Step, Halt> {
        let index = self.res.tx_index()?;
        let tx = tx_mut(&mut self.conn, index)?;

        let status = tx.response_status_number;
        let is_connect = tx.request_method_number == Some(Method::CONNECT);
        let is_head = tx.request_method_number == Some(Method::HEAD);

        if is_connect {
            if matches!(status, Some(200..=299)) {
                tx.response_transfer_coding = TransferCoding::NoBody;
                self.res_process_headers(index)?;
                self.tunnel(index)?;
                return Ok(Step::Continue);
            }

            // The CONNECT failed. The request side can go on, but must not race ahead of this
            // response.
            if self.req.status == StreamState::DataOther {
                self.req.status = StreamState::Data;
            }
            self.out_data_other_at_tx_end = true;
        }

        if status == Some(100) {
            if tx.seen_100continue > 0 {
                return Err(Error::Repeated100Continue.into());
            }
            // Interim response, the real one follows.
            tx.response_headers.clear();
            tx.response_header_lines.clear();
            tx.response_progress = ResponseProgress::Line;
            tx.seen_100continue += 1;
            self.res.set_state(ResponseState::Line);
            return Ok(Step::Continue);
        }

        let mut warnings = Vec::new();

        let no_body = matches!(status, Some(100..=199) | Some(204) | Some(304)) || is_head;

        if no_body {
            tx.response_transfer_coding = TransferCoding::NoBody;
            self.res.set_state(ResponseState::Finalize);
        } else {
            let te = tx.response_headers.get(header::TRANSFER_ENCODING);
            let cl = tx.response_headers.get(header::CONTENT_LENGTH);
            let ct = tx.response_headers.get(header::CONTENT_TYPE);

            let chunked = te.map(|h| contains_nocase(&h.value, b"chunked")).unwrap_or(false);

            if chunked {
                if let Some(te) = te {
                    if !te.value.eq_ignore_ascii_case(b"chunked") {
                        warnings.push("Response transfer-encoding has abnormal chunked value");
                    }
                }
                if cl.is_some() {
                    tx.flags |= Flag::RequestSmuggling;
                    warnings.push("Response has both content-length and transfer-encoding");
                }
                tx.response_transfer_coding = TransferCoding::Chunked;
                tx.response_progress = ResponseProgress::Body;
                self.res.set_state(ResponseState::BodyChunkedLength);
            } else if let Some(cl) = cl {
                let repeated = cl.flags.contains(Flag::FieldRepeated);
                let len = match parse_content_length(&cl.value) {
                    Some(len) => len,
                    None => {
                        let value = String::from_utf8_lossy(&cl.value).into_owned();
                        return Err(Error::InvalidContentLength(value).into());
                    }
                };
                if repeated {
                    tx.flags |= Flag::RequestSmuggling;
                    warnings.push("Response content-length repeated");
                }
                tx.response_transfer_coding = TransferCoding::Identity;
                tx.response_content_length = Some(len);
                self.res.remaining = len;
                if len > 0 {
                    tx.response_progress = ResponseProgress::Body;
                    self.res.set_state(ResponseState::BodyIdentityClKnown);
                } else {
                    self.res.set_state(ResponseState::Finalize);
                }
            } else {
                let byteranges = ct
                    .map(|h| contains_nocase(&h.value, b"multipart/byteranges"))
                    .unwrap_or(false);
                if byteranges {
                    return Err(Error::MultipartByteranges.into());
                }
                // Until the connection closes.
                tx.response_transfer_coding = TransferCoding::Identity;
                tx.response_progress = ResponseProgress::Body;
                self.res.set_state(ResponseState::BodyIdentityStreamClose);
            }
        }

        for w in warnings {
            htp_log!(self, Warning, Some(index), "{}", w);
        }

        self.res_process_headers(index)?;

        Ok(Step::Continue)
    }

    /// Content type and encoding, the response headers hook, then the decompressor.
    fn res_process_headers(&mut self, index: usize) -> Result<(), Halt> {
        let decompression_enabled = self.cfg.response_decompression_enabled;
        let tx = tx_mut(&mut self.conn, index)?;

        if let Some(ct) = tx.response_headers.get(header::CONTENT_TYPE) {
            tx.response_content_type = Some(parse_content_type(&ct.value));
        }

        let encoding = match tx.response_headers.get(header::CONTENT_ENCODING) {
            Some(ce) => {
                let v = trim_lws(&ce.value);
                if v.eq_ignore_ascii_case(b"gzip") || v.eq_ignore_ascii_case(b"x-gzip") {
                    ContentEncoding::Gzip
                } else if v.eq_ignore_ascii_case(b"deflate") || v.eq_ignore_ascii_case(b"x-deflate")
                {
                    ContentEncoding::Deflate
                } else {
                    ContentEncoding::None
                }
            }
            None => ContentEncoding::None,
        };

        tx.response_content_encoding = encoding;
        tx.response_content_encoding_processing = if decompression_enabled {
            encoding
        } else {
            ContentEncoding::None
        };

        self.run_hook(index, TxHook::ResponseHeaders)?;

        // The hook may have changed its mind about decompression.
        let tx = tx_mut(&mut self.conn, index)?;
        if tx.response_transfer_coding != TransferCoding::NoBody {
            self.decompressor = Decompressor::new(tx.response_content_encoding_processing);
            if let Some(d) = &self.decompressor {
                debug!("Decompress response body: {:?}", d.encoding());
            }
        }

        Ok(())
    }

    fn res_body_chunked_length(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.res.tx_index()?;

        if !self.res.read_line(input, self.cfg.field_limit_hard)? {
            if self.res.is_closed() {
                return self.res_body_truncated(index);
            }
            return Ok(Step::NeedData);
        }
        let line = self.res.take_line();

        let tx = tx_mut(&mut self.conn, index)?;
        tx.response_message_len += line.len() as u64;

        let len = parse_chunked_length(&line)?;
        self.res.remaining = len;

        if len > 0 {
            self.res.set_state(ResponseState::BodyChunkedData);
        } else {
            tx.response_progress = ResponseProgress::Trailer;
            self.res.set_state(ResponseState::Headers);
        }

        Ok(Step::Continue)
    }

    fn res_body_chunked_data(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.res.tx_index()?;

        let data = input.take(self.res.remaining);
        if data.is_empty() {
            if self.res.is_closed() {
                return self.res_body_truncated(index);
            }
            return Ok(Step::NeedData);
        }
        self.res.remaining -= data.len() as u64;

        self.res_process_body_data(index, data)?;

        if self.res.remaining == 0 {
            self.res.set_state(ResponseState::BodyChunkedDataEnd);
        }

        Ok(Step::Continue)
    }

    fn res_body_chunked_data_end(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.res.tx_index()?;

        while let Some(b) = input.next_byte() {
            let tx = tx_mut(&mut self.conn, index)?;
            tx.response_message_len += 1;

            if b == LF {
                self.res.set_state(ResponseState::BodyChunkedLength);
                return Ok(Step::Continue);
            }
        }

        if self.res.is_closed() {
            return self.res_body_truncated(index);
        }
        Ok(Step::NeedData)
    }

    fn res_body_identity_cl_known(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.res.tx_index()?;

        let data = input.take(self.res.remaining);
        if data.is_empty() {
            if self.res.is_closed() {
                return self.res_body_truncated(index);
            }
            return Ok(Step::NeedData);
        }
        self.res.remaining -= data.len() as u64;

        self.res_process_body_data(index, data)?;

        if self.res.remaining == 0 {
            self.res.set_state(ResponseState::Finalize);
        }

        Ok(Step::Continue)
    }

    fn res_body_identity_stream_close(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.res.tx_index()?;

        let data = input.take_all();
        if !data.is_empty() {
            self.res_process_body_data(index, data)?;
        }

        if self.res.is_closed() {
            self.res.set_state(ResponseState::Finalize);
            return Ok(Step::Continue);
        }

        Ok(Step::NeedData)
    }

    /// The connection closed before the body was complete. Keep what arrived.
    fn res_body_truncated(&mut self, index: usize) -> Result<Step, Halt> {
        htp_log!(self, Warning, Some(index), "Response body truncated by close");
        self.res.set_state(ResponseState::Finalize);
        Ok(Step::Continue)
    }

    fn res_finalize(&mut self) -> Result<Step, Halt> {
        let index = self.res.tx_index()?;

        let Some(tx) = self.conn.tx_mut(index) else {
            // Destroyed while we were yielding.
            self.res.tx = None;
            self.res.set_state(ResponseState::Idle);
            return Ok(Step::Continue);
        };

        if tx.response_progress != ResponseProgress::Complete {
            // Framed for a body, even an empty one.
            let has_body = !matches!(
                tx.response_transfer_coding,
                TransferCoding::NoBody | TransferCoding::Unknown
            );
            tx.response_progress = ResponseProgress::Complete;
            if has_body {
                self.res_flush_body(index)?;
            }
            self.run_hook(index, TxHook::ResponseComplete)?;
        }

        if self.req.status == StreamState::DataOther && self.req.tx == self.res.tx {
            return Ok(Step::Yield);
        }

        if self.out_data_other_at_tx_end {
            self.out_data_other_at_tx_end = false;
            return Ok(Step::Yield);
        }

        self.res.tx = None;
        self.res.set_state(ResponseState::Idle);

        self.finalize_tx(index)?;

        Ok(Step::Continue)
    }
}

fn contains_nocase(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle))
}
