//! Request side state machine.

use http::{header, Method};

use super::generic::parse_request_line;
use super::{tx_mut, ConnectionParser, Halt, Input, Step, StreamState};
use crate::connection::ConnectionFlag;
use crate::hook::TxHook;
use crate::transaction::{Flag, Protocol, RequestProgress, ResponseProgress, TransferCoding};
use crate::util::{
    chomp, parse_chunked_length, parse_content_length, parse_content_type, parse_hostport,
    parse_protocol, uri_authority, LF,
};
use crate::Direction;

/// Where the request side is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Between requests.
    Idle,
    Line,
    Protocol,
    Headers,
    ConnectCheck,
    /// A CONNECT waits for its response before anything else is parsed.
    ConnectWaitResponse,
    BodyDetermine,
    BodyChunkedLength,
    BodyChunkedData,
    /// The line ending after chunk data.
    BodyChunkedDataEnd,
    BodyIdentity,
    Finalize,
    /// An HTTP/0.9 request has no end; anything after it is ignored.
    IgnoreDataAfterHttp09,
}

impl ConnectionParser {
    pub(crate) fn req_step(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        match self.req.state {
            RequestState::Idle => self.req_idle(input),
            RequestState::Line => self.req_line(input),
            RequestState::Protocol => self.req_protocol(),
            RequestState::Headers => self.req_headers(input),
            RequestState::ConnectCheck => self.req_connect_check(),
            RequestState::ConnectWaitResponse => self.req_connect_wait_response(),
            RequestState::BodyDetermine => self.req_body_determine(),
            RequestState::BodyChunkedLength => self.req_body_chunked_length(input),
            RequestState::BodyChunkedData => self.req_body_chunked_data(input),
            RequestState::BodyChunkedDataEnd => self.req_body_chunked_data_end(input),
            RequestState::BodyIdentity => self.req_body_identity(input),
            RequestState::Finalize => self.req_finalize(),
            RequestState::IgnoreDataAfterHttp09 => self.req_ignore_data_after_http_0_9(input),
        }
    }

    fn req_idle(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        // Don't start a transaction before there is at least one byte of it.
        if input.peek_byte().is_none() {
            return Ok(Step::NeedData);
        }

        if self.conn.tx_count() > self.out_next_tx_index {
            self.conn.flags.insert(ConnectionFlag::Pipelined);
        }

        let index = self.conn.create_tx();
        self.req.tx = Some(index);
        debug!("Request start, transaction {}", index);

        let tx = tx_mut(&mut self.conn, index)?;
        tx.request_timestamp = self.req.timestamp;
        tx.request_progress = RequestProgress::Line;

        self.run_hook(index, TxHook::RequestStart)?;

        self.req.set_state(RequestState::Line);
        Ok(Step::Continue)
    }

    fn req_line(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.req.tx_index()?;

        if !self.req.read_line(input, self.cfg.field_limit_hard)? {
            return Ok(Step::NeedData);
        }
        let line = self.req.take_line();

        if chomp(&line).is_empty() {
            let tx = tx_mut(&mut self.conn, index)?;
            tx.request_ignored_lines += 1;
            return Ok(Step::Continue);
        }

        self.check_line_length(index, &line)?;

        let nul_count = memchr::memchr_iter(0, &line).count();
        let first_nul = memchr::memchr(0, &line);

        let mut data = line.as_slice();
        if self.cfg.nul_terminates_request_line {
            if let Some(nul) = first_nul {
                data = &data[..nul];
            }
        }
        let data = chomp(data);

        let parsed = parse_request_line(data, self.cfg.leading_whitespace_in_method);
        let keep_leading_whitespace = self.cfg.leading_whitespace_in_method;

        let tx = tx_mut(&mut self.conn, index)?;
        tx.request_line = Some(data.to_vec());
        tx.request_line_nul = nul_count;
        tx.request_line_nul_offset = first_nul;
        tx.request_method = Some(parsed.method.to_vec());
        tx.request_method_number = known_method(parsed.method);
        tx.request_uri = parsed.uri.map(<[u8]>::to_vec);
        tx.request_protocol = parsed.protocol.map(<[u8]>::to_vec);
        tx.request_protocol_number = match parsed.protocol {
            Some(p) => parse_protocol(p),
            None => {
                tx.is_protocol_0_9 = true;
                Protocol::V0_9
            }
        };
        if parsed.leading_whitespace && keep_leading_whitespace {
            tx.response_status_expected_number = Some(400);
        }

        let unknown_method = tx.request_method_number.is_none();
        let missing = match (parsed.uri, parsed.protocol) {
            (None, _) => Some("unknown method only"),
            (Some(_), None) => Some("unknown method and no protocol"),
            (Some(_), Some(_)) if tx.request_protocol_number == Protocol::Invalid => {
                Some("unknown method and invalid protocol")
            }
            _ => None,
        };

        for w in &parsed.warnings {
            htp_log!(self, Warning, Some(index), "{}", w);
        }
        if nul_count > 0 {
            htp_log!(self, Warning, Some(index), "Request line: contains NUL");
        }
        if let Some(m) = missing.filter(|_| unknown_method) {
            htp_log!(self, Warning, Some(index), "Request line: {}", m);
        }

        self.run_hook(index, TxHook::RequestLine)?;

        self.req.set_state(RequestState::Protocol);
        Ok(Step::Continue)
    }

    fn req_protocol(&mut self) -> Result<Step, Halt> {
        let index = self.req.tx_index()?;
        let tx = tx_mut(&mut self.conn, index)?;

        if tx.is_protocol_0_9 {
            // No headers and no body.
            self.req.set_state(RequestState::Finalize);
        } else {
            tx.request_progress = RequestProgress::Headers;
            self.req.set_state(RequestState::Headers);
        }

        Ok(Step::Continue)
    }

    fn req_headers(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.req.tx_index()?;

        if !self.req.read_line(input, self.cfg.field_limit_hard)? {
            return Ok(Step::NeedData);
        }
        let line = self.req.take_line();

        if !self.header_line(Direction::Request, index, line)? {
            return Ok(Step::Continue);
        }

        let tx = tx_mut(&mut self.conn, index)?;
        if tx.request_progress == RequestProgress::Trailer {
            self.run_hook(index, TxHook::RequestTrailer)?;
            self.req.set_state(RequestState::Finalize);
        } else {
            self.req_process_headers(index)?;
            self.req.set_state(RequestState::ConnectCheck);
        }

        Ok(Step::Continue)
    }

    /// Resolve the body length and host, then run the request headers hook.
    fn req_process_headers(&mut self, index: usize) -> Result<(), Halt> {
        let mut warnings = Vec::new();
        let tx = tx_mut(&mut self.conn, index)?;

        let te = tx.request_headers.get(header::TRANSFER_ENCODING).cloned();
        let cl = tx.request_headers.get(header::CONTENT_LENGTH).cloned();

        if let Some(te) = te {
            if !te.value.eq_ignore_ascii_case(b"chunked") {
                tx.request_transfer_coding = TransferCoding::Invalid;
                tx.flags |= Flag::RequestInvalidTE | Flag::RequestInvalid;
                warnings.push("Request transfer-encoding invalid");
            } else {
                // Chunked before HTTP/1.1 is a smuggling vector.
                if tx.request_protocol_number < Protocol::V1_1 {
                    tx.flags |= Flag::RequestInvalidTE | Flag::RequestSmuggling;
                    warnings.push("Request chunked transfer-encoding on HTTP/1.0 or older");
                }
                tx.request_transfer_coding = TransferCoding::Chunked;
                if cl.is_some() {
                    tx.flags |= Flag::RequestSmuggling;
                    warnings.push("Request has both content-length and transfer-encoding");
                }
            }
        } else if let Some(cl) = cl {
            if cl
                .flags
                .intersects(Flag::FieldFolded | Flag::FieldRepeated)
            {
                tx.flags |= Flag::RequestSmuggling;
                warnings.push("Request content-length folded or repeated");
            }
            match parse_content_length(&cl.value) {
                Some(len) => {
                    tx.request_transfer_coding = TransferCoding::Identity;
                    tx.request_content_length = Some(len);
                }
                None => {
                    tx.request_transfer_coding = TransferCoding::Invalid;
                    tx.flags |= Flag::RequestInvalidCL | Flag::RequestInvalid;
                    warnings.push("Request content-length invalid");
                }
            }
        } else {
            tx.request_transfer_coding = TransferCoding::NoBody;
        }

        // Host from the URI wins over the Host header.
        let mut uri_port = None;
        if let Some(authority) = tx.request_uri.as_deref().and_then(uri_authority) {
            let (host, port) = parse_hostport(authority);
            tx.request_hostname = Some(host);
            match port {
                Ok(p) => uri_port = p,
                Err(()) => warnings.push("Request URI has an invalid port"),
            }
            tx.request_port_number = uri_port;
        }

        match tx.request_headers.get(header::HOST) {
            None => {
                if tx.request_protocol_number >= Protocol::V1_1 {
                    tx.flags |= Flag::HostMissing;
                    warnings.push("Request host information missing");
                }
            }
            Some(h) => {
                let (host, port) = parse_hostport(&h.value);
                let port = match port {
                    Ok(p) => p,
                    Err(()) => {
                        warnings.push("Request Host header has an invalid port");
                        None
                    }
                };
                match &tx.request_hostname {
                    None => {
                        tx.request_hostname = Some(host);
                        tx.request_port_number = port;
                    }
                    Some(uri_host) => {
                        let host_differs = !uri_host.eq_ignore_ascii_case(&host);
                        let port_differs = matches!((uri_port, port), (Some(a), Some(b)) if a != b);
                        if host_differs || port_differs {
                            tx.flags |= Flag::HostAmbiguous;
                            warnings.push("Request host ambiguous");
                        }
                    }
                }
            }
        }

        if let Some(ct) = tx.request_headers.get(header::CONTENT_TYPE) {
            tx.request_content_type = Some(parse_content_type(&ct.value));
        }

        for w in warnings {
            htp_log!(self, Warning, Some(index), "{}", w);
        }

        self.run_hook(index, TxHook::RequestHeaders)
    }

    fn req_connect_check(&mut self) -> Result<Step, Halt> {
        let index = self.req.tx_index()?;
        let tx = tx_mut(&mut self.conn, index)?;

        if tx.request_method_number == Some(Method::CONNECT) {
            // Whatever follows may be tunneled, so wait for the response.
            self.req.set_state(RequestState::ConnectWaitResponse);
            self.req.status = StreamState::DataOther;
            return Ok(Step::Yield);
        }

        self.req.set_state(RequestState::BodyDetermine);
        Ok(Step::Continue)
    }

    fn req_connect_wait_response(&mut self) -> Result<Step, Halt> {
        let index = self.req.tx_index()?;
        let tx = tx_mut(&mut self.conn, index)?;

        if tx.response_progress <= ResponseProgress::Headers {
            return Ok(Step::Yield);
        }

        // The CONNECT failed (success switches to tunnel from the response side).
        if self.req.status == StreamState::DataOther {
            self.req.status = StreamState::Data;
        }
        self.req.set_state(RequestState::Finalize);
        Ok(Step::Continue)
    }

    fn req_body_determine(&mut self) -> Result<Step, Halt> {
        let index = self.req.tx_index()?;
        let tx = tx_mut(&mut self.conn, index)?;

        match tx.request_transfer_coding {
            TransferCoding::Chunked => {
                tx.request_progress = RequestProgress::Body;
                self.req.set_state(RequestState::BodyChunkedLength);
            }
            TransferCoding::Identity => {
                let len = tx.request_content_length.unwrap_or(0);
                self.req.remaining = len;
                if len > 0 {
                    tx.request_progress = RequestProgress::Body;
                    self.req.set_state(RequestState::BodyIdentity);
                } else {
                    self.req.set_state(RequestState::Finalize);
                }
            }
            TransferCoding::NoBody => {
                self.req.set_state(RequestState::Finalize);
            }
            TransferCoding::Unknown | TransferCoding::Invalid => {
                return Err(crate::Error::InvalidRequestBody.into());
            }
        }

        Ok(Step::Continue)
    }

    fn req_body_chunked_length(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.req.tx_index()?;

        if !self.req.read_line(input, self.cfg.field_limit_hard)? {
            if self.req.is_closed() {
                return self.req_body_truncated(index);
            }
            return Ok(Step::NeedData);
        }
        let line = self.req.take_line();

        let tx = tx_mut(&mut self.conn, index)?;
        tx.request_message_len += line.len() as u64;

        let len = parse_chunked_length(&line)?;
        self.req.remaining = len;

        if len > 0 {
            self.req.set_state(RequestState::BodyChunkedData);
        } else {
            // Last chunk, trailer headers follow.
            tx.request_progress = RequestProgress::Trailer;
            self.req.set_state(RequestState::Headers);
        }

        Ok(Step::Continue)
    }

    fn req_body_chunked_data(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.req.tx_index()?;

        let data = input.take(self.req.remaining);
        if data.is_empty() {
            if self.req.is_closed() {
                return self.req_body_truncated(index);
            }
            return Ok(Step::NeedData);
        }
        self.req.remaining -= data.len() as u64;

        self.req_process_body_data(index, data)?;

        if self.req.remaining == 0 {
            self.req.set_state(RequestState::BodyChunkedDataEnd);
        }

        Ok(Step::Continue)
    }

    fn req_body_chunked_data_end(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.req.tx_index()?;

        // Anything up to the LF belongs to the chunk framing.
        while let Some(b) = input.next_byte() {
            let tx = tx_mut(&mut self.conn, index)?;
            tx.request_message_len += 1;

            if b == LF {
                self.req.set_state(RequestState::BodyChunkedLength);
                return Ok(Step::Continue);
            }
        }

        if self.req.is_closed() {
            return self.req_body_truncated(index);
        }
        Ok(Step::NeedData)
    }

    fn req_body_identity(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let index = self.req.tx_index()?;

        let data = input.take(self.req.remaining);
        if data.is_empty() {
            if self.req.is_closed() {
                return self.req_body_truncated(index);
            }
            return Ok(Step::NeedData);
        }
        self.req.remaining -= data.len() as u64;

        self.req_process_body_data(index, data)?;

        if self.req.remaining == 0 {
            self.req.set_state(RequestState::Finalize);
        }

        Ok(Step::Continue)
    }

    /// The connection closed before the body was complete. Keep what arrived.
    fn req_body_truncated(&mut self, index: usize) -> Result<Step, Halt> {
        htp_log!(self, Warning, Some(index), "Request body truncated by close");
        self.req.set_state(RequestState::Finalize);
        Ok(Step::Continue)
    }

    fn req_finalize(&mut self) -> Result<Step, Halt> {
        let index = self.req.tx_index()?;
        let tx = tx_mut(&mut self.conn, index)?;

        let is_protocol_0_9 = tx.is_protocol_0_9;

        if tx.request_progress != RequestProgress::Complete {
            let has_body = tx.has_request_body();
            if has_body {
                self.req_flush_body(index)?;
            }
            let tx = tx_mut(&mut self.conn, index)?;
            tx.request_progress = RequestProgress::Complete;
            self.run_hook(index, TxHook::RequestComplete)?;
        }

        self.req.tx = None;
        if is_protocol_0_9 {
            self.req.set_state(RequestState::IgnoreDataAfterHttp09);
        } else {
            self.req.set_state(RequestState::Idle);
        }

        self.finalize_tx(index)?;

        Ok(Step::Continue)
    }

    fn req_ignore_data_after_http_0_9(&mut self, input: &mut Input<'_>) -> Result<Step, Halt> {
        let data = input.take_all();

        if !data.is_empty() && !self.conn.flags.contains(ConnectionFlag::Http09Extra) {
            self.conn.flags.insert(ConnectionFlag::Http09Extra);
            htp_log!(self, Warning, None, "Request data after HTTP/0.9 request ignored");
        }

        Ok(Step::NeedData)
    }
}

/// Standard methods only. Extension methods are recorded raw and count as unknown.
fn known_method(method: &[u8]) -> Option<Method> {
    let m = Method::from_bytes(method).ok()?;
    let known = [
        Method::GET,
        Method::HEAD,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::CONNECT,
        Method::OPTIONS,
        Method::TRACE,
        Method::PATCH,
    ];
    known.contains(&m).then_some(m)
}
