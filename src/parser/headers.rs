//! Header blocks, for both directions and for chunked trailers.
//!
//! A header is only parsed once the next line shows it isn't folded any further, so the result
//! doesn't depend on where the input was split.

use super::generic::parse_header;
use super::{tx_mut, ConnectionParser, Halt};
use crate::transaction::{Flag, HeaderLine};
use crate::util::{chomp, is_line_empty, is_line_folded, is_line_whitespace};
use crate::Direction;

/// A header line plus any folded lines seen after it.
#[derive(Debug)]
pub(crate) struct PendingHeader {
    data: Vec<u8>,
    /// Indices into the transaction's raw header lines.
    lines: Vec<usize>,
    folded: bool,
}

impl PendingHeader {
    fn new(data: &[u8]) -> Self {
        PendingHeader {
            data: data.to_vec(),
            lines: Vec::new(),
            folded: false,
        }
    }
}

impl ConnectionParser {
    /// Handle one complete line of a header block.
    ///
    /// Returns true when the line terminated the block. Any pending header has then been
    /// processed.
    pub(crate) fn header_line(
        &mut self,
        direction: Direction,
        index: usize,
        line: Vec<u8>,
    ) -> Result<bool, Halt> {
        self.check_line_length(index, &line)?;

        let terminator = is_line_empty(&line)
            || (self.cfg.whitespace_line_terminates_headers && is_line_whitespace(&line));
        if terminator {
            self.flush_header(direction, index)?;
            return Ok(true);
        }

        let data = chomp(&line);
        let mut header_line = HeaderLine::new(data.to_vec());
        let pending = self.pending_mut(direction).take();

        let mut pending = if is_line_folded(&line) {
            header_line.flags |= Flag::FieldFolded;
            match pending {
                Some(mut p) => {
                    p.data.extend_from_slice(data);
                    p.folded = true;
                    p
                }
                None => {
                    // Nothing to fold into. Keep it as a header of its own.
                    if self.set_tx_flag_once(index, Flag::InvalidFolding)? {
                        htp_log!(self, Warning, Some(index), "Invalid {:?} field folding", direction);
                    }
                    PendingHeader::new(data)
                }
            }
        } else {
            if let Some(p) = pending {
                self.process_header(direction, index, p)?;
            }
            PendingHeader::new(data)
        };

        if header_line.nul_count() > 0 && self.set_tx_flag_once(index, Flag::FieldRawNul)? {
            htp_log!(self, Warning, Some(index), "{:?} header line contains NUL", direction);
        }

        let tx = tx_mut(&mut self.conn, index)?;
        let (lines, _) = tx.header_parts_mut(direction);
        lines.push(header_line);
        pending.lines.push(lines.len() - 1);

        *self.pending_mut(direction) = Some(pending);

        Ok(false)
    }

    /// Process the header waiting for folded lines, if any.
    pub(crate) fn flush_header(&mut self, direction: Direction, index: usize) -> Result<(), Halt> {
        match self.pending_mut(direction).take() {
            Some(p) => self.process_header(direction, index, p),
            None => Ok(()),
        }
    }

    fn process_header(
        &mut self,
        direction: Direction,
        index: usize,
        pending: PendingHeader,
    ) -> Result<(), Halt> {
        let mut header = parse_header(direction, &pending.data);
        if pending.folded {
            header.flags |= Flag::FieldFolded;
        }
        let header_flags = header.flags;

        let mut warnings = Vec::new();
        if header_flags.contains(Flag::FieldUnparseable)
            && self.set_tx_flag_once(index, Flag::FieldUnparseable)?
        {
            warnings.push("field invalid: colon missing");
        }
        if header_flags.contains(Flag::FieldInvalid)
            && self.set_tx_flag_once(index, Flag::FieldInvalid)?
        {
            warnings.push("field invalid");
        }

        let tx = tx_mut(&mut self.conn, index)?;
        let (lines, headers) = tx.header_parts_mut(direction);
        let (header_index, repeated) = headers.add(header);
        for i in &pending.lines {
            if let Some(line) = lines.get_mut(*i) {
                line.header = Some(header_index);
                line.flags |= header_flags;
            }
        }

        if repeated && self.set_tx_flag_once(index, Flag::FieldRepeated)? {
            warnings.push("header repetition");
        }

        for w in warnings {
            htp_log!(self, Warning, Some(index), "{:?} {}", direction, w);
        }

        Ok(())
    }

    /// Flag a line over the soft limit. It is kept whole.
    pub(crate) fn check_line_length(&mut self, index: usize, line: &[u8]) -> Result<(), Halt> {
        if line.len() > self.cfg.field_limit_soft
            && self.set_tx_flag_once(index, Flag::FieldLong)?
        {
            htp_log!(
                self,
                Warning,
                Some(index),
                "Line longer than the soft limit of {}",
                self.cfg.field_limit_soft
            );
        }
        Ok(())
    }

    /// Set a transaction flag. True if it wasn't already set.
    pub(crate) fn set_tx_flag_once(&mut self, index: usize, flag: Flag) -> Result<bool, Halt> {
        let tx = tx_mut(&mut self.conn, index)?;
        let first = !tx.flags.contains(flag);
        tx.flags |= flag;
        Ok(first)
    }

    fn pending_mut(&mut self, direction: Direction) -> &mut Option<PendingHeader> {
        match direction {
            Direction::Request => &mut self.req.header,
            Direction::Response => &mut self.res.header,
        }
    }
}
