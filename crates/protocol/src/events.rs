//! Streaming decode of a field stream
//!
//! [`Decoder`] turns a body into a flat sequence of typed [`Event`]s, with
//! explicit `BeginGroup` / `EndGroup` markers for nested fields. [`Cursor`]
//! adds one event of lookahead plus the "take this field if it has the
//! expected kind" helpers that reply parsing is written against.

use crate::error::{ProtocolError, Result};
use crate::field::{FIELD_HEADER_SIZE, FieldKind, GroupKind};

/// One decoded field (or group boundary)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    /// Integer field, sign-extended from its wire width
    Scalar(i64),
    /// Octet field
    Text(&'a [u8]),
    /// Raw field
    Bytes(&'a [u8]),
    /// Start of a Structure or Sequence; its fields follow
    BeginGroup(GroupKind),
    /// End of the innermost open group
    EndGroup,
}

impl Event<'_> {
    pub fn is_group_start(&self) -> bool {
        matches!(self, Event::BeginGroup(_))
    }
}

/// Iterator of [`Event`]s over a body
///
/// After the first error the decoder is fused and yields `None`.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    /// End offsets of the currently open groups, innermost last
    ends: Vec<usize>,
    failed: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            ends: Vec::new(),
            failed: false,
        }
    }

    /// Current nesting depth (0 = top level)
    pub fn depth(&self) -> usize {
        self.ends.len()
    }

    /// Byte offset of the next field header
    pub fn position(&self) -> usize {
        self.pos
    }

    fn limit(&self) -> usize {
        self.ends.last().copied().unwrap_or(self.buf.len())
    }

    fn decode_next(&mut self) -> Result<Option<Event<'a>>> {
        if let Some(&end) = self.ends.last() {
            if self.pos == end {
                self.ends.pop();
                return Ok(Some(Event::EndGroup));
            }
        } else if self.pos == self.buf.len() {
            return Ok(None);
        }

        let limit = self.limit();
        let available = limit - self.pos;
        if available < FIELD_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                offset: self.pos,
                needed: FIELD_HEADER_SIZE,
                available,
            });
        }

        let header = &self.buf[self.pos..self.pos + FIELD_HEADER_SIZE];
        let kind = FieldKind::from_u8(header[0])?;
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

        let value_start = self.pos + FIELD_HEADER_SIZE;
        if len > limit - value_start {
            return Err(ProtocolError::Truncated {
                offset: self.pos,
                needed: FIELD_HEADER_SIZE + len,
                available,
            });
        }
        let value_end = value_start + len;

        let event = match kind {
            FieldKind::Integer => {
                self.pos = value_end;
                Event::Scalar(decode_integer(&self.buf[value_start..value_end])?)
            }
            FieldKind::Octet => {
                self.pos = value_end;
                Event::Text(&self.buf[value_start..value_end])
            }
            FieldKind::Raw => {
                self.pos = value_end;
                Event::Bytes(&self.buf[value_start..value_end])
            }
            FieldKind::Structure | FieldKind::Sequence => {
                self.pos = value_start;
                self.ends.push(value_end);
                Event::BeginGroup(if kind == FieldKind::Structure {
                    GroupKind::Structure
                } else {
                    GroupKind::Sequence
                })
            }
        };
        Ok(Some(event))
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<Event<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.decode_next() {
            Ok(event) => event.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode a big-endian two's complement integer of 1 to 8 bytes
pub fn decode_integer(value: &[u8]) -> Result<i64> {
    if value.is_empty() || value.len() > 8 {
        return Err(ProtocolError::InvalidIntegerWidth(value.len()));
    }
    let fill = if value[0] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut wide = [fill; 8];
    wide[8 - value.len()..].copy_from_slice(value);
    Ok(i64::from_be_bytes(wide))
}

/// Decoder with one event of lookahead
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    decoder: Decoder<'a>,
    peeked: Option<Option<Event<'a>>>,
}

impl<'a> Cursor<'a> {
    /// Begin decoding a body
    pub fn new(body: &'a [u8]) -> Self {
        Self {
            decoder: Decoder::new(body),
            peeked: None,
        }
    }

    /// Look at the next event without consuming it
    pub fn peek(&mut self) -> Result<Option<&Event<'a>>> {
        if self.peeked.is_none() {
            let next = self.decoder.next().transpose()?;
            self.peeked = Some(next);
        }
        Ok(self.peeked.as_ref().and_then(|e| e.as_ref()))
    }

    /// Consume the next event
    pub fn next_event(&mut self) -> Result<Option<Event<'a>>> {
        match self.peeked.take() {
            Some(event) => Ok(event),
            None => self.decoder.next().transpose(),
        }
    }

    /// Consume the next field if it is an Integer
    pub fn take_scalar(&mut self) -> Result<Option<i64>> {
        match self.peek()? {
            Some(Event::Scalar(value)) => {
                let value = *value;
                self.peeked = None;
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }

    /// Consume the next field if it is an Octet
    pub fn take_text(&mut self) -> Result<Option<&'a [u8]>> {
        match self.peek()? {
            Some(Event::Text(value)) => {
                let value = *value;
                self.peeked = None;
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }

    /// Consume the next field if it is a Raw field
    pub fn take_bytes(&mut self) -> Result<Option<&'a [u8]>> {
        match self.peek()? {
            Some(Event::Bytes(value)) => {
                let value = *value;
                self.peeked = None;
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }

    /// Consume the next field if it carries a byte payload (Octet or Raw)
    pub fn take_payload(&mut self) -> Result<Option<&'a [u8]>> {
        match self.peek()? {
            Some(Event::Text(value) | Event::Bytes(value)) => {
                let value = *value;
                self.peeked = None;
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }

    /// Enter the next field if it is a group
    pub fn enter_group(&mut self) -> Result<Option<GroupKind>> {
        match self.peek()? {
            Some(Event::BeginGroup(kind)) => {
                let kind = *kind;
                self.peeked = None;
                Ok(Some(kind))
            }
            _ => Ok(None),
        }
    }

    /// Skip whatever is left of the current group, including its `EndGroup`
    ///
    /// Returns the number of skipped fields (nested groups count as one).
    pub fn skip_rest_of_group(&mut self) -> Result<usize> {
        let mut skipped = 0;
        let mut depth = 0usize;
        loop {
            match self.next_event()? {
                Some(Event::EndGroup) if depth == 0 => return Ok(skipped),
                Some(Event::EndGroup) => depth -= 1,
                Some(Event::BeginGroup(_)) => {
                    if depth == 0 {
                        skipped += 1;
                    }
                    depth += 1;
                }
                Some(_) => {
                    if depth == 0 {
                        skipped += 1;
                    }
                }
                None => return Ok(skipped),
            }
        }
    }

    /// Whether the stream has no further events
    pub fn is_exhausted(&mut self) -> Result<bool> {
        Ok(self.peek()?.is_none())
    }

    pub fn depth(&self) -> usize {
        self.decoder.depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldWriter;

    fn nested_body() -> bytes::Bytes {
        let mut w = FieldWriter::new();
        w.integer(3)
            .structure(|w| {
                w.text("bus0").integer(1).sequence(|w| {
                    w.raw(&[1, 2, 3]);
                });
            })
            .integer(-2);
        w.finish().unwrap()
    }

    #[test]
    fn test_event_sequence() {
        let body = nested_body();
        let events: Vec<Event> = Decoder::new(&body).collect::<Result<_>>().unwrap();
        assert_eq!(
            events,
            vec![
                Event::Scalar(3),
                Event::BeginGroup(GroupKind::Structure),
                Event::Text(b"bus0"),
                Event::Scalar(1),
                Event::BeginGroup(GroupKind::Sequence),
                Event::Bytes(&[1, 2, 3]),
                Event::EndGroup,
                Event::EndGroup,
                Event::Scalar(-2),
            ]
        );
    }

    #[test]
    fn test_decode_integer_widths() {
        assert_eq!(decode_integer(&[0x05]).unwrap(), 5);
        assert_eq!(decode_integer(&[0xff]).unwrap(), -1);
        assert_eq!(decode_integer(&[0x12, 0x34]).unwrap(), 0x1234);
        assert_eq!(decode_integer(&[0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]).unwrap(), 0xffff_ffff);
        assert!(decode_integer(&[]).is_err());
        assert!(decode_integer(&[0; 9]).is_err());
    }

    #[test]
    fn test_truncated_value_fuses_decoder() {
        // Raw field claiming 10 bytes with only 2 present
        let body = [0x05, 0, 0, 0, 10, 0xaa, 0xbb];
        let mut decoder = Decoder::new(&body);
        assert!(matches!(
            decoder.next(),
            Some(Err(ProtocolError::Truncated { offset: 0, .. }))
        ));
        assert!(decoder.next().is_none());
    }

    #[test]
    fn test_child_cannot_overrun_parent() {
        // Structure of length 6 containing a Raw field claiming 4 bytes
        let body = [0x31, 0, 0, 0, 6, 0x05, 0, 0, 0, 4, 0xaa, 0xbb, 0xcc, 0xdd];
        let mut decoder = Decoder::new(&body);
        assert!(matches!(decoder.next(), Some(Ok(Event::BeginGroup(_)))));
        assert!(matches!(decoder.next(), Some(Err(ProtocolError::Truncated { .. }))));
    }

    #[test]
    fn test_unknown_kind() {
        let body = [0x7e, 0, 0, 0, 0];
        let mut decoder = Decoder::new(&body);
        assert!(matches!(
            decoder.next(),
            Some(Err(ProtocolError::UnknownFieldKind(0x7e)))
        ));
    }

    #[test]
    fn test_cursor_take_helpers() {
        let body = nested_body();
        let mut cursor = Cursor::new(&body);

        assert_eq!(cursor.take_text().unwrap(), None);
        assert_eq!(cursor.take_scalar().unwrap(), Some(3));
        assert_eq!(cursor.enter_group().unwrap(), Some(GroupKind::Structure));
        assert_eq!(cursor.depth(), 1);
        assert_eq!(cursor.take_text().unwrap(), Some(&b"bus0"[..]));
        assert_eq!(cursor.take_scalar().unwrap(), Some(1));
        assert_eq!(cursor.skip_rest_of_group().unwrap(), 1);
        assert_eq!(cursor.take_scalar().unwrap(), Some(-2));
        assert!(cursor.is_exhausted().unwrap());
    }

    #[test]
    fn test_take_payload_accepts_octet_and_raw() {
        let mut w = FieldWriter::new();
        w.octet(b"abc").raw(b"def");
        let body = w.finish().unwrap();
        let mut cursor = Cursor::new(&body);
        assert_eq!(cursor.take_payload().unwrap(), Some(&b"abc"[..]));
        assert_eq!(cursor.take_payload().unwrap(), Some(&b"def"[..]));
        assert_eq!(cursor.take_payload().unwrap(), None);
    }
}
