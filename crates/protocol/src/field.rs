//! Field kinds and the field stream writer
//!
//! Every message body is a flat stream of self-describing fields:
//!
//! ```text
//! [kind: u8][length: u32 (big-endian)][value: length bytes]
//! ```
//!
//! Group fields (Structure, Sequence) carry a nested field stream as their
//! value, so arbitrarily deep trees encode without any out-of-band schema.

use crate::error::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of a field header: kind tag plus 32-bit length
pub const FIELD_HEADER_SIZE: usize = 5;

/// Field kind tags as they appear on the wire
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Big-endian two's complement integer, 1 to 8 bytes
    Integer = 0x02,
    /// Length-prefixed text (also used for transfer payloads)
    Octet = 0x04,
    /// Length-prefixed opaque bytes (descriptor records)
    Raw = 0x05,
    /// Repeated group
    Sequence = 0x30,
    /// Nested ordered group
    Structure = 0x31,
}

impl FieldKind {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x02 => Ok(Self::Integer),
            0x04 => Ok(Self::Octet),
            0x05 => Ok(Self::Raw),
            0x30 => Ok(Self::Sequence),
            0x31 => Ok(Self::Structure),
            other => Err(ProtocolError::UnknownFieldKind(other)),
        }
    }

    /// Whether the value of this field is a nested field stream
    pub fn is_group(self) -> bool {
        matches!(self, Self::Sequence | Self::Structure)
    }
}

/// The two group flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    Structure,
    Sequence,
}

impl From<GroupKind> for FieldKind {
    fn from(kind: GroupKind) -> Self {
        match kind {
            GroupKind::Structure => FieldKind::Structure,
            GroupKind::Sequence => FieldKind::Sequence,
        }
    }
}

/// Builder for a field stream
///
/// Writes never fail individually; a value too long for the 32-bit length
/// prefix is remembered and reported by [`FieldWriter::finish`].
///
/// # Example
/// ```
/// use protocol::FieldWriter;
///
/// let mut w = FieldWriter::new();
/// w.integer(7).structure(|w| {
///     w.text("bus0").integer(1);
/// });
/// let body = w.finish().unwrap();
/// assert_eq!(body[0], 0x02);
/// ```
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: BytesMut,
    oversized: Option<usize>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            oversized: None,
        }
    }

    /// Append an Integer field
    ///
    /// Values that fit in `i32` are written with 4 bytes, others with 8.
    pub fn integer(&mut self, value: i64) -> &mut Self {
        match i32::try_from(value) {
            Ok(narrow) => {
                self.header(FieldKind::Integer, 4);
                self.buf.put_i32(narrow);
            }
            Err(_) => {
                self.header(FieldKind::Integer, 8);
                self.buf.put_i64(value);
            }
        }
        self
    }

    /// Append an Octet field
    pub fn octet(&mut self, value: &[u8]) -> &mut Self {
        self.header(FieldKind::Octet, value.len());
        self.buf.put_slice(value);
        self
    }

    /// Append an Octet field holding UTF-8 text
    pub fn text(&mut self, value: &str) -> &mut Self {
        self.octet(value.as_bytes())
    }

    /// Append a Raw field
    pub fn raw(&mut self, value: &[u8]) -> &mut Self {
        self.header(FieldKind::Raw, value.len());
        self.buf.put_slice(value);
        self
    }

    /// Append a group whose nested fields are written by `build`
    pub fn group(&mut self, kind: GroupKind, build: impl FnOnce(&mut FieldWriter)) -> &mut Self {
        let start = self.buf.len();
        self.buf.put_u8(FieldKind::from(kind) as u8);
        self.buf.put_u32(0);

        build(self);

        let len = self.buf.len() - start - FIELD_HEADER_SIZE;
        match u32::try_from(len) {
            Ok(len) => self.buf[start + 1..start + FIELD_HEADER_SIZE]
                .copy_from_slice(&len.to_be_bytes()),
            Err(_) => {
                self.oversized.get_or_insert(len);
            }
        }
        self
    }

    pub fn structure(&mut self, build: impl FnOnce(&mut FieldWriter)) -> &mut Self {
        self.group(GroupKind::Structure, build)
    }

    pub fn sequence(&mut self, build: impl FnOnce(&mut FieldWriter)) -> &mut Self {
        self.group(GroupKind::Sequence, build)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish the stream and return the encoded bytes
    pub fn finish(self) -> Result<Bytes> {
        if let Some(size) = self.oversized {
            return Err(ProtocolError::FieldTooLarge { size });
        }
        Ok(self.buf.freeze())
    }

    fn header(&mut self, kind: FieldKind, len: usize) {
        let wire_len = match u32::try_from(len) {
            Ok(len) => len,
            Err(_) => {
                self.oversized.get_or_insert(len);
                u32::MAX
            }
        };
        self.buf.put_u8(kind as u8);
        self.buf.put_u32(wire_len);
    }
}
