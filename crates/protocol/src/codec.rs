//! Frame encoding and decoding
//!
//! Every request and reply on the control channel is one frame:
//!
//! ```text
//! [Operation: u8][Length: u32 (big-endian)][Body: field stream]
//! ```
//!
//! The leading operation byte of a reply must echo the request's. Maximum
//! body size is 32 MiB to prevent memory exhaustion on a corrupt length.

use crate::error::{ProtocolError, Result};
use crate::events::Cursor;
use crate::field::FieldWriter;
use crate::ops::Operation;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Maximum allowed body size (32 MiB)
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// Size of the frame header: operation byte plus 32-bit length
pub const FRAME_HEADER_SIZE: usize = 5;

/// A decoded frame: raw operation tag plus field stream body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Operation tag as received (not validated against the catalogue)
    pub op: u8,
    /// Field stream
    pub body: Vec<u8>,
}

impl Packet {
    /// Build a packet for `op` whose fields are written by `build`
    ///
    /// # Example
    /// ```
    /// use protocol::{Operation, Packet};
    ///
    /// let packet = Packet::build(Operation::Close, |w| {
    ///     w.integer(3);
    /// })
    /// .unwrap();
    /// assert_eq!(packet.op, Operation::Close as u8);
    /// ```
    pub fn build(op: Operation, build: impl FnOnce(&mut FieldWriter)) -> Result<Self> {
        let mut writer = FieldWriter::new();
        build(&mut writer);
        Ok(Self {
            op: op as u8,
            body: writer.finish()?.to_vec(),
        })
    }

    /// Packet with an empty body
    pub fn empty(op: Operation) -> Self {
        Self {
            op: op as u8,
            body: Vec::new(),
        }
    }

    /// Operation from the catalogue, if the tag is known
    pub fn operation(&self) -> Result<Operation> {
        Operation::from_u8(self.op)
    }

    /// Begin decoding the body
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(&self.body)
    }

    /// Encode with frame header
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_frame(self.op, &self.body)
    }
}

/// Encode an operation tag and body into a frame
pub fn encode_frame(op: u8, body: &[u8]) -> Result<Vec<u8>> {
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: body.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.push(op);
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Decode a complete frame held in memory
pub fn decode_frame(frame: &[u8]) -> Result<Packet> {
    if frame.len() < FRAME_HEADER_SIZE {
        return Err(ProtocolError::IncompleteFrame {
            expected: FRAME_HEADER_SIZE,
            actual: frame.len(),
        });
    }

    let length = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    if frame.len() < FRAME_HEADER_SIZE + length {
        return Err(ProtocolError::IncompleteFrame {
            expected: FRAME_HEADER_SIZE + length,
            actual: frame.len(),
        });
    }

    Ok(Packet {
        op: frame[0],
        body: frame[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + length].to_vec(),
    })
}

/// Write a packet as one frame
pub fn write_frame<W: Write>(writer: &mut W, packet: &Packet) -> Result<()> {
    if packet.body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: packet.body.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    writer.write_u8(packet.op)?;
    writer.write_u32::<BigEndian>(packet.body.len() as u32)?;
    writer.write_all(&packet.body)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame from a blocking reader
///
/// Blocks until the whole frame has arrived; there is no timeout. An
/// oversized frame is consumed and discarded before `FrameTooLarge` is
/// returned, so the stream stays aligned on frame boundaries.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Packet> {
    let op = reader.read_u8()?;
    let length = reader.read_u32::<BigEndian>()? as usize;

    if length > MAX_FRAME_SIZE {
        let drained = io::copy(&mut reader.by_ref().take(length as u64), &mut io::sink())?;
        if drained < length as u64 {
            return Err(ProtocolError::IncompleteFrame {
                expected: FRAME_HEADER_SIZE + length,
                actual: FRAME_HEADER_SIZE + drained as usize,
            });
        }
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;

    Ok(Packet { op, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use std::io::Cursor as IoCursor;

    #[test]
    fn test_frame_roundtrip() {
        let packet = Packet::build(Operation::Open, |w| {
            w.integer(1).integer(5);
        })
        .unwrap();

        let frame = packet.encode().unwrap();
        assert_eq!(frame[0], Operation::Open as u8);

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.operation().unwrap(), Operation::Open);
    }

    #[test]
    fn test_write_read_frame() {
        let packet = Packet::build(Operation::BulkWrite, |w| {
            w.integer(7).integer(0x02).octet(&[0xab; 512]).integer(1000);
        })
        .unwrap();

        let mut buffer = Vec::new();
        write_frame(&mut buffer, &packet).unwrap();

        let mut reader = IoCursor::new(buffer);
        let decoded = read_frame(&mut reader).unwrap();
        assert_eq!(decoded, packet);

        let mut cursor = decoded.cursor();
        assert_eq!(cursor.next_event().unwrap(), Some(Event::Scalar(7)));
    }

    #[test]
    fn test_incomplete_frame() {
        let incomplete = vec![0x04, 0, 0, 0, 10]; // Says 10 bytes but provides none
        let result = decode_frame(&incomplete);
        let Err(ProtocolError::IncompleteFrame { expected, actual }) = result else {
            panic!("Expected IncompleteFrame error, got {:?}", result);
        };
        assert_eq!(expected, 15);
        assert_eq!(actual, 5);
    }

    #[test]
    fn test_partial_header() {
        assert!(matches!(
            decode_frame(&[0x02, 0]),
            Err(ProtocolError::IncompleteFrame { expected: 5, .. })
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let too_large = [0x03, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            decode_frame(&too_large),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_oversized_frame_is_drained() {
        let length = MAX_FRAME_SIZE + 1;
        let mut stream = vec![Operation::ResetDevice as u8];
        stream.extend_from_slice(&(length as u32).to_be_bytes());

        // Body starts with something that looks like a frame of its own
        let lookalike = Packet::build(Operation::ResetDevice, |w| {
            w.integer(99);
        })
        .unwrap()
        .encode()
        .unwrap();
        let mut body = vec![0u8; length];
        body[..lookalike.len()].copy_from_slice(&lookalike);
        stream.extend_from_slice(&body);

        let next = Packet::build(Operation::ResetDevice, |w| {
            w.integer(0);
        })
        .unwrap();
        write_frame(&mut stream, &next).unwrap();

        let mut reader = IoCursor::new(stream);
        assert!(matches!(
            read_frame(&mut reader),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
        assert_eq!(read_frame(&mut reader).unwrap(), next);
    }

    #[test]
    fn test_oversized_frame_cut_short() {
        let mut reader = IoCursor::new(vec![0x03, 0xff, 0xff, 0xff, 0xff, 1, 2, 3]);
        assert!(matches!(
            read_frame(&mut reader),
            Err(ProtocolError::IncompleteFrame { actual: 8, .. })
        ));
    }

    #[test]
    fn test_short_read_is_io_error() {
        let mut reader = IoCursor::new(vec![0x02, 0, 0, 0, 8, 0x02]);
        assert!(matches!(read_frame(&mut reader), Err(ProtocolError::Io(_))));
    }

    #[test]
    fn test_empty_packet() {
        let packet = Packet::empty(Operation::Init);
        let frame = packet.encode().unwrap();
        assert_eq!(frame, vec![Operation::Init as u8, 0, 0, 0, 0]);
        assert!(packet.cursor().is_exhausted().unwrap());
    }
}
