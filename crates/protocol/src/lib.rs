//! Wire protocol for rust-usbnet
//!
//! This crate defines the framing and field encoding used on the control
//! channel between the USB shim and the remote agent that owns the hardware.
//! A frame carries a one-byte operation id followed by a self-describing
//! field stream (Integer, Octet, Raw, Structure, Sequence). Replies are
//! decoded as a typed event stream.
//!
//! # Example
//!
//! ```
//! use protocol::{Event, Operation, Packet, decode_frame};
//!
//! // Build an "open" request
//! let request = Packet::build(Operation::Open, |w| {
//!     w.integer(1).integer(5);
//! })
//! .unwrap();
//!
//! // Frame it
//! let frame = request.encode().unwrap();
//!
//! // Decode it again
//! let decoded = decode_frame(&frame).unwrap();
//! let mut cursor = decoded.cursor();
//! assert_eq!(cursor.next_event().unwrap(), Some(Event::Scalar(1)));
//! ```

pub mod codec;
pub mod descriptors;
pub mod error;
pub mod events;
pub mod field;
pub mod ops;

pub use codec::{
    FRAME_HEADER_SIZE, MAX_FRAME_SIZE, Packet, decode_frame, encode_frame, read_frame,
    write_frame,
};
pub use descriptors::{
    ConfigDescriptor, Decoded, Descriptor, DescriptorKind, DeviceDescriptor, EndpointDescriptor,
    InterfaceDescriptor, SizeMismatch,
};
pub use error::{ProtocolError, Result};
pub use events::{Cursor, Decoder, Event};
pub use field::{FIELD_HEADER_SIZE, FieldKind, FieldWriter, GroupKind};
pub use ops::Operation;
