//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Field header carries a kind tag this codec does not know
    #[error("Unknown field kind: {0:#04x}")]
    UnknownFieldKind(u8),

    /// Operation id outside the catalogue
    #[error("Unknown operation id: {0:#04x}")]
    UnknownOperation(u8),

    /// Integer field with a width outside 1..=8 bytes
    #[error("Invalid integer width: {0} bytes")]
    InvalidIntegerWidth(usize),

    /// A field header or value runs past the end of its enclosing group
    #[error("Truncated field at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Field or group longer than the 32-bit length prefix can describe
    #[error("Field too large: {size} bytes")]
    FieldTooLarge { size: usize },

    /// Frame length exceeds maximum allowed size
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Incomplete frame data
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// I/O error during frame operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
