//! Error types for the USB shim

use crate::tree::DeviceId;
use protocol::{Operation, ProtocolError};
use std::io;
use thiserror::Error;

/// Failure to obtain a live control channel
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to import control channel: {0}")]
    Import(#[source] io::Error),

    #[error("control channel is unreachable: {0}")]
    Unreachable(#[source] io::Error),

    #[error("no control channel available")]
    NotImported,
}

/// Malformed find-devices stream
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("device group is missing its {0}")]
    MissingField(&'static str),

    #[error("interface {interface} has no alternate setting count")]
    MissingAltSettingCount { interface: usize },

    #[error("interface {interface} declares {count} alternate settings")]
    InvalidAltSettingCount { interface: usize, count: i64 },

    #[error("device declares {declared} configurations, received {received}")]
    ConfigCountMismatch { declared: u8, received: usize },

    #[error("device list ended inside a group")]
    UnexpectedEnd,

    #[error("malformed device list: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Failure of a remote call
///
/// Local failures map to `-1` in libusb terms; see [`CallError::code`].
#[derive(Debug, Error)]
pub enum CallError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("reply tag mismatch: sent {expected}, received 0x{actual:02x}")]
    TagMismatch { expected: Operation, actual: u8 },

    #[error("{op} reply has no {field}")]
    MissingField { op: Operation, field: &'static str },

    #[error("{op} rejected by remote side with status {status}")]
    Rejected { op: Operation, status: i32 },

    #[error("device list rejected: {0}")]
    Sync(#[from] SyncError),

    #[error("device {0} is no longer in the device tree")]
    StaleDevice(DeviceId),
}

impl CallError {
    /// libusb-style return code
    pub fn code(&self) -> i32 {
        match self {
            CallError::Rejected { status, .. } => *status,
            _ => -1,
        }
    }
}

/// Failure of the string descriptor helpers
#[derive(Debug, Error)]
pub enum StringError {
    #[error(transparent)]
    Call(#[from] CallError),

    #[error("string descriptor request failed with status {status}")]
    Transfer { status: i32 },

    #[error("language table is only {len} bytes")]
    ShortLanguageTable { len: i32 },

    #[error("descriptor type 0x{0:02x} is not a string descriptor")]
    WrongDescriptorType(u8),

    #[error("descriptor declares {declared} bytes but only {received} were returned")]
    Overflow { declared: u8, received: i32 },

    #[error("output buffer has no room for a terminator")]
    BufferTooSmall,
}

impl StringError {
    /// libusb-style return code
    pub fn code(&self) -> i32 {
        match self {
            StringError::Call(e) => e.code(),
            StringError::Transfer { status } => *status,
            StringError::ShortLanguageTable { .. } | StringError::WrongDescriptorType(_) => {
                -libc::EIO
            }
            StringError::Overflow { .. } => -libc::EFBIG,
            StringError::BufferTooSmall => -libc::EINVAL,
        }
    }
}
