//! Remote operation catalogue

use crate::error::{ProtocolError, Result};
use std::fmt;

/// Remote operation ids (first byte of every frame)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Init = 0x01,
    FindBusses = 0x02,
    FindDevices = 0x03,
    Open = 0x04,
    Close = 0x05,
    SetConfiguration = 0x06,
    SetAltInterface = 0x07,
    ResetEndpoint = 0x08,
    ClearHalt = 0x09,
    ResetDevice = 0x0a,
    ClaimInterface = 0x0b,
    ReleaseInterface = 0x0c,
    ControlTransfer = 0x0d,
    BulkRead = 0x0e,
    BulkWrite = 0x0f,
    InterruptRead = 0x10,
    InterruptWrite = 0x11,
    DetachKernelDriver = 0x12,
}

impl Operation {
    /// Every operation, in id order
    pub const ALL: [Operation; 18] = [
        Operation::Init,
        Operation::FindBusses,
        Operation::FindDevices,
        Operation::Open,
        Operation::Close,
        Operation::SetConfiguration,
        Operation::SetAltInterface,
        Operation::ResetEndpoint,
        Operation::ClearHalt,
        Operation::ResetDevice,
        Operation::ClaimInterface,
        Operation::ReleaseInterface,
        Operation::ControlTransfer,
        Operation::BulkRead,
        Operation::BulkWrite,
        Operation::InterruptRead,
        Operation::InterruptWrite,
        Operation::DetachKernelDriver,
    ];

    pub fn from_u8(value: u8) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| *op as u8 == value)
            .ok_or(ProtocolError::UnknownOperation(value))
    }

    /// Whether the remote agent answers this operation
    pub fn expects_reply(self) -> bool {
        self != Operation::Init
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Init => "init",
            Operation::FindBusses => "find_busses",
            Operation::FindDevices => "find_devices",
            Operation::Open => "open",
            Operation::Close => "close",
            Operation::SetConfiguration => "set_configuration",
            Operation::SetAltInterface => "set_alt_interface",
            Operation::ResetEndpoint => "reset_endpoint",
            Operation::ClearHalt => "clear_halt",
            Operation::ResetDevice => "reset_device",
            Operation::ClaimInterface => "claim_interface",
            Operation::ReleaseInterface => "release_interface",
            Operation::ControlTransfer => "control_transfer",
            Operation::BulkRead => "bulk_read",
            Operation::BulkWrite => "bulk_write",
            Operation::InterruptRead => "interrupt_read",
            Operation::InterruptWrite => "interrupt_write",
            Operation::DetachKernelDriver => "detach_kernel_driver",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), *self as u8)
    }
}
