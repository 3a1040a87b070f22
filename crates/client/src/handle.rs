//! Open device sessions

use crate::tree::{BusId, DeviceId};

/// An open remote device
///
/// The selectors below are advisory: they record the last value the remote
/// side confirmed and are only updated when a call returns `status >= 0`.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceHandle {
    session: i64,
    device: DeviceId,
    bus: BusId,
    pub(crate) configuration: Option<i32>,
    pub(crate) interface: Option<i32>,
    pub(crate) altsetting: Option<i32>,
}

impl DeviceHandle {
    pub(crate) fn new(session: i64, device: DeviceId, bus: BusId) -> Self {
        Self {
            session,
            device,
            bus,
            configuration: None,
            interface: None,
            altsetting: None,
        }
    }

    /// Remote session id
    pub fn session(&self) -> i64 {
        self.session
    }

    /// Device this handle was opened from
    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    /// Last confirmed configuration value
    pub fn configuration(&self) -> Option<i32> {
        self.configuration
    }

    /// Last claimed interface
    pub fn interface(&self) -> Option<i32> {
        self.interface
    }

    /// Last confirmed alternate setting
    pub fn altsetting(&self) -> Option<i32> {
        self.altsetting
    }
}
