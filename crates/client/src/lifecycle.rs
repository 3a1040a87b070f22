//! Ordered release of mirrored subtrees
//!
//! Release runs bottom-up: endpoints, alternate settings, interfaces,
//! configurations, then the device, then its bus. Each function returns a
//! [`Released`] tally so callers can check that exactly the removed nodes
//! went away. Partially built subtrees (empty child lists) are fine.

use crate::tree::{Bus, Configuration, Device, DeviceTree};
use serde::Serialize;
use std::mem;
use std::ops::AddAssign;
use tracing::{debug, trace};

/// Nodes released, per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Released {
    pub busses: usize,
    pub devices: usize,
    pub configs: usize,
    pub interfaces: usize,
    pub altsettings: usize,
    pub endpoints: usize,
}

impl Released {
    pub fn total(&self) -> usize {
        self.busses
            + self.devices
            + self.configs
            + self.interfaces
            + self.altsettings
            + self.endpoints
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl AddAssign for Released {
    fn add_assign(&mut self, other: Self) {
        self.busses += other.busses;
        self.devices += other.devices;
        self.configs += other.configs;
        self.interfaces += other.interfaces;
        self.altsettings += other.altsettings;
        self.endpoints += other.endpoints;
    }
}

/// Release a list of configurations and everything below them
pub fn release_configs(configs: Vec<Configuration>) -> Released {
    let mut released = Released::default();
    for mut config in configs {
        for mut interface in config.interfaces.drain(..) {
            for mut alt in interface.altsettings.drain(..) {
                released.endpoints += alt.endpoints.drain(..).count();
                released.altsettings += 1;
            }
            released.interfaces += 1;
        }
        released.configs += 1;
    }
    released
}

/// Release a device and its configurations
pub fn release_device(mut device: Device) -> Released {
    let mut released = release_configs(mem::take(&mut device.configs));
    trace!(
        "Released {} ({} on {}), {} descendants",
        device.id,
        device.filename,
        device.bus,
        released.total()
    );
    released.devices += 1;
    released
}

/// Release a bus and all of its devices
pub fn release_bus(mut bus: Bus) -> Released {
    let mut released = Released::default();
    for device in bus.devices.drain(..) {
        released += release_device(device);
    }
    trace!("Released {} ({})", bus.id, bus.dirname);
    released.busses += 1;
    released
}

/// Release a whole tree
pub fn release_tree(mut tree: DeviceTree) -> Released {
    let mut released = Released::default();
    for bus in tree.busses.drain(..) {
        released += release_bus(bus);
    }
    debug!("Released device tree: {:?}", released);
    released
}
