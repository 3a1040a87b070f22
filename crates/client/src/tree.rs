//! Local mirror of the remote bus/device topology
//!
//! The tree is an owning hierarchy: busses own devices, devices own their
//! configurations, and so on down to endpoints. Devices refer back to their
//! bus by [`BusId`] rather than by pointer. Identities come from counters
//! carried by the tree, so a reused node keeps its id and a node that is
//! dropped and later re-added gets a fresh one.

use protocol::{ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor};
use serde::Serialize;
use std::fmt;

/// Stable identity of a mirrored bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BusId(u64);

/// Stable identity of a mirrored device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceId(u64);

impl BusId {
    #[cfg(test)]
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl DeviceId {
    #[cfg(test)]
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus#{}", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// Monotonic id counters
#[derive(Debug, Clone, Default)]
pub(crate) struct IdAllocator {
    next_bus: u64,
    next_device: u64,
}

impl IdAllocator {
    pub(crate) fn bus(&mut self) -> BusId {
        self.next_bus += 1;
        BusId(self.next_bus)
    }

    pub(crate) fn device(&mut self) -> DeviceId {
        self.next_device += 1;
        DeviceId(self.next_device)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub descriptor: EndpointDescriptor,
}

#[derive(Debug, Clone, Serialize)]
pub struct AltSetting {
    pub descriptor: InterfaceDescriptor,
    /// Exactly `descriptor.num_endpoints` entries
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Interface {
    pub altsettings: Vec<AltSetting>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Configuration {
    pub descriptor: ConfigDescriptor,
    /// Exactly `descriptor.num_interfaces` entries
    pub interfaces: Vec<Interface>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub id: DeviceId,
    /// Bus whose device list holds this device
    pub bus: BusId,
    pub filename: String,
    pub descriptor: DeviceDescriptor,
    /// Device address on its bus, as reported
    pub devnum: i32,
    pub configs: Vec<Configuration>,
}

impl Device {
    pub(crate) fn new(id: DeviceId, bus: BusId) -> Self {
        Self {
            id,
            bus,
            filename: String::new(),
            descriptor: DeviceDescriptor::default(),
            devnum: 0,
            configs: Vec::new(),
        }
    }

    /// Nodes in this device's subtree, the device included
    pub fn node_count(&self) -> usize {
        1 + self
            .configs
            .iter()
            .map(|config| {
                1 + config
                    .interfaces
                    .iter()
                    .map(|iface| {
                        1 + iface
                            .altsettings
                            .iter()
                            .map(|alt| 1 + alt.endpoints.len())
                            .sum::<usize>()
                    })
                    .sum::<usize>()
            })
            .sum::<usize>()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Bus {
    pub id: BusId,
    pub dirname: String,
    pub location: i32,
    pub devices: Vec<Device>,
}

impl Bus {
    pub(crate) fn new(id: BusId) -> Self {
        Self {
            id,
            dirname: String::new(),
            location: 0,
            devices: Vec::new(),
        }
    }
}

/// Snapshot of the mirrored topology
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceTree {
    pub busses: Vec<Bus>,
    #[serde(skip)]
    pub(crate) ids: IdAllocator,
}

impl DeviceTree {
    /// Empty tree that continues numbering from `ids`
    pub(crate) fn with_ids(ids: IdAllocator) -> Self {
        Self {
            busses: Vec::new(),
            ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.busses.is_empty()
    }

    pub fn bus(&self, id: BusId) -> Option<&Bus> {
        self.busses.iter().find(|bus| bus.id == id)
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices().find(|device| device.id == id)
    }

    /// All devices, bus by bus
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.busses.iter().flat_map(|bus| bus.devices.iter())
    }

    /// First device matching a vendor and product id
    pub fn find_by_ids(&self, vendor_id: u16, product_id: u16) -> Option<&Device> {
        self.devices().find(|device| {
            device.descriptor.vendor_id == vendor_id && device.descriptor.product_id == product_id
        })
    }

    /// Total nodes, busses through endpoints
    pub fn node_count(&self) -> usize {
        self.busses
            .iter()
            .map(|bus| 1 + bus.devices.iter().map(Device::node_count).sum::<usize>())
            .sum()
    }
}
