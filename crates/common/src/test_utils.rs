//! Test utilities for rust-usbnet
//!
//! Provides a topology builder that encodes find-devices replies and a
//! scripted fake agent that answers frames on one end of a socket pair.
//!
//! # Example
//!
//! ```
//! use common::test_utils::single_device_topology;
//!
//! let topology = single_device_topology();
//! assert_eq!(topology.busses.len(), 1);
//! assert_eq!(topology.node_count(), 6);
//! ```

use protocol::descriptors::{DT_CONFIG, DT_DEVICE, DT_ENDPOINT, DT_INTERFACE, DT_STRING};
use protocol::{
    ConfigDescriptor, Cursor, Descriptor, DeviceDescriptor, EndpointDescriptor, Event,
    FieldWriter, InterfaceDescriptor, Operation, Packet, read_frame, write_frame,
};
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};

/// One alternate setting with its endpoints
#[derive(Debug, Clone)]
pub struct MockAltSetting {
    pub descriptor: InterfaceDescriptor,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl MockAltSetting {
    /// Alternate setting `alt` of interface `number` with the given endpoint addresses
    pub fn new(number: u8, alt: u8, endpoint_addresses: &[u8]) -> Self {
        let endpoints: Vec<EndpointDescriptor> = endpoint_addresses
            .iter()
            .map(|&address| EndpointDescriptor {
                length: 7,
                descriptor_type: DT_ENDPOINT,
                endpoint_address: address,
                attributes: 0x02,
                max_packet_size: 512,
                ..Default::default()
            })
            .collect();

        Self {
            descriptor: InterfaceDescriptor {
                length: 9,
                descriptor_type: DT_INTERFACE,
                interface_number: number,
                alternate_setting: alt,
                num_endpoints: endpoints.len() as u8,
                interface_class: 0xff,
                ..Default::default()
            },
            endpoints,
        }
    }
}

/// One configuration; `interfaces[i]` lists the alternate settings of interface `i`
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub descriptor: ConfigDescriptor,
    pub interfaces: Vec<Vec<MockAltSetting>>,
}

impl MockConfig {
    pub fn new(value: u8, interfaces: Vec<Vec<MockAltSetting>>) -> Self {
        Self {
            descriptor: ConfigDescriptor {
                length: 9,
                descriptor_type: DT_CONFIG,
                total_length: 9,
                num_interfaces: interfaces.len() as u8,
                configuration_value: value,
                attributes: 0x80,
                max_power: 50,
                ..Default::default()
            },
            interfaces,
        }
    }

    fn node_count(&self) -> usize {
        1 + self
            .interfaces
            .iter()
            .map(|alts| 1 + alts.iter().map(|a| 1 + a.endpoints.len()).sum::<usize>())
            .sum::<usize>()
    }
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub filename: String,
    pub devnum: u8,
    pub descriptor: DeviceDescriptor,
    pub configs: Vec<MockConfig>,
}

impl MockDevice {
    /// Device with one configuration, one interface, one alt setting and one bulk IN endpoint
    pub fn new(devnum: u8, vendor_id: u16, product_id: u16) -> Self {
        Self::with_configs(
            devnum,
            vendor_id,
            product_id,
            vec![MockConfig::new(1, vec![vec![MockAltSetting::new(0, 0, &[0x81])]])],
        )
    }

    pub fn with_configs(
        devnum: u8,
        vendor_id: u16,
        product_id: u16,
        configs: Vec<MockConfig>,
    ) -> Self {
        Self {
            filename: format!("{:03}", devnum),
            devnum,
            descriptor: DeviceDescriptor {
                length: 18,
                descriptor_type: DT_DEVICE,
                bcd_usb: 0x0200,
                max_packet_size0: 64,
                vendor_id,
                product_id,
                bcd_device: 0x0100,
                manufacturer_index: 1,
                product_index: 2,
                num_configurations: configs.len() as u8,
                ..Default::default()
            },
            configs,
        }
    }

    /// Nodes this device contributes to a mirrored tree (itself included)
    pub fn node_count(&self) -> usize {
        1 + self.configs.iter().map(MockConfig::node_count).sum::<usize>()
    }

    fn encode(&self, w: &mut FieldWriter) {
        w.sequence(|w| {
            w.text(&self.filename).raw(&self.descriptor.encode());
            for config in &self.configs {
                w.raw(&config.descriptor.encode());
                for alts in &config.interfaces {
                    w.integer(alts.len() as i64);
                    for alt in alts {
                        w.raw(&alt.descriptor.encode());
                        for endpoint in &alt.endpoints {
                            w.raw(&endpoint.encode());
                        }
                    }
                }
            }
            w.integer(i64::from(self.devnum));
        });
    }
}

#[derive(Debug, Clone)]
pub struct MockBus {
    pub dirname: String,
    pub location: u32,
    pub devices: Vec<MockDevice>,
}

impl MockBus {
    pub fn new(dirname: &str, location: u32) -> Self {
        Self {
            dirname: dirname.to_string(),
            location,
            devices: Vec::new(),
        }
    }

    pub fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    fn encode(&self, w: &mut FieldWriter) {
        w.structure(|w| {
            w.text(&self.dirname).integer(i64::from(self.location));
            for device in &self.devices {
                device.encode(w);
            }
        });
    }
}

/// Remote bus/device topology as the agent would report it
#[derive(Debug, Clone, Default)]
pub struct MockTopology {
    pub busses: Vec<MockBus>,
}

impl MockTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bus(mut self, bus: MockBus) -> Self {
        self.busses.push(bus);
        self
    }

    /// Total node count of the mirrored tree (busses through endpoints)
    pub fn node_count(&self) -> usize {
        self.busses
            .iter()
            .map(|b| 1 + b.devices.iter().map(MockDevice::node_count).sum::<usize>())
            .sum()
    }

    /// Write the bus groups that follow the status field
    pub fn encode(&self, w: &mut FieldWriter) {
        for bus in &self.busses {
            bus.encode(w);
        }
    }

    /// Complete find-devices reply
    pub fn find_devices_reply(&self, changes: i64) -> Packet {
        build_reply(Operation::FindDevices, |w| {
            w.integer(changes);
            self.encode(w);
        })
    }
}

/// One bus "bus0" at location 1 holding device 5 (1234:5678)
pub fn single_device_topology() -> MockTopology {
    MockTopology::new()
        .with_bus(MockBus::new("bus0", 1).with_device(MockDevice::new(5, 0x1234, 0x5678)))
}

/// Build a reply packet
///
/// Field writes in tests are small; an oversize error here is a test bug.
pub fn build_reply(op: Operation, build: impl FnOnce(&mut FieldWriter)) -> Packet {
    Packet::build(op, build).unwrap_or_else(|e| panic!("failed to build {} reply: {}", op, e))
}

/// Reply carrying only a status
pub fn status_reply(op: Operation, status: i64) -> Packet {
    build_reply(op, |w| {
        w.integer(status);
    })
}

/// Reply carrying a status and an echoed value
pub fn status_value_reply(op: Operation, status: i64, value: i64) -> Packet {
    build_reply(op, |w| {
        w.integer(status).integer(value);
    })
}

/// Reply carrying a status and payload bytes
pub fn payload_reply(op: Operation, status: i64, payload: &[u8]) -> Packet {
    build_reply(op, |w| {
        w.integer(status).octet(payload);
    })
}

/// Integer fields of a request, in order
pub fn request_scalars(request: &Packet) -> Vec<i64> {
    let mut cursor = Cursor::new(&request.body);
    let mut scalars = Vec::new();
    while let Ok(Some(event)) = cursor.next_event() {
        if let Event::Scalar(v) = event {
            scalars.push(v);
        }
    }
    scalars
}

/// First byte payload of a request, if any
pub fn request_payload(request: &Packet) -> Option<Vec<u8>> {
    let mut cursor = Cursor::new(&request.body);
    while let Ok(Some(event)) = cursor.next_event() {
        if let Event::Text(v) | Event::Bytes(v) = event {
            return Some(v.to_vec());
        }
    }
    None
}

/// String descriptor for `text`, UTF-16LE
pub fn string_descriptor(text: &str) -> Vec<u8> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let mut out = vec![(2 + units.len() * 2) as u8, DT_STRING];
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// String descriptor zero: the supported language ids
pub fn language_table(langids: &[u16]) -> Vec<u8> {
    let mut out = vec![(2 + langids.len() * 2) as u8, DT_STRING];
    for langid in langids {
        out.extend_from_slice(&langid.to_le_bytes());
    }
    out
}

/// Serve frames on `stream` until the peer hangs up
///
/// `handler` returns the reply for each request, or `None` to stay silent
/// (as the agent does for init). The join handle yields every request seen.
pub fn spawn_agent<F>(mut stream: UnixStream, mut handler: F) -> JoinHandle<Vec<Packet>>
where
    F: FnMut(&Packet) -> Option<Packet> + Send + 'static,
{
    thread::spawn(move || {
        let mut seen = Vec::new();
        while let Ok(request) = read_frame(&mut stream) {
            let reply = handler(&request);
            seen.push(request);
            if let Some(reply) = reply {
                if write_frame(&mut stream, &reply).is_err() {
                    break;
                }
            }
        }
        seen
    })
}
