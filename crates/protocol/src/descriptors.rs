//! Standard USB descriptor records
//!
//! The remote agent ships descriptors as Raw fields holding the standard
//! little-endian USB layouts. Records are decoded with
//! [`Descriptor::decode_clamped`]: at most `SIZE` bytes are read, missing
//! trailing bytes read as zero, and any length difference is reported as a
//! [`SizeMismatch`] so callers can log schema drift between agent and shim.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use std::fmt;

/// bmRequestType direction bit for device-to-host transfers
pub const ENDPOINT_IN: u8 = 0x80;
/// bmRequestType direction value for host-to-device transfers
pub const ENDPOINT_OUT: u8 = 0x00;

/// Standard request: GET_DESCRIPTOR
pub const REQ_GET_DESCRIPTOR: u8 = 0x06;

pub const DT_DEVICE: u8 = 0x01;
pub const DT_CONFIG: u8 = 0x02;
pub const DT_STRING: u8 = 0x03;
pub const DT_INTERFACE: u8 = 0x04;
pub const DT_ENDPOINT: u8 = 0x05;

/// Largest record this module decodes
const MAX_RECORD_SIZE: usize = DeviceDescriptor::SIZE;

/// Which record a size mismatch was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DescriptorKind {
    Device,
    Configuration,
    Interface,
    Endpoint,
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DescriptorKind::Device => "device",
            DescriptorKind::Configuration => "configuration",
            DescriptorKind::Interface => "interface",
            DescriptorKind::Endpoint => "endpoint",
        };
        f.write_str(name)
    }
}

/// Declared field length differs from the local record size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMismatch {
    pub kind: DescriptorKind,
    /// Local record size
    pub expected: usize,
    /// Length of the wire field
    pub actual: usize,
}

impl fmt::Display for SizeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} descriptor is {} bytes on the wire, expected {}",
            self.kind, self.actual, self.expected
        )
    }
}

/// A clamped decode result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded<T> {
    pub value: T,
    pub mismatch: Option<SizeMismatch>,
}

/// Fixed-size descriptor record
pub trait Descriptor: Sized {
    const KIND: DescriptorKind;
    /// Record size in bytes
    const SIZE: usize;

    /// Parse a record of exactly `SIZE` bytes
    fn parse(record: &[u8]) -> Self;

    /// Write exactly `SIZE` bytes
    fn write(&self, out: &mut [u8]);

    /// Decode from a wire field of any length, never reading past `SIZE`
    fn decode_clamped(bytes: &[u8]) -> Decoded<Self> {
        let mut record = [0u8; MAX_RECORD_SIZE];
        let copied = bytes.len().min(Self::SIZE);
        record[..copied].copy_from_slice(&bytes[..copied]);

        let mismatch = (bytes.len() != Self::SIZE).then_some(SizeMismatch {
            kind: Self::KIND,
            expected: Self::SIZE,
            actual: bytes.len(),
        });

        Decoded {
            value: Self::parse(&record[..Self::SIZE]),
            mismatch,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        self.write(&mut out);
        out
    }
}

/// Standard device descriptor (18 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub bcd_usb: u16,
    pub device_class: u8,
    pub device_sub_class: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub num_configurations: u8,
}

impl Descriptor for DeviceDescriptor {
    const KIND: DescriptorKind = DescriptorKind::Device;
    const SIZE: usize = 18;

    fn parse(r: &[u8]) -> Self {
        Self {
            length: r[0],
            descriptor_type: r[1],
            bcd_usb: LittleEndian::read_u16(&r[2..4]),
            device_class: r[4],
            device_sub_class: r[5],
            device_protocol: r[6],
            max_packet_size0: r[7],
            vendor_id: LittleEndian::read_u16(&r[8..10]),
            product_id: LittleEndian::read_u16(&r[10..12]),
            bcd_device: LittleEndian::read_u16(&r[12..14]),
            manufacturer_index: r[14],
            product_index: r[15],
            serial_number_index: r[16],
            num_configurations: r[17],
        }
    }

    fn write(&self, out: &mut [u8]) {
        out[0] = self.length;
        out[1] = self.descriptor_type;
        LittleEndian::write_u16(&mut out[2..4], self.bcd_usb);
        out[4] = self.device_class;
        out[5] = self.device_sub_class;
        out[6] = self.device_protocol;
        out[7] = self.max_packet_size0;
        LittleEndian::write_u16(&mut out[8..10], self.vendor_id);
        LittleEndian::write_u16(&mut out[10..12], self.product_id);
        LittleEndian::write_u16(&mut out[12..14], self.bcd_device);
        out[14] = self.manufacturer_index;
        out[15] = self.product_index;
        out[16] = self.serial_number_index;
        out[17] = self.num_configurations;
    }
}

/// Standard configuration descriptor (9 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfigDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration_index: u8,
    pub attributes: u8,
    pub max_power: u8,
}

impl Descriptor for ConfigDescriptor {
    const KIND: DescriptorKind = DescriptorKind::Configuration;
    const SIZE: usize = 9;

    fn parse(r: &[u8]) -> Self {
        Self {
            length: r[0],
            descriptor_type: r[1],
            total_length: LittleEndian::read_u16(&r[2..4]),
            num_interfaces: r[4],
            configuration_value: r[5],
            configuration_index: r[6],
            attributes: r[7],
            max_power: r[8],
        }
    }

    fn write(&self, out: &mut [u8]) {
        out[0] = self.length;
        out[1] = self.descriptor_type;
        LittleEndian::write_u16(&mut out[2..4], self.total_length);
        out[4] = self.num_interfaces;
        out[5] = self.configuration_value;
        out[6] = self.configuration_index;
        out[7] = self.attributes;
        out[8] = self.max_power;
    }
}

/// Standard interface descriptor, one per alternate setting (9 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_sub_class: u8,
    pub interface_protocol: u8,
    pub interface_index: u8,
}

impl Descriptor for InterfaceDescriptor {
    const KIND: DescriptorKind = DescriptorKind::Interface;
    const SIZE: usize = 9;

    fn parse(r: &[u8]) -> Self {
        Self {
            length: r[0],
            descriptor_type: r[1],
            interface_number: r[2],
            alternate_setting: r[3],
            num_endpoints: r[4],
            interface_class: r[5],
            interface_sub_class: r[6],
            interface_protocol: r[7],
            interface_index: r[8],
        }
    }

    fn write(&self, out: &mut [u8]) {
        out[0] = self.length;
        out[1] = self.descriptor_type;
        out[2] = self.interface_number;
        out[3] = self.alternate_setting;
        out[4] = self.num_endpoints;
        out[5] = self.interface_class;
        out[6] = self.interface_sub_class;
        out[7] = self.interface_protocol;
        out[8] = self.interface_index;
    }
}

/// Endpoint descriptor including the audio-class `bRefresh` and
/// `bSynchAddress` trailer (9 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
    pub refresh: u8,
    pub synch_address: u8,
}

impl EndpointDescriptor {
    /// Whether this is a device-to-host endpoint
    pub fn is_in(&self) -> bool {
        self.endpoint_address & ENDPOINT_IN != 0
    }

    /// Transfer type from bmAttributes (0 control, 1 iso, 2 bulk, 3 interrupt)
    pub fn transfer_type(&self) -> u8 {
        self.attributes & 0x03
    }
}

impl Descriptor for EndpointDescriptor {
    const KIND: DescriptorKind = DescriptorKind::Endpoint;
    const SIZE: usize = 9;

    fn parse(r: &[u8]) -> Self {
        Self {
            length: r[0],
            descriptor_type: r[1],
            endpoint_address: r[2],
            attributes: r[3],
            max_packet_size: LittleEndian::read_u16(&r[4..6]),
            interval: r[6],
            refresh: r[7],
            synch_address: r[8],
        }
    }

    fn write(&self, out: &mut [u8]) {
        out[0] = self.length;
        out[1] = self.descriptor_type;
        out[2] = self.endpoint_address;
        out[3] = self.attributes;
        LittleEndian::write_u16(&mut out[4..6], self.max_packet_size);
        out[6] = self.interval;
        out[7] = self.refresh;
        out[8] = self.synch_address;
    }
}
