//! Reconciliation of the mirrored tree against a find-devices reply
//!
//! The reply, after its status field, carries one Structure group per bus
//! and, inside each, one Sequence group per device:
//!
//! ```text
//! bus    := Structure { Octet dirname, Integer location, device* }
//! device := Sequence  { Octet filename, Raw device-descriptor,
//!                       config*, Integer devnum }
//! config := Raw config-descriptor,
//!           ( Integer alt-count, ( Raw interface-descriptor,
//!                                  Raw endpoint-descriptor{bNumEndpoints} ){alt-count}
//!           ){bNumInterfaces}
//! ```
//!
//! Matching is positional: the Nth bus group updates the Nth cached bus
//! and the Nth device group inside it updates the Nth cached device.
//! Groups of the other kind are skipped. Configurations are rebuilt on every
//! pass and their number must match `bNumConfigurations`. Surplus cached
//! nodes are released through [`crate::lifecycle`].

use crate::driver::clamp_status;
use crate::error::SyncError;
use crate::lifecycle::{self, Released};
use crate::tree::{
    AltSetting, Bus, Configuration, Device, DeviceTree, Endpoint, IdAllocator, Interface,
};
use protocol::{
    ConfigDescriptor, Cursor, Decoded, Descriptor, DeviceDescriptor, EndpointDescriptor, Event,
    GroupKind, InterfaceDescriptor, SizeMismatch,
};
use std::mem;
use tracing::debug;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub busses_reused: usize,
    pub busses_added: usize,
    pub devices_reused: usize,
    pub devices_added: usize,
    /// Busses and devices that disappeared
    pub released: Released,
    /// Configuration subtrees replaced by fresh ones
    pub rebuilt: Released,
    /// Descriptor records whose wire size differed from the record size
    pub mismatches: Vec<SizeMismatch>,
}

type Result<T> = std::result::Result<T, SyncError>;

/// Reconcile `tree` with the bus groups remaining in `cursor`
///
/// On error the tree may be partially updated; callers run this against a
/// staged copy and discard it on failure.
pub fn reconcile(tree: &mut DeviceTree, cursor: &mut Cursor<'_>) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let DeviceTree { busses, ids } = tree;

    let mut index = 0;
    loop {
        match cursor.peek()?.copied() {
            None => break,
            Some(Event::BeginGroup(GroupKind::Structure)) => {
                cursor.enter_group()?;
                if index == busses.len() {
                    busses.push(Bus::new(ids.bus()));
                    report.busses_added += 1;
                } else {
                    report.busses_reused += 1;
                }
                reconcile_bus(&mut busses[index], ids, cursor, &mut report)?;
                index += 1;
            }
            Some(Event::BeginGroup(GroupKind::Sequence)) => {
                cursor.enter_group()?;
                let skipped = cursor.skip_rest_of_group()?;
                debug!("Skipping top-level sequence of {} fields in device list", skipped);
            }
            Some(other) => {
                cursor.next_event()?;
                debug!("Skipping top-level field in device list: {:?}", other);
            }
        }
    }

    for bus in busses.drain(index..) {
        debug!("Bus {} ({}) disappeared", bus.id, bus.dirname);
        report.released += lifecycle::release_bus(bus);
    }

    debug!(
        "Reconciled device tree: {} busses ({} new), {} devices ({} new), released {}, {} size mismatches",
        report.busses_reused + report.busses_added,
        report.busses_added,
        report.devices_reused + report.devices_added,
        report.devices_added,
        report.released.total(),
        report.mismatches.len()
    );
    Ok(report)
}

fn reconcile_bus(
    bus: &mut Bus,
    ids: &mut IdAllocator,
    cursor: &mut Cursor<'_>,
    report: &mut SyncReport,
) -> Result<()> {
    if let Some(dirname) = cursor.take_text()? {
        bus.dirname = String::from_utf8_lossy(dirname).into_owned();
    }
    if let Some(location) = cursor.take_scalar()? {
        bus.location = clamp_status(location);
    }

    let mut index = 0;
    loop {
        match cursor.next_event()? {
            Some(Event::BeginGroup(GroupKind::Sequence)) => {
                if index == bus.devices.len() {
                    bus.devices.push(Device::new(ids.device(), bus.id));
                    report.devices_added += 1;
                } else {
                    report.devices_reused += 1;
                }
                reconcile_device(&mut bus.devices[index], cursor, report)?;
                index += 1;
            }
            Some(Event::BeginGroup(GroupKind::Structure)) => {
                let skipped = cursor.skip_rest_of_group()?;
                debug!("Skipping structure of {} fields in bus {}", skipped, bus.dirname);
            }
            Some(Event::EndGroup) => break,
            Some(other) => debug!("Skipping field in bus {}: {:?}", bus.dirname, other),
            None => return Err(SyncError::UnexpectedEnd),
        }
    }

    for device in bus.devices.drain(index..) {
        debug!("Device {} ({}) left bus {}", device.id, device.filename, bus.dirname);
        report.released += lifecycle::release_device(device);
    }
    Ok(())
}

fn reconcile_device(
    device: &mut Device,
    cursor: &mut Cursor<'_>,
    report: &mut SyncReport,
) -> Result<()> {
    let filename = cursor
        .take_text()?
        .ok_or(SyncError::MissingField("file name"))?;
    device.filename = String::from_utf8_lossy(filename).into_owned();

    let raw = cursor
        .take_bytes()?
        .ok_or(SyncError::MissingField("device descriptor"))?;
    device.descriptor = decode::<DeviceDescriptor>(raw, report);

    let mut configs = Vec::with_capacity(usize::from(device.descriptor.num_configurations));
    while let Some(raw) = cursor.take_bytes()? {
        configs.push(read_configuration(raw, cursor, report)?);
    }
    if configs.len() != usize::from(device.descriptor.num_configurations) {
        return Err(SyncError::ConfigCountMismatch {
            declared: device.descriptor.num_configurations,
            received: configs.len(),
        });
    }
    report.rebuilt += lifecycle::release_configs(mem::replace(&mut device.configs, configs));

    let mut devnum = None;
    loop {
        match cursor.next_event()? {
            Some(Event::Scalar(value)) if devnum.is_none() => devnum = Some(value),
            Some(Event::BeginGroup(_)) => {
                let skipped = cursor.skip_rest_of_group()?;
                debug!("Skipped nested group of {} fields in {}", skipped, device.filename);
            }
            Some(Event::EndGroup) => break,
            Some(other) => debug!("Skipping field in device {}: {:?}", device.filename, other),
            None => return Err(SyncError::UnexpectedEnd),
        }
    }
    if let Some(devnum) = devnum {
        device.devnum = clamp_status(devnum);
    }
    Ok(())
}

fn read_configuration(
    raw: &[u8],
    cursor: &mut Cursor<'_>,
    report: &mut SyncReport,
) -> Result<Configuration> {
    let descriptor = decode::<ConfigDescriptor>(raw, report);

    let mut interfaces = Vec::with_capacity(usize::from(descriptor.num_interfaces));
    for interface in 0..usize::from(descriptor.num_interfaces) {
        let count = cursor
            .take_scalar()?
            .ok_or(SyncError::MissingAltSettingCount { interface })?;
        let count = usize::try_from(count)
            .map_err(|_| SyncError::InvalidAltSettingCount { interface, count })?;

        // Every alternate setting needs its own field, so the count is
        // bounded by the reply rather than trusted for preallocation
        let mut altsettings = Vec::new();
        for _ in 0..count {
            let raw = cursor
                .take_bytes()?
                .ok_or(SyncError::MissingField("interface descriptor"))?;
            altsettings.push(read_altsetting(raw, cursor, report)?);
        }
        interfaces.push(Interface { altsettings });
    }

    Ok(Configuration {
        descriptor,
        interfaces,
    })
}

fn read_altsetting(
    raw: &[u8],
    cursor: &mut Cursor<'_>,
    report: &mut SyncReport,
) -> Result<AltSetting> {
    let descriptor = decode::<InterfaceDescriptor>(raw, report);

    let mut endpoints = Vec::with_capacity(usize::from(descriptor.num_endpoints));
    for _ in 0..descriptor.num_endpoints {
        let raw = cursor
            .take_bytes()?
            .ok_or(SyncError::MissingField("endpoint descriptor"))?;
        endpoints.push(Endpoint {
            descriptor: decode::<EndpointDescriptor>(raw, report),
        });
    }

    Ok(AltSetting {
        descriptor,
        endpoints,
    })
}

fn decode<T: Descriptor>(raw: &[u8], report: &mut SyncReport) -> T {
    let Decoded { value, mismatch } = T::decode_clamped(raw);
    if let Some(mismatch) = mismatch {
        debug!("{}", mismatch);
        report.mismatches.push(mismatch);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{
        MockAltSetting, MockBus, MockConfig, MockDevice, MockTopology, single_device_topology,
    };
    use protocol::FieldWriter;

    fn body_of(topology: &MockTopology) -> Vec<u8> {
        let mut w = FieldWriter::new();
        topology.encode(&mut w);
        w.finish().unwrap().to_vec()
    }

    fn sync(tree: &mut DeviceTree, body: &[u8]) -> Result<SyncReport> {
        reconcile(tree, &mut Cursor::new(body))
    }

    #[test]
    fn test_first_pass_builds_tree() {
        let topology = single_device_topology();
        let mut tree = DeviceTree::default();
        let report = sync(&mut tree, &body_of(&topology)).unwrap();

        assert_eq!(report.busses_added, 1);
        assert_eq!(report.devices_added, 1);
        assert!(report.mismatches.is_empty());
        assert_eq!(tree.node_count(), topology.node_count());

        let bus = &tree.busses[0];
        assert_eq!(bus.dirname, "bus0");
        assert_eq!(bus.location, 1);
        let device = &bus.devices[0];
        assert_eq!(device.bus, bus.id);
        assert_eq!(device.devnum, 5);
        assert_eq!(device.descriptor.vendor_id, 0x1234);
        assert_eq!(device.configs[0].interfaces[0].altsettings[0].endpoints.len(), 1);
    }

    #[test]
    fn test_second_pass_reuses_ids() {
        let body = body_of(&single_device_topology());
        let mut tree = DeviceTree::default();
        sync(&mut tree, &body).unwrap();
        let (bus_id, device_id) = (tree.busses[0].id, tree.busses[0].devices[0].id);

        let report = sync(&mut tree, &body).unwrap();
        assert_eq!(report.busses_reused, 1);
        assert_eq!(report.devices_reused, 1);
        assert!(report.released.is_empty());
        assert_eq!(report.rebuilt.configs, 1);
        assert_eq!(tree.busses[0].id, bus_id);
        assert_eq!(tree.busses[0].devices[0].id, device_id);
    }

    #[test]
    fn test_shrinking_topology_releases_tail() {
        let big = MockTopology::new()
            .with_bus(
                MockBus::new("001", 1)
                    .with_device(MockDevice::new(1, 0x1d6b, 0x0002))
                    .with_device(MockDevice::new(2, 0x046d, 0xc52b)),
            )
            .with_bus(MockBus::new("002", 2).with_device(MockDevice::new(1, 0x1d6b, 0x0003)));
        let small = MockTopology::new()
            .with_bus(MockBus::new("001", 1).with_device(MockDevice::new(1, 0x1d6b, 0x0002)));

        let mut tree = DeviceTree::default();
        sync(&mut tree, &body_of(&big)).unwrap();
        let report = sync(&mut tree, &body_of(&small)).unwrap();

        assert_eq!(report.released.busses, 1);
        assert_eq!(report.released.devices, 2);
        assert_eq!(report.released.endpoints, 2);
        assert_eq!(tree.node_count(), small.node_count());
    }

    #[test]
    fn test_readded_device_gets_fresh_id() {
        let one = single_device_topology();
        let none = MockTopology::new().with_bus(MockBus::new("bus0", 1));

        let mut tree = DeviceTree::default();
        sync(&mut tree, &body_of(&one)).unwrap();
        let first = tree.busses[0].devices[0].id;
        sync(&mut tree, &body_of(&none)).unwrap();
        sync(&mut tree, &body_of(&one)).unwrap();
        assert_ne!(tree.busses[0].devices[0].id, first);
    }

    #[test]
    fn test_multiple_configs_and_altsettings() {
        let device = MockDevice::with_configs(
            3,
            0x0bda,
            0x8153,
            vec![
                MockConfig::new(
                    1,
                    vec![
                        vec![MockAltSetting::new(0, 0, &[0x81])],
                        vec![
                            MockAltSetting::new(1, 0, &[]),
                            MockAltSetting::new(1, 1, &[0x82, 0x03]),
                        ],
                    ],
                ),
                MockConfig::new(2, vec![vec![MockAltSetting::new(0, 0, &[0x81, 0x02])]]),
            ],
        );
        let topology = MockTopology::new().with_bus(MockBus::new("002", 2).with_device(device));

        let mut tree = DeviceTree::default();
        sync(&mut tree, &body_of(&topology)).unwrap();

        let device = &tree.busses[0].devices[0];
        assert_eq!(device.configs.len(), 2);
        assert_eq!(device.configs[0].interfaces[1].altsettings.len(), 2);
        assert_eq!(device.configs[0].interfaces[1].altsettings[1].endpoints.len(), 2);
        assert_eq!(device.configs[1].descriptor.configuration_value, 2);
        assert_eq!(tree.node_count(), topology.node_count());
    }

    #[test]
    fn test_short_descriptor_is_reported() {
        let mut w = FieldWriter::new();
        w.structure(|w| {
            w.text("bus0").integer(1).sequence(|w| {
                w.text("001").raw(&[18, 1, 0x00, 0x02]).integer(7);
            });
        });
        let body = w.finish().unwrap();

        let mut tree = DeviceTree::default();
        let report = sync(&mut tree, &body).unwrap();
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].actual, 4);
        let device = &tree.busses[0].devices[0];
        assert_eq!(device.descriptor.bcd_usb, 0x0200);
        assert_eq!(device.descriptor.vendor_id, 0);
        assert_eq!(device.devnum, 7);
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut w = FieldWriter::new();
        w.integer(99).structure(|w| {
            w.text("bus0").integer(1).octet(b"extra").sequence(|w| {
                w.text("001")
                    .raw(&DeviceDescriptor::default().encode())
                    .integer(4)
                    .octet(b"serial")
                    .group(GroupKind::Structure, |w| {
                        w.integer(1).integer(2);
                    });
            });
        });
        let body = w.finish().unwrap();

        let mut tree = DeviceTree::default();
        sync(&mut tree, &body).unwrap();
        assert_eq!(tree.busses[0].devices.len(), 1);
        assert_eq!(tree.busses[0].devices[0].devnum, 4);
    }

    #[test]
    fn test_location_and_devnum_are_not_truncated() {
        let mut w = FieldWriter::new();
        w.structure(|w| {
            w.text("bus0").integer(-1).sequence(|w| {
                w.text("300")
                    .raw(&DeviceDescriptor::default().encode())
                    .integer(300);
            });
        });
        let body = w.finish().unwrap();

        let mut tree = DeviceTree::default();
        sync(&mut tree, &body).unwrap();
        assert_eq!(tree.busses[0].location, -1);
        assert_eq!(tree.busses[0].devices[0].devnum, 300);
    }

    #[test]
    fn test_wide_values_saturate() {
        let mut w = FieldWriter::new();
        w.structure(|w| {
            w.text("bus0").integer(i64::from(u32::MAX) + 1).sequence(|w| {
                w.text("001")
                    .raw(&DeviceDescriptor::default().encode())
                    .integer(i64::MIN);
            });
        });
        let body = w.finish().unwrap();

        let mut tree = DeviceTree::default();
        sync(&mut tree, &body).unwrap();
        assert_eq!(tree.busses[0].location, i32::MAX);
        assert_eq!(tree.busses[0].devices[0].devnum, i32::MIN);
    }

    #[test]
    fn test_config_count_mismatch_fails() {
        let mut device = MockDevice::new(2, 0x1234, 0x5678);
        device.descriptor.num_configurations = 2;
        let topology = MockTopology::new().with_bus(MockBus::new("bus0", 1).with_device(device));

        let mut tree = DeviceTree::default();
        assert!(matches!(
            sync(&mut tree, &body_of(&topology)),
            Err(SyncError::ConfigCountMismatch {
                declared: 2,
                received: 1
            })
        ));
    }

    #[test]
    fn test_group_kinds_are_checked() {
        let mut w = FieldWriter::new();
        w.sequence(|w| {
            w.text("not a bus").integer(9);
        })
        .structure(|w| {
            w.text("bus0")
                .integer(1)
                .structure(|w| {
                    w.text("not a device").raw(&DeviceDescriptor::default().encode());
                })
                .sequence(|w| {
                    w.text("001")
                        .raw(&DeviceDescriptor::default().encode())
                        .integer(4);
                });
        });
        let body = w.finish().unwrap();

        let mut tree = DeviceTree::default();
        let report = sync(&mut tree, &body).unwrap();
        assert_eq!(report.busses_added, 1);
        assert_eq!(report.devices_added, 1);
        assert_eq!(tree.busses[0].dirname, "bus0");
        assert_eq!(tree.busses[0].devices[0].filename, "001");
        assert_eq!(tree.busses[0].devices[0].devnum, 4);
    }

    #[test]
    fn test_missing_altsetting_count_fails() {
        let config = ConfigDescriptor {
            num_interfaces: 1,
            ..Default::default()
        };
        let mut w = FieldWriter::new();
        w.structure(|w| {
            w.text("bus0").integer(1).sequence(|w| {
                w.text("001")
                    .raw(&DeviceDescriptor::default().encode())
                    .raw(&config.encode())
                    .raw(&InterfaceDescriptor::default().encode());
            });
        });
        let body = w.finish().unwrap();

        let mut tree = DeviceTree::default();
        assert!(matches!(
            sync(&mut tree, &body),
            Err(SyncError::MissingAltSettingCount { interface: 0 })
        ));
    }

    #[test]
    fn test_negative_altsetting_count_fails() {
        let config = ConfigDescriptor {
            num_interfaces: 1,
            ..Default::default()
        };
        let mut w = FieldWriter::new();
        w.structure(|w| {
            w.text("bus0").sequence(|w| {
                w.text("001")
                    .raw(&DeviceDescriptor::default().encode())
                    .raw(&config.encode())
                    .integer(-1);
            });
        });
        let body = w.finish().unwrap();

        let mut tree = DeviceTree::default();
        assert!(matches!(
            sync(&mut tree, &body),
            Err(SyncError::InvalidAltSettingCount { count: -1, .. })
        ));
    }

    #[test]
    fn test_missing_endpoint_fails() {
        let alt = InterfaceDescriptor {
            num_endpoints: 2,
            ..Default::default()
        };
        let config = ConfigDescriptor {
            num_interfaces: 1,
            ..Default::default()
        };
        let mut w = FieldWriter::new();
        w.structure(|w| {
            w.sequence(|w| {
                w.text("001")
                    .raw(&DeviceDescriptor::default().encode())
                    .raw(&config.encode())
                    .integer(1)
                    .raw(&alt.encode())
                    .raw(&EndpointDescriptor::default().encode())
                    .integer(1);
            });
        });
        let body = w.finish().unwrap();

        let mut tree = DeviceTree::default();
        assert!(matches!(
            sync(&mut tree, &body),
            Err(SyncError::MissingField("endpoint descriptor"))
        ));
    }

    #[test]
    fn test_missing_filename_fails() {
        let mut w = FieldWriter::new();
        w.structure(|w| {
            w.text("bus0").integer(1).sequence(|w| {
                w.raw(&DeviceDescriptor::default().encode());
            });
        });
        let body = w.finish().unwrap();

        let mut tree = DeviceTree::default();
        assert!(matches!(
            sync(&mut tree, &body),
            Err(SyncError::MissingField("file name"))
        ));
    }

    #[test]
    fn test_truncated_stream_fails() {
        let body = body_of(&single_device_topology());
        let mut tree = DeviceTree::default();
        assert!(matches!(
            sync(&mut tree, &body[..body.len() - 3]),
            Err(SyncError::Protocol(_))
        ));
    }
}
