//! usbnet-lsusb
//!
//! Lists the USB devices attached to the remote agent, through the same
//! shim API that applications use.

use anyhow::{Context, Result};
use clap::Parser;
use client::config::ClientConfig;
use client::{Device, DeviceTree, UsbContext};
use common::setup_logging;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "usbnet-lsusb")]
#[command(author, version, about = "List USB devices on the remote agent")]
#[command(long_about = "
Lists USB devices attached to the host running the USB agent, using the
control channel handed over through shared memory.

EXAMPLES:
    # List devices
    usbnet-lsusb

    # Show configurations, interfaces and endpoints
    usbnet-lsusb --verbose

    # Include manufacturer and product strings (opens each device)
    usbnet-lsusb --strings

    # Machine readable output
    usbnet-lsusb --json

CONFIGURATION:
    The client looks for configuration files in the following order:
    1. Path specified with --config
    2. $USBNET_CONFIG
    3. ~/.config/rust-usbnet/client.toml
    4. /etc/rust-usbnet/client.toml
    5. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print the configuration tree of each device
    #[arg(short, long)]
    verbose: bool,

    /// Open each device and print its manufacturer and product strings
    #[arg(short, long)]
    strings: bool,

    /// Print the device tree as JSON
    #[arg(long, conflicts_with_all = ["verbose", "strings"])]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ClientConfig::default();
        let path = ClientConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // Load configuration first (to get log level from config if not specified)
    let config = if let Some(ref path) = args.config {
        ClientConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ClientConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.client.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("rust-usbnet lsusb v{}", env!("CARGO_PKG_VERSION"));

    let connector = config
        .transport
        .connector()
        .context("Invalid transport configuration")?;
    let usb = UsbContext::new(connector);

    let result = list_devices(&usb, &args);

    // Always release the mirrored tree, even after a failed call
    let released = usb.shutdown();
    info!("Released {} tree nodes", released.total());
    result
}

fn list_devices(usb: &UsbContext, args: &Args) -> Result<()> {
    usb.init().context("init failed")?;
    usb.find_busses().context("find_busses failed")?;
    let changes = usb.find_devices().context("find_devices failed")?;
    info!("find_devices reported {} changes", changes);

    let tree = usb.busses();

    if args.json {
        let json = serde_json::to_string_pretty(&*tree).context("Failed to serialize device tree")?;
        println!("{}", json);
        return Ok(());
    }

    if tree.devices().next().is_none() {
        println!("No USB devices found.");
        return Ok(());
    }

    for bus in &tree.busses {
        for device in &bus.devices {
            println!(
                "Bus {} Device {}: ID {:04x}:{:04x}",
                bus.dirname,
                device.filename,
                device.descriptor.vendor_id,
                device.descriptor.product_id
            );
            if args.strings {
                print_strings(usb, device);
            }
            if args.verbose {
                print_configuration(device);
            }
        }
    }

    print_summary(&tree);
    Ok(())
}

fn print_strings(usb: &UsbContext, device: &Device) {
    let handle = match usb.open(device.id) {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Cannot open {}: {}", device.filename, e);
            return;
        }
    };

    for (label, index) in [
        ("Manufacturer", device.descriptor.manufacturer_index),
        ("Product", device.descriptor.product_index),
        ("Serial", device.descriptor.serial_number_index),
    ] {
        if index == 0 {
            continue;
        }
        match usb.read_string(&handle, index) {
            Ok(text) => println!("  {}: {}", label, text),
            Err(e) => warn!("{} string of {}: {} ({})", label, device.filename, e, e.code()),
        }
    }

    if let Err(e) = usb.close(handle) {
        warn!("Cannot close {}: {}", device.filename, e);
    }
}

fn print_configuration(device: &Device) {
    let d = &device.descriptor;
    println!(
        "  bcdUSB {:x}.{:02x}  class {:02x}/{:02x}/{:02x}  maxpacket0 {}  devnum {}",
        d.bcd_usb >> 8,
        d.bcd_usb & 0xff,
        d.device_class,
        d.device_sub_class,
        d.device_protocol,
        d.max_packet_size0,
        device.devnum
    );

    for config in &device.configs {
        let c = &config.descriptor;
        println!(
            "  Configuration {}: {} interfaces, attributes 0x{:02x}, {} mA",
            c.configuration_value,
            c.num_interfaces,
            c.attributes,
            u32::from(c.max_power) * 2
        );
        for interface in &config.interfaces {
            for alt in &interface.altsettings {
                let i = &alt.descriptor;
                println!(
                    "    Interface {} alt {}: class {:02x}/{:02x}/{:02x}, {} endpoints",
                    i.interface_number,
                    i.alternate_setting,
                    i.interface_class,
                    i.interface_sub_class,
                    i.interface_protocol,
                    i.num_endpoints
                );
                for endpoint in &alt.endpoints {
                    let e = &endpoint.descriptor;
                    println!(
                        "      Endpoint 0x{:02x} {} {}, max packet {}, interval {}",
                        e.endpoint_address,
                        if e.is_in() { "IN" } else { "OUT" },
                        transfer_type_name(e.transfer_type()),
                        e.max_packet_size,
                        e.interval
                    );
                }
            }
        }
    }
}

fn transfer_type_name(transfer_type: u8) -> &'static str {
    match transfer_type {
        0 => "control",
        1 => "isochronous",
        2 => "bulk",
        _ => "interrupt",
    }
}

fn print_summary(tree: &DeviceTree) {
    println!(
        "\n{} bus(ses), {} device(s)",
        tree.busses.len(),
        tree.devices().count()
    );
}
