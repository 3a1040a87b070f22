//! rust-usbnet client
//!
//! Presents a libusb-0.1 style API for USB devices attached to another
//! host. Each call is forwarded over a single control channel to the agent
//! that owns the hardware, and the remote bus/device topology is mirrored
//! locally as an immutable [`DeviceTree`] snapshot.
//!
//! # Example
//!
//! ```no_run
//! use client::UsbContext;
//! use std::time::Duration;
//!
//! let usb = UsbContext::from_shm();
//! usb.init()?;
//! usb.find_busses()?;
//! usb.find_devices()?;
//!
//! let tree = usb.busses();
//! if let Some(device) = tree.find_by_ids(0x1234, 0x5678) {
//!     let mut handle = usb.open(device.id)?;
//!     usb.claim_interface(&mut handle, 0)?;
//!     let mut buf = [0u8; 64];
//!     let n = usb.bulk_read(&handle, 0x81, &mut buf, Duration::from_millis(500))?;
//!     println!("read {} bytes", n);
//!     usb.close(handle)?;
//! }
//! usb.shutdown();
//! # Ok::<(), client::CallError>(())
//! ```

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod strings;
pub mod sync;
pub mod transport;
pub mod tree;

pub use config::ClientConfig;
pub use context::UsbContext;
pub use driver::{FatalHandler, exit_on_fatal};
pub use error::{CallError, StringError, SyncError, TransportError};
pub use handle::DeviceHandle;
pub use lifecycle::Released;
pub use sync::SyncReport;
pub use transport::{AdoptedConnector, Channel, Connector, ShmConnector};
pub use tree::{
    AltSetting, Bus, BusId, Configuration, Device, DeviceId, DeviceTree, Endpoint, Interface,
};
