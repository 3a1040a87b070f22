//! libusb-style entry points
//!
//! [`UsbContext`] owns the call driver and the published device tree. Every
//! method is one request/response exchange under the call lock; status
//! values are returned as the remote side reported them.

use crate::driver::{CallDriver, FatalHandler, clamp_status, take_status};
use crate::error::CallError;
use crate::handle::DeviceHandle;
use crate::lifecycle::{self, Released};
use crate::sync::{self, SyncReport};
use crate::transport::{Connector, ShmConnector};
use crate::tree::{DeviceId, DeviceTree};
use protocol::{FieldWriter, Operation, Packet};
use std::mem;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

/// Process-wide shim state: the control channel and the mirrored tree
pub struct UsbContext<C: Connector = ShmConnector> {
    driver: CallDriver<C>,
    tree: RwLock<Arc<DeviceTree>>,
}

impl<C: Connector> UsbContext<C> {
    /// Context whose channel comes from `connector`
    ///
    /// An unreachable channel terminates the process; see
    /// [`crate::driver::exit_on_fatal`].
    pub fn new(connector: C) -> Self {
        Self::from_driver(CallDriver::new(connector))
    }

    pub fn with_fatal_handler(connector: C, fatal: FatalHandler) -> Self {
        Self::from_driver(CallDriver::with_fatal_handler(connector, fatal))
    }

    fn from_driver(driver: CallDriver<C>) -> Self {
        Self {
            driver,
            tree: RwLock::new(Arc::new(DeviceTree::default())),
        }
    }

    /// Current device tree snapshot
    ///
    /// The snapshot is immutable; a later `find_devices` publishes a new one
    /// without disturbing readers of this one.
    pub fn busses(&self) -> Arc<DeviceTree> {
        self.tree
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, tree: DeviceTree) -> Arc<DeviceTree> {
        let mut current = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        mem::replace(&mut *current, Arc::new(tree))
    }

    /// Announce this client to the agent; no reply is expected
    pub fn init(&self) -> Result<(), CallError> {
        self.driver.lock().send(Operation::Init, |_| {})?;
        debug!("init: called");
        Ok(())
    }

    /// Number of bus changes on the remote side
    pub fn find_busses(&self) -> Result<i32, CallError> {
        self.status_call(Operation::FindBusses, |_| {})
    }

    /// Refresh the device tree; returns the remote change count
    pub fn find_devices(&self) -> Result<i32, CallError> {
        self.find_devices_with_report().map(|(changes, _)| changes)
    }

    /// Like [`find_devices`](Self::find_devices), also returning what changed locally
    ///
    /// A malformed reply fails the whole call and leaves the published tree
    /// untouched.
    pub fn find_devices_with_report(&self) -> Result<(i32, SyncReport), CallError> {
        let op = Operation::FindDevices;
        let mut session = self.driver.lock();
        let reply = session.call(op, |_| {})?;
        let mut cursor = reply.cursor();
        let changes = take_status(op, &mut cursor)?;

        let mut staged = DeviceTree::clone(&self.busses());
        let report = sync::reconcile(&mut staged, &mut cursor)?;
        self.publish(staged);
        drop(session);

        debug!("{}: returned {} ({:?})", op, changes, report);
        Ok((changes, report))
    }

    /// Open a device from the current tree
    pub fn open(&self, device: DeviceId) -> Result<DeviceHandle, CallError> {
        let op = Operation::Open;
        let tree = self.busses();
        let (location, devnum, bus) = tree
            .device(device)
            .and_then(|dev| tree.bus(dev.bus).map(|bus| (bus.location, dev.devnum, bus.id)))
            .ok_or(CallError::StaleDevice(device))?;

        let reply = self.driver.lock().call(op, |w| {
            w.integer(i64::from(location)).integer(i64::from(devnum));
        })?;
        let mut cursor = reply.cursor();
        let status = take_status(op, &mut cursor)?;
        if status < 0 {
            debug!("{}: returned {}", op, status);
            return Err(CallError::Rejected { op, status });
        }
        let session = cursor
            .take_scalar()?
            .ok_or(CallError::MissingField { op, field: "session id" })?;

        debug!("{}: returned {} (session {}) for {}", op, status, session, device);
        Ok(DeviceHandle::new(session, device, bus))
    }

    /// Close a device; the handle is consumed whatever the outcome
    pub fn close(&self, handle: DeviceHandle) -> Result<i32, CallError> {
        self.status_call(Operation::Close, |w| {
            w.integer(handle.session());
        })
    }

    pub fn set_configuration(
        &self,
        handle: &mut DeviceHandle,
        configuration: i32,
    ) -> Result<i32, CallError> {
        let (status, confirmed) =
            self.confirmed_call(Operation::SetConfiguration, handle, configuration)?;
        if status >= 0 {
            handle.configuration = Some(confirmed);
        }
        Ok(status)
    }

    pub fn set_alt_interface(
        &self,
        handle: &mut DeviceHandle,
        altsetting: i32,
    ) -> Result<i32, CallError> {
        let (status, confirmed) =
            self.confirmed_call(Operation::SetAltInterface, handle, altsetting)?;
        if status >= 0 {
            handle.altsetting = Some(confirmed);
        }
        Ok(status)
    }

    pub fn reset_endpoint(&self, handle: &DeviceHandle, endpoint: u8) -> Result<i32, CallError> {
        self.status_call(Operation::ResetEndpoint, |w| {
            w.integer(handle.session()).integer(i64::from(endpoint));
        })
    }

    pub fn clear_halt(&self, handle: &DeviceHandle, endpoint: u8) -> Result<i32, CallError> {
        self.status_call(Operation::ClearHalt, |w| {
            w.integer(handle.session()).integer(i64::from(endpoint));
        })
    }

    pub fn reset_device(&self, handle: &DeviceHandle) -> Result<i32, CallError> {
        self.status_call(Operation::ResetDevice, |w| {
            w.integer(handle.session());
        })
    }

    pub fn claim_interface(
        &self,
        handle: &mut DeviceHandle,
        interface: i32,
    ) -> Result<i32, CallError> {
        let status = self.status_call(Operation::ClaimInterface, |w| {
            w.integer(handle.session()).integer(i64::from(interface));
        })?;
        if status >= 0 {
            handle.interface = Some(interface);
        }
        Ok(status)
    }

    pub fn release_interface(
        &self,
        handle: &mut DeviceHandle,
        interface: i32,
    ) -> Result<i32, CallError> {
        let status = self.status_call(Operation::ReleaseInterface, |w| {
            w.integer(handle.session()).integer(i64::from(interface));
        })?;
        if status >= 0 && handle.interface == Some(interface) {
            handle.interface = None;
        }
        Ok(status)
    }

    pub fn detach_kernel_driver(
        &self,
        handle: &DeviceHandle,
        interface: i32,
    ) -> Result<i32, CallError> {
        self.status_call(Operation::DetachKernelDriver, |w| {
            w.integer(handle.session()).integer(i64::from(interface));
        })
    }

    /// Control transfer
    ///
    /// `buf` is sent as the data stage and, for a positive status, receives
    /// at most `buf.len()` bytes of the reply payload.
    #[allow(clippy::too_many_arguments)]
    pub fn control_msg(
        &self,
        handle: &DeviceHandle,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<i32, CallError> {
        let op = Operation::ControlTransfer;
        let data: &[u8] = buf;
        let reply = self.driver.lock().call(op, |w| {
            w.integer(handle.session())
                .integer(i64::from(request_type))
                .integer(i64::from(request))
                .integer(i64::from(value))
                .integer(i64::from(index))
                .octet(data)
                .integer(millis(timeout));
        })?;
        read_reply(op, &reply, buf)
    }

    pub fn bulk_read(
        &self,
        handle: &DeviceHandle,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<i32, CallError> {
        self.read_transfer(Operation::BulkRead, handle, endpoint, buf, timeout)
    }

    pub fn bulk_write(
        &self,
        handle: &DeviceHandle,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<i32, CallError> {
        self.write_transfer(Operation::BulkWrite, handle, endpoint, data, timeout)
    }

    pub fn interrupt_read(
        &self,
        handle: &DeviceHandle,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<i32, CallError> {
        self.read_transfer(Operation::InterruptRead, handle, endpoint, buf, timeout)
    }

    pub fn interrupt_write(
        &self,
        handle: &DeviceHandle,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<i32, CallError> {
        self.write_transfer(Operation::InterruptWrite, handle, endpoint, data, timeout)
    }

    /// Drop the mirrored tree
    ///
    /// The published tree is replaced by an empty one first. The old tree is
    /// released here unless a reader still holds its snapshot, in which case
    /// it goes away with the last snapshot and the tally is empty.
    pub fn shutdown(&self) -> Released {
        let _session = self.driver.lock();
        let empty = DeviceTree::with_ids(self.busses().ids.clone());
        let old = self.publish(empty);

        match Arc::try_unwrap(old) {
            Ok(tree) => lifecycle::release_tree(tree),
            Err(shared) => {
                debug!(
                    "Device tree still referenced by {} snapshots, deferring release",
                    Arc::strong_count(&shared) - 1
                );
                Released::default()
            }
        }
    }

    fn status_call(
        &self,
        op: Operation,
        build: impl FnOnce(&mut FieldWriter),
    ) -> Result<i32, CallError> {
        let reply = self.driver.lock().call(op, build)?;
        let status = take_status(op, &mut reply.cursor())?;
        debug!("{}: returned {}", op, status);
        Ok(status)
    }

    /// Call returning a status and the value the remote side settled on
    fn confirmed_call(
        &self,
        op: Operation,
        handle: &DeviceHandle,
        value: i32,
    ) -> Result<(i32, i32), CallError> {
        let reply = self.driver.lock().call(op, |w| {
            w.integer(handle.session()).integer(i64::from(value));
        })?;
        let mut cursor = reply.cursor();
        let status = take_status(op, &mut cursor)?;
        let confirmed = cursor.take_scalar()?.map(clamp_status).unwrap_or(value);
        debug!("{}: returned {} (value {})", op, status, confirmed);
        Ok((status, confirmed))
    }

    fn read_transfer(
        &self,
        op: Operation,
        handle: &DeviceHandle,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<i32, CallError> {
        let size = buf.len() as i64;
        let reply = self.driver.lock().call(op, |w| {
            w.integer(handle.session())
                .integer(i64::from(endpoint))
                .integer(size)
                .integer(millis(timeout));
        })?;
        read_reply(op, &reply, buf)
    }

    fn write_transfer(
        &self,
        op: Operation,
        handle: &DeviceHandle,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<i32, CallError> {
        self.status_call(op, |w| {
            w.integer(handle.session())
                .integer(i64::from(endpoint))
                .octet(data)
                .integer(millis(timeout));
        })
    }
}

impl UsbContext<ShmConnector> {
    /// Context using the shared memory handoff with default settings
    pub fn from_shm() -> Self {
        Self::new(ShmConnector::default())
    }
}

/// Decode a status plus optional payload, copying into `buf`
fn read_reply(op: Operation, reply: &Packet, buf: &mut [u8]) -> Result<i32, CallError> {
    let mut cursor = reply.cursor();
    let status = take_status(op, &mut cursor)?;
    let copied = match cursor.take_payload()? {
        Some(payload) => copy_clamped(buf, status, payload),
        None => 0,
    };
    debug!("{}: returned {} ({} bytes copied)", op, status, copied);
    Ok(status)
}

/// Copy `min(buf.len(), status, payload.len())` bytes; nothing for `status <= 0`
pub(crate) fn copy_clamped(buf: &mut [u8], status: i32, payload: &[u8]) -> usize {
    let Ok(status) = usize::try_from(status) else {
        return 0;
    };
    let len = buf.len().min(status).min(payload.len());
    buf[..len].copy_from_slice(&payload[..len]);
    len
}

fn millis(timeout: Duration) -> i64 {
    timeout.as_millis().min(i32::MAX as u128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::AdoptedConnector;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_copy_clamped() {
        let payload = [1u8, 2, 3, 4, 5, 6];

        let mut buf = [0u8; 4];
        assert_eq!(copy_clamped(&mut buf, 6, &payload), 4);
        assert_eq!(buf, [1, 2, 3, 4]);

        let mut buf = [0u8; 8];
        assert_eq!(copy_clamped(&mut buf, 2, &payload), 2);
        assert_eq!(&buf[..3], &[1, 2, 0]);

        let mut buf = [0u8; 8];
        assert_eq!(copy_clamped(&mut buf, 100, &payload[..3]), 3);

        let mut buf = [9u8; 4];
        assert_eq!(copy_clamped(&mut buf, 0, &payload), 0);
        assert_eq!(copy_clamped(&mut buf, -32, &payload), 0);
        assert_eq!(buf, [9; 4]);
    }

    #[test]
    fn test_millis() {
        assert_eq!(millis(Duration::from_secs(1)), 1000);
        assert_eq!(millis(Duration::from_secs(u64::MAX)), i64::from(i32::MAX));
    }

    #[test]
    fn test_context_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<UsbContext<AdoptedConnector<UnixStream>>>();
        assert_send_sync::<UsbContext>();
    }

    #[test]
    fn test_open_unknown_device_is_stale() {
        let (client, _agent) = UnixStream::pair().unwrap();
        let context = UsbContext::new(AdoptedConnector::new(client));
        assert!(matches!(
            context.open(DeviceId::new(42)),
            Err(CallError::StaleDevice(_))
        ));
    }

    #[test]
    fn test_shutdown_of_empty_context() {
        let (client, _agent) = UnixStream::pair().unwrap();
        let context = UsbContext::new(AdoptedConnector::new(client));
        assert!(context.shutdown().is_empty());
        assert!(context.busses().is_empty());
    }
}
