//! Channel handoff through a SysV shared memory segment
//!
//! The launcher connects to the agent, then publishes the socket's
//! descriptor number in a small segment under a well-known key. The shim
//! reads that number and uses the descriptor without taking ownership of
//! it: dropping the channel never closes the shared socket.

use super::{Channel, Connector};
use nix::sys::socket::{SockaddrStorage, getpeername};
use std::fs::File;
use std::io::{self, Read, Write};
use std::mem::ManuallyDrop;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::ptr;
use tracing::debug;

/// Default segment key ("USBN")
pub const DEFAULT_SHM_KEY: i32 = 0x5553_424e;

/// Default segment size in bytes
pub const DEFAULT_SHM_SIZE: usize = 4;

/// Width of the descriptor number stored in the segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandleWidth {
    #[default]
    Four,
    Eight,
}

impl HandleWidth {
    pub fn from_bytes(width: u8) -> Option<Self> {
        match width {
            4 => Some(HandleWidth::Four),
            8 => Some(HandleWidth::Eight),
            _ => None,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            HandleWidth::Four => 4,
            HandleWidth::Eight => 8,
        }
    }
}

/// Decode the descriptor number from the start of the segment
///
/// The launcher writes it in native byte order.
pub fn decode_handle(bytes: &[u8], width: HandleWidth) -> io::Result<RawFd> {
    let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidData, msg);

    let value = match width {
        HandleWidth::Four => {
            let raw: [u8; 4] = bytes
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| invalid(format!("segment holds {} bytes", bytes.len())))?;
            i64::from(i32::from_ne_bytes(raw))
        }
        HandleWidth::Eight => {
            let raw: [u8; 8] = bytes
                .get(..8)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| invalid(format!("segment holds {} bytes", bytes.len())))?;
            i64::from_ne_bytes(raw)
        }
    };

    match RawFd::try_from(value) {
        Ok(fd) if fd >= 0 => Ok(fd),
        _ => Err(invalid(format!("invalid descriptor number {}", value))),
    }
}

/// Detaches the segment on drop
struct Attached(*mut libc::c_void);

impl Drop for Attached {
    fn drop(&mut self) {
        // SAFETY: the address came from a successful shmat and is detached once
        unsafe {
            libc::shmdt(self.0);
        }
    }
}

/// Read the descriptor number published under `key`
fn read_segment(key: i32, size: usize, width: HandleWidth) -> io::Result<RawFd> {
    if size < width.bytes() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("segment size {} is smaller than a {}-byte handle", size, width.bytes()),
        ));
    }

    debug!("IPC: accessing segment at key 0x{:x} ({} bytes)", key, size);
    // SAFETY: shmget only inspects its arguments
    let id = unsafe { libc::shmget(key as libc::key_t, size, 0o666) };
    if id < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: id names an existing segment; a null address lets the kernel choose
    let addr = unsafe { libc::shmat(id, ptr::null(), libc::SHM_RDONLY) };
    if addr as isize == -1 {
        return Err(io::Error::last_os_error());
    }
    let segment = Attached(addr);

    // SAFETY: the segment is attached and at least `size` bytes long
    let bytes = unsafe { std::slice::from_raw_parts(segment.0 as *const u8, size) };
    decode_handle(bytes, width)
}

/// Imports the control channel from the shared memory handoff
#[derive(Debug, Clone)]
pub struct ShmConnector {
    key: i32,
    size: usize,
    width: HandleWidth,
}

impl ShmConnector {
    pub fn new(key: i32, size: usize, width: HandleWidth) -> Self {
        Self { key, size, width }
    }
}

impl Default for ShmConnector {
    fn default() -> Self {
        Self::new(DEFAULT_SHM_KEY, DEFAULT_SHM_SIZE, HandleWidth::Four)
    }
}

impl Connector for ShmConnector {
    type Channel = FdChannel;

    fn import(&mut self) -> io::Result<FdChannel> {
        let fd = read_segment(self.key, self.size, self.width)?;
        debug!("IPC: remote fd is {}", fd);
        Ok(FdChannel::borrowed(fd))
    }
}

/// Channel over a descriptor owned by someone else
pub struct FdChannel {
    file: ManuallyDrop<File>,
}

impl FdChannel {
    /// Wrap `fd` without taking ownership
    pub fn borrowed(fd: RawFd) -> Self {
        // SAFETY: the File is never dropped, so the descriptor is never closed here
        let file = unsafe { File::from_raw_fd(fd) };
        Self {
            file: ManuallyDrop::new(file),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl Read for FdChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self.file).read(buf)
    }
}

impl Write for FdChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self.file).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self.file).flush()
    }
}

impl Channel for FdChannel {
    fn probe(&self) -> io::Result<()> {
        getpeername::<SockaddrStorage>(self.raw_fd())
            .map(|_| ())
            .map_err(io::Error::from)
    }
}
