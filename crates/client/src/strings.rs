//! Descriptor and string helpers built on control transfers

use crate::context::UsbContext;
use crate::error::{CallError, StringError};
use crate::handle::DeviceHandle;
use crate::transport::Connector;
use protocol::descriptors::{DT_STRING, ENDPOINT_IN, REQ_GET_DESCRIPTOR};
use std::time::Duration;
use tracing::debug;

/// Timeout of descriptor requests
pub const DESCRIPTOR_TIMEOUT: Duration = Duration::from_millis(1000);

/// Largest string descriptor requested; some devices choke on more
const STRING_BUFFER_SIZE: usize = 255;

impl<C: Connector> UsbContext<C> {
    /// GET_DESCRIPTOR for `descriptor_type` / `index`
    pub fn get_descriptor(
        &self,
        handle: &DeviceHandle,
        descriptor_type: u8,
        index: u8,
        buf: &mut [u8],
    ) -> Result<i32, CallError> {
        self.control_msg(
            handle,
            ENDPOINT_IN,
            REQ_GET_DESCRIPTOR,
            (u16::from(descriptor_type) << 8) | u16::from(index),
            0,
            buf,
            DESCRIPTOR_TIMEOUT,
        )
    }

    /// Raw string descriptor `index` in language `langid`
    pub fn get_string(
        &self,
        handle: &DeviceHandle,
        index: u8,
        langid: u16,
        buf: &mut [u8],
    ) -> Result<i32, CallError> {
        self.control_msg(
            handle,
            ENDPOINT_IN,
            REQ_GET_DESCRIPTOR,
            (u16::from(DT_STRING) << 8) | u16::from(index),
            langid,
            buf,
            DESCRIPTOR_TIMEOUT,
        )
    }

    /// String descriptor `index` in the device's first language, as ASCII
    ///
    /// Writes at most `buf.len() - 1` characters followed by a NUL and
    /// returns the number of characters. Characters outside Latin-1 become
    /// `?`.
    pub fn get_string_simple(
        &self,
        handle: &DeviceHandle,
        index: u8,
        buf: &mut [u8],
    ) -> Result<usize, StringError> {
        if buf.is_empty() {
            return Err(StringError::BufferTooSmall);
        }

        // String zero lists the supported language ids
        let mut tbuf = [0u8; STRING_BUFFER_SIZE];
        let ret = self.get_string(handle, 0, 0, &mut tbuf)?;
        if ret < 0 {
            return Err(StringError::Transfer { status: ret });
        }
        if ret < 4 {
            return Err(StringError::ShortLanguageTable { len: ret });
        }
        let langid = u16::from_le_bytes([tbuf[2], tbuf[3]]);

        tbuf.fill(0);
        let ret = self.get_string(handle, index, langid, &mut tbuf)?;
        if ret < 0 {
            return Err(StringError::Transfer { status: ret });
        }
        if tbuf[1] != DT_STRING {
            return Err(StringError::WrongDescriptorType(tbuf[1]));
        }
        if i32::from(tbuf[0]) > ret {
            return Err(StringError::Overflow {
                declared: tbuf[0],
                received: ret,
            });
        }

        let declared = usize::from(tbuf[0]).max(2);
        let written = transliterate(&tbuf[2..declared], buf);
        debug!(
            "get_string_simple: index {} langid 0x{:04x} returned {}",
            index, langid, written
        );
        Ok(written)
    }

    /// Owned variant of [`get_string_simple`](Self::get_string_simple)
    pub fn read_string(&self, handle: &DeviceHandle, index: u8) -> Result<String, StringError> {
        let mut buf = [0u8; STRING_BUFFER_SIZE + 1];
        let len = self.get_string_simple(handle, index, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
    }
}

/// UTF-16LE code units to ASCII plus NUL, `?` for any non-zero high byte
///
/// `out` must not be empty.
fn transliterate(units: &[u8], out: &mut [u8]) -> usize {
    let limit = out.len() - 1;
    let mut written = 0;
    for unit in units.chunks(2).take(limit) {
        let high = unit.get(1).copied().unwrap_or(0);
        out[written] = if high != 0 { b'?' } else { unit[0] };
        written += 1;
    }
    out[written] = 0;
    written
}
