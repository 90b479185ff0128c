//! Transfer layer between host values and guest linear memory.
//!
//! Guest addresses are plain `u32` offsets into the module's linear memory.
//! Every access is bounds-checked against the memory's current size, which
//! can change whenever the guest runs.

use super::session::Session;
use crate::error::{Result, SitterError};
use crate::record::{le_u16, le_u32};

/// A block of guest memory allocated by the host.
///
/// Not `Copy` or `Clone`: [`Session::release`] consumes it, so a buffer can
/// be released at most once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "guest buffers leak until released or the session ends"]
pub struct GuestBuffer {
    address: u32,
    len: u32,
}

impl GuestBuffer {
    /// Guest address of the first byte.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Number of bytes requested.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Give up the token once something else owns the memory.
    pub(crate) fn into_address(self) -> u32 {
        self.address
    }
}

impl Session {
    /// Allocate `len` bytes with the guest's `malloc`.
    pub fn allocate(&mut self, len: u32) -> Result<GuestBuffer> {
        // malloc(0) may legitimately return NULL; always ask for at least a byte.
        let address = self.call("malloc", |e| &e.malloc, len.max(1))?;
        if address == 0 {
            return Err(SitterError::AllocationFailure { requested: len });
        }
        Ok(GuestBuffer { address, len })
    }

    /// Return a buffer to the guest's `free`.
    pub fn release(&mut self, buffer: GuestBuffer) -> Result<()> {
        self.free_address(buffer.address)
    }

    pub(crate) fn free_address(&mut self, address: u32) -> Result<()> {
        if address == 0 {
            return Ok(());
        }
        self.call("free", |e| &e.free, address)
    }

    /// Allocate a buffer and copy `bytes` into it.
    pub fn write_buffer(&mut self, bytes: &[u8]) -> Result<GuestBuffer> {
        let len = u32::try_from(bytes.len()).map_err(|_| SitterError::AllocationFailure {
            requested: u32::MAX,
        })?;
        let buffer = self.allocate(len)?;
        match self.write_bytes(buffer.address, bytes) {
            Ok(()) => Ok(buffer),
            Err(e) => self.release_after_error(buffer, e),
        }
    }

    /// Copy `s` into guest memory as a NUL-terminated string.
    pub fn write_string(&mut self, s: &str) -> Result<GuestBuffer> {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.write_buffer(&bytes)
    }

    /// Write bytes at a guest address.
    pub fn write_bytes(&mut self, address: u32, bytes: &[u8]) -> Result<()> {
        self.ensure_usable("write_bytes")?;
        let memory = *self.memory();
        let data = memory.data_mut(self.store_mut());
        let memory_size = data.len();
        let start = address as usize;
        let dest = start
            .checked_add(bytes.len())
            .and_then(|end| data.get_mut(start..end))
            .ok_or(SitterError::OutOfBounds {
                address,
                len: bytes.len() as u64,
                memory_size,
            })?;
        dest.copy_from_slice(bytes);
        Ok(())
    }

    /// Read `len` bytes at a guest address.
    pub fn read_bytes(&self, address: u32, len: u32) -> Result<Vec<u8>> {
        self.ensure_usable("read_bytes")?;
        self.bytes_at(address, len).map(<[u8]>::to_vec)
    }

    /// Read a NUL-terminated string. The length comes from the guest's
    /// `strlen`, not from scanning host-side.
    pub fn read_c_string(&mut self, address: u32) -> Result<String> {
        let len = self.call("strlen", |e| &e.strlen, address)?;
        self.read_string(address, len)
    }

    /// Read a UTF-8 string of known length.
    pub(crate) fn read_string(&self, address: u32, len: u32) -> Result<String> {
        let bytes = self.read_bytes(address, len)?;
        String::from_utf8(bytes).map_err(|_| SitterError::InvalidString { address })
    }

    /// Read a little-endian `u16`.
    pub fn read_u16_le(&self, address: u32) -> Result<u16> {
        self.ensure_usable("read_u16_le")?;
        self.bytes_at(address, 2).map(le_u16)
    }

    /// Read a little-endian `u32`.
    pub fn read_u32_le(&self, address: u32) -> Result<u32> {
        self.ensure_usable("read_u32_le")?;
        self.bytes_at(address, 4).map(le_u32)
    }

    /// Current size of guest linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory().data_size(self.store())
    }

    /// Guest memory as a byte slice, for record decoding.
    pub(crate) fn guest_memory(&self) -> &[u8] {
        self.memory().data(self.store())
    }

    /// Run `body` with a scratch buffer that is released on every exit path.
    ///
    /// Release happens after `body` returns, so the body may still read the
    /// buffer while building an error. A body error wins over a release error.
    pub(crate) fn with_scratch<T>(
        &mut self,
        buffer: GuestBuffer,
        body: impl FnOnce(&mut Self, u32) -> Result<T>,
    ) -> Result<T> {
        let address = buffer.address;
        let outcome = body(self, address);
        let released = if self.is_poisoned() {
            Ok(())
        } else {
            self.release(buffer)
        };
        let value = outcome?;
        released?;
        Ok(value)
    }

    /// Release `buffer` on an error path and hand back `error`.
    ///
    /// A release failure is logged rather than returned so the original error survives.
    pub(crate) fn release_after_error<T>(
        &mut self,
        buffer: GuestBuffer,
        error: SitterError,
    ) -> Result<T> {
        if !self.is_poisoned() {
            let address = buffer.address;
            if let Err(e) = self.release(buffer) {
                tracing::warn!(session = self.id(), address, "release after error failed: {}", e);
            }
        }
        Err(error)
    }

    fn bytes_at(&self, address: u32, len: u32) -> Result<&[u8]> {
        let data = self.guest_memory();
        let start = address as usize;
        start
            .checked_add(len as usize)
            .and_then(|end| data.get(start..end))
            .ok_or(SitterError::OutOfBounds {
                address,
                len: len as u64,
                memory_size: data.len(),
            })
    }
}
