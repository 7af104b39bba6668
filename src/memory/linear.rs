//! Linear (1-D) device memory handle

use std::fmt;
use std::mem;
use std::ptr;
use std::rc::Rc;

use super::Allocation;
use crate::device::{DeviceApi, HostDevice};
use crate::error::{CopyKind, DeviceError, MemError, Result};
use crate::kernel::PtrSz;

/// Contiguous byte buffer in device memory with reference counting.
///
/// An owning handle carries a shared counter: clones bump it, `release` and
/// `Drop` lower it, and the memory goes back to the device when it reaches
/// zero. A handle from [`wrap`](Self::wrap) has no counter and never frees.
pub struct DeviceMemory<D: DeviceApi = HostDevice> {
    device: D,
    data: *mut u8,
    size_bytes: usize,
    refcount: Option<Rc<Allocation<D>>>,
}

impl<D: DeviceApi> DeviceMemory<D> {
    /// Create an empty handle. Nothing is allocated.
    pub fn new(device: D) -> Self {
        Self {
            device,
            data: ptr::null_mut(),
            size_bytes: 0,
            refcount: None,
        }
    }

    /// Allocate `size_bytes` bytes on `device`.
    pub fn with_size(device: D, size_bytes: usize) -> Result<Self> {
        let mut mem = Self::new(device);
        mem.create(size_bytes)?;
        Ok(mem)
    }

    /// Wrap caller-owned memory. Reference counting is disabled: releasing or
    /// dropping the handle never frees `data`, and it cannot be resized.
    ///
    /// A null `data` yields an empty handle.
    ///
    /// # Safety
    ///
    /// `data` must be valid for `size_bytes` bytes in `device`'s memory space
    /// for as long as this handle or any clone of it uses it.
    pub unsafe fn wrap(device: D, data: *mut u8, size_bytes: usize) -> Self {
        let size_bytes = if data.is_null() { 0 } else { size_bytes };
        Self {
            device,
            data,
            size_bytes,
            refcount: None,
        }
    }

    /// Make sure the handle holds exactly `size_bytes` bytes.
    ///
    /// Does nothing if it already does. Otherwise the current buffer is
    /// released and a new one allocated; old contents are not carried over.
    /// `size_bytes == 0` leaves the handle empty.
    pub fn create(&mut self, size_bytes: usize) -> Result<()> {
        if !self.is_empty() {
            if self.size_bytes == size_bytes {
                return Ok(());
            }
            if self.refcount.is_none() {
                return Err(MemError::ImmutableExternalBuffer {
                    current: self.size_bytes,
                    requested: size_bytes,
                });
            }
        }

        self.release();
        if size_bytes == 0 {
            return Ok(());
        }

        let ptr = self
            .device
            .allocate(size_bytes)
            .map_err(|e| MemError::allocation(size_bytes, e))?;
        self.refcount = Some(Rc::new(Allocation::new(
            self.device.clone(),
            ptr,
            size_bytes,
        )));
        self.data = ptr.as_ptr();
        self.size_bytes = size_bytes;
        Ok(())
    }

    /// Drop this handle's reference. The memory is freed if no other clone
    /// holds it. The handle is always empty afterwards.
    pub fn release(&mut self) {
        self.refcount = None;
        self.data = ptr::null_mut();
        self.size_bytes = 0;
    }

    /// Copy the contents into `other`, reallocating it if its size differs.
    ///
    /// Copying an empty handle releases `other`.
    pub fn copy_to(&self, other: &mut Self) -> Result<()> {
        if self.is_empty() {
            other.release();
            return Ok(());
        }

        other.create(self.size_bytes)?;
        unsafe {
            self.device.copy(
                CopyKind::DeviceToDevice,
                other.data,
                self.data,
                self.size_bytes,
            )
        }
        .map_err(|e| MemError::transfer(CopyKind::DeviceToDevice, e))
    }

    /// Upload host bytes, resizing the buffer to `host.len()` first.
    pub fn upload(&mut self, host: &[u8]) -> Result<()> {
        unsafe { self.upload_ptr(host.as_ptr(), host.len()) }
    }

    /// Upload `size_bytes` bytes from a raw host pointer.
    ///
    /// # Safety
    ///
    /// `host` must be readable for `size_bytes` bytes.
    pub unsafe fn upload_ptr(&mut self, host: *const u8, size_bytes: usize) -> Result<()> {
        self.create(size_bytes)?;
        self.device
            .copy(CopyKind::HostToDevice, self.data, host, size_bytes)
            .map_err(|e| MemError::transfer(CopyKind::HostToDevice, e))
    }

    /// Download the whole buffer into `host`, which must hold at least
    /// [`size_bytes`](Self::size_bytes) bytes. Extra bytes are left untouched.
    pub fn download(&self, host: &mut [u8]) -> Result<()> {
        if host.len() < self.size_bytes {
            return Err(MemError::transfer(
                CopyKind::DeviceToHost,
                DeviceError::geometry(format!(
                    "host buffer of {} bytes, device buffer holds {}",
                    host.len(),
                    self.size_bytes
                )),
            ));
        }
        unsafe { self.download_ptr(host.as_mut_ptr()) }
    }

    /// Download the whole buffer to a raw host pointer.
    ///
    /// # Safety
    ///
    /// `host` must be writable for [`size_bytes`](Self::size_bytes) bytes.
    pub unsafe fn download_ptr(&self, host: *mut u8) -> Result<()> {
        self.device
            .copy(CopyKind::DeviceToHost, host, self.data, self.size_bytes)
            .map_err(|e| MemError::transfer(CopyKind::DeviceToHost, e))
    }

    /// Exchange buffers with `other` without allocating or copying.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Check if the handle holds no memory
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_null()
    }

    /// Size of the buffer in bytes
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Pointer to the buffer, null when empty
    #[inline]
    pub fn ptr(&self) -> *const u8 {
        self.data
    }

    /// Mutable pointer to the buffer, null when empty
    #[inline]
    pub fn ptr_mut(&mut self) -> *mut u8 {
        self.data
    }

    /// Check if the handle owns (and will eventually free) its memory
    #[inline]
    pub fn is_owning(&self) -> bool {
        self.refcount.is_some()
    }

    /// Number of live handles sharing this allocation, 0 when not owning
    pub fn ref_count(&self) -> usize {
        self.refcount.as_ref().map_or(0, Rc::strong_count)
    }

    /// Get the device this handle allocates from
    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Kernel view of the buffer as `size_bytes / size_of::<T>()` elements.
    pub fn as_ptr_sz<T>(&self) -> PtrSz<T> {
        let count = self
            .size_bytes
            .checked_div(mem::size_of::<T>())
            .unwrap_or(0);
        PtrSz::new(self.data as *mut T, count)
    }
}

impl<D: DeviceApi> Clone for DeviceMemory<D> {
    /// Shares the allocation. Only the reference counter changes.
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            data: self.data,
            size_bytes: self.size_bytes,
            refcount: self.refcount.clone(),
        }
    }
}

impl<D: DeviceApi + Default> Default for DeviceMemory<D> {
    fn default() -> Self {
        Self::new(D::default())
    }
}

impl<D: DeviceApi> fmt::Debug for DeviceMemory<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMemory")
            .field("data", &self.data)
            .field("size_bytes", &self.size_bytes)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
