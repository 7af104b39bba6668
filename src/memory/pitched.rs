//! Pitched (2-D) device memory handle

use std::fmt;
use std::mem;
use std::ptr;
use std::rc::Rc;

use super::{check_host_geometry, Allocation};
use crate::device::{DeviceApi, HostDevice};
use crate::error::{CopyKind, MemError, Result};
use crate::kernel::PtrStepSz;

/// Row-strided byte buffer in device memory with reference counting.
///
/// Each of `rows` rows holds `cols_bytes` meaningful bytes followed by
/// padding up to `step`, the stride the allocator picked. Ownership follows
/// [`DeviceMemory`](super::DeviceMemory).
pub struct DeviceMemory2D<D: DeviceApi = HostDevice> {
    device: D,
    data: *mut u8,
    step: usize,
    rows: usize,
    cols_bytes: usize,
    refcount: Option<Rc<Allocation<D>>>,
}

impl<D: DeviceApi> DeviceMemory2D<D> {
    /// Create an empty handle. Nothing is allocated.
    pub fn new(device: D) -> Self {
        Self {
            device,
            data: ptr::null_mut(),
            step: 0,
            rows: 0,
            cols_bytes: 0,
            refcount: None,
        }
    }

    /// Allocate `rows` rows of `cols_bytes` bytes on `device`.
    pub fn with_size(device: D, rows: usize, cols_bytes: usize) -> Result<Self> {
        let mut mem = Self::new(device);
        mem.create(rows, cols_bytes)?;
        Ok(mem)
    }

    /// Wrap caller-owned pitched memory. Reference counting is disabled.
    ///
    /// A null `data` yields an empty handle.
    ///
    /// # Safety
    ///
    /// `data` must be valid for `rows` rows at `step` bytes apart, each with
    /// at least `cols_bytes` bytes, and `step >= cols_bytes`.
    pub unsafe fn wrap(
        device: D,
        rows: usize,
        cols_bytes: usize,
        data: *mut u8,
        step: usize,
    ) -> Self {
        debug_assert!(step >= cols_bytes, "row step smaller than row width");
        if data.is_null() {
            return Self::new(device);
        }
        Self {
            device,
            data,
            step,
            rows,
            cols_bytes,
            refcount: None,
        }
    }

    /// Make sure the handle holds `rows` rows of `cols_bytes` bytes.
    ///
    /// Does nothing when both dimensions already match. Otherwise the
    /// current buffer is released and a new pitched one allocated; contents
    /// are not carried over. A zero dimension leaves the handle empty.
    pub fn create(&mut self, rows: usize, cols_bytes: usize) -> Result<()> {
        if !self.is_empty() {
            if self.rows == rows && self.cols_bytes == cols_bytes {
                return Ok(());
            }
            if self.refcount.is_none() {
                return Err(MemError::ImmutableExternalBuffer {
                    current: self.rows.saturating_mul(self.cols_bytes),
                    requested: rows.saturating_mul(cols_bytes),
                });
            }
        }

        self.release();
        if rows == 0 || cols_bytes == 0 {
            return Ok(());
        }

        let requested = rows.saturating_mul(cols_bytes);
        let (ptr, step) = self
            .device
            .allocate_pitched(cols_bytes, rows)
            .map_err(|e| MemError::allocation(requested, e))?;
        self.refcount = Some(Rc::new(Allocation::new(
            self.device.clone(),
            ptr,
            step * rows,
        )));
        self.data = ptr.as_ptr();
        self.step = step;
        self.rows = rows;
        self.cols_bytes = cols_bytes;
        Ok(())
    }

    /// Drop this handle's reference; frees when it was the last one.
    pub fn release(&mut self) {
        self.refcount = None;
        self.data = ptr::null_mut();
        self.step = 0;
        self.rows = 0;
        self.cols_bytes = 0;
    }

    /// Copy the contents into `other`, reallocating it if its geometry differs.
    pub fn copy_to(&self, other: &mut Self) -> Result<()> {
        if self.is_empty() {
            other.release();
            return Ok(());
        }

        other.create(self.rows, self.cols_bytes)?;
        unsafe {
            self.device.copy_2d(
                CopyKind::DeviceToDevice,
                other.data,
                other.step,
                self.data,
                self.step,
                self.cols_bytes,
                self.rows,
            )
        }
        .map_err(|e| MemError::transfer(CopyKind::DeviceToDevice, e))
    }

    /// Upload `rows` rows of `cols_bytes` bytes laid out `host_step` bytes
    /// apart in `host`. Resizes the buffer first.
    pub fn upload(
        &mut self,
        host: &[u8],
        host_step: usize,
        rows: usize,
        cols_bytes: usize,
    ) -> Result<()> {
        check_host_geometry(CopyKind::HostToDevice, host.len(), host_step, rows, cols_bytes)?;
        unsafe { self.upload_ptr(host.as_ptr(), host_step, rows, cols_bytes) }
    }

    /// Strided upload from a raw host pointer.
    ///
    /// # Safety
    ///
    /// `host` must be readable for `rows` rows of `cols_bytes` bytes at
    /// `host_step` bytes apart.
    pub unsafe fn upload_ptr(
        &mut self,
        host: *const u8,
        host_step: usize,
        rows: usize,
        cols_bytes: usize,
    ) -> Result<()> {
        self.create(rows, cols_bytes)?;
        if self.is_empty() {
            return Ok(());
        }
        self.device
            .copy_2d(
                CopyKind::HostToDevice,
                self.data,
                self.step,
                host,
                host_step,
                self.cols_bytes,
                self.rows,
            )
            .map_err(|e| MemError::transfer(CopyKind::HostToDevice, e))
    }

    /// Download every row into `host`, `host_step` bytes apart.
    pub fn download(&self, host: &mut [u8], host_step: usize) -> Result<()> {
        check_host_geometry(
            CopyKind::DeviceToHost,
            host.len(),
            host_step,
            self.rows,
            self.cols_bytes,
        )?;
        unsafe { self.download_ptr(host.as_mut_ptr(), host_step) }
    }

    /// Strided download to a raw host pointer.
    ///
    /// # Safety
    ///
    /// `host` must be writable for [`rows`](Self::rows) rows of
    /// [`cols_bytes`](Self::cols_bytes) bytes at `host_step` bytes apart.
    pub unsafe fn download_ptr(&self, host: *mut u8, host_step: usize) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        self.device
            .copy_2d(
                CopyKind::DeviceToHost,
                host,
                host_step,
                self.data,
                self.step,
                self.cols_bytes,
                self.rows,
            )
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

    /// Number of rows
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Meaningful bytes per row
    #[inline]
    pub fn cols_bytes(&self) -> usize {
        self.cols_bytes
    }

    /// Stride between consecutive rows in bytes
    #[inline]
    pub fn step(&self) -> usize {
        self.step
    }

    /// Total span of the buffer in bytes, padding included
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.step * self.rows
    }

    /// Pointer to the start of row `row`, computed as `row * step` bytes
    /// past the base. Not bounds checked.
    #[inline]
    pub fn ptr(&self, row: usize) -> *const u8 {
        self.data.wrapping_add(row.wrapping_mul(self.step))
    }

    /// Mutable pointer to the start of row `row`. Not bounds checked.
    #[inline]
    pub fn ptr_mut(&mut self, row: usize) -> *mut u8 {
        self.data.wrapping_add(row.wrapping_mul(self.step))
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

    /// Kernel view with `cols_bytes / size_of::<T>()` columns.
    pub fn as_ptr_step_sz<T>(&self) -> PtrStepSz<T> {
        let cols = self
            .cols_bytes
            .checked_div(mem::size_of::<T>())
            .unwrap_or(0);
        PtrStepSz::new(self.rows, cols, self.data as *mut T, self.step)
    }
}

impl<D: DeviceApi> Clone for DeviceMemory2D<D> {
    /// Shares the allocation. Only the reference counter changes.
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            data: self.data,
            step: self.step,
            rows: self.rows,
            cols_bytes: self.cols_bytes,
            refcount: self.refcount.clone(),
        }
    }
}

impl<D: DeviceApi + Default> Default for DeviceMemory2D<D> {
    fn default() -> Self {
        Self::new(D::default())
    }
}

impl<D: DeviceApi> fmt::Debug for DeviceMemory2D<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMemory2D")
            .field("data", &self.data)
            .field("rows", &self.rows)
            .field("cols_bytes", &self.cols_bytes)
            .field("step", &self.step)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
