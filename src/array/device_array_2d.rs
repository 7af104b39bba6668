//! 2-D pitched typed device array

use std::fmt;
use std::marker::PhantomData;
use std::mem;

use super::bytes_for;
use crate::device::{DeviceApi, DeviceCopy, HostDevice};
use crate::error::{CopyKind, DeviceError, MemError, Result};
use crate::kernel::{DevPtr, PtrStep, PtrStepSz};
use crate::memory::{check_host_geometry, DeviceMemory2D};

/// Typed container for pitched device memory with reference counting.
///
/// Rows are `step_bytes()` apart; the step is chosen by the allocator and
/// may include padding. Use [`ptr`](Self::ptr) for row addressing.
pub struct DeviceArray2D<T: DeviceCopy, D: DeviceApi = HostDevice> {
    mem: DeviceMemory2D<D>,
    _elem: PhantomData<T>,
}

impl<T: DeviceCopy, D: DeviceApi> DeviceArray2D<T, D> {
    /// Size of one element in bytes
    pub const ELEM_SIZE: usize = mem::size_of::<T>();

    /// Create an empty array. Nothing is allocated.
    pub fn new(device: D) -> Self {
        Self::from_memory(DeviceMemory2D::new(device))
    }

    /// Allocate `rows` rows of `cols` elements.
    pub fn with_size(device: D, rows: usize, cols: usize) -> Result<Self> {
        let mut array = Self::new(device);
        array.create(rows, cols)?;
        Ok(array)
    }

    /// Wrap caller-owned pitched memory. Reference counting is disabled.
    ///
    /// # Safety
    ///
    /// Same contract as [`DeviceMemory2D::wrap`] with
    /// `cols * size_of::<T>()` bytes per row.
    pub unsafe fn wrap(
        device: D,
        rows: usize,
        cols: usize,
        data: *mut T,
        step_bytes: usize,
    ) -> Self {
        Self::from_memory(DeviceMemory2D::wrap(
            device,
            rows,
            cols.saturating_mul(Self::ELEM_SIZE),
            data as *mut u8,
            step_bytes,
        ))
    }

    fn from_memory(mem: DeviceMemory2D<D>) -> Self {
        Self {
            mem,
            _elem: PhantomData,
        }
    }

    /// Make sure the array holds `rows` x `cols` elements, reallocating only
    /// when either dimension changes.
    pub fn create(&mut self, rows: usize, cols: usize) -> Result<()> {
        self.mem.create(rows, bytes_for::<T>(cols, "column count")?)
    }

    /// Drop this array's reference to the buffer.
    pub fn release(&mut self) {
        self.mem.release();
    }

    /// Copy into `other`, reallocating it if its geometry differs.
    pub fn copy_to(&self, other: &mut Self) -> Result<()> {
        self.mem.copy_to(&mut other.mem)
    }

    /// Upload `rows` rows of `cols` elements whose starts are
    /// `host_step_bytes` apart in `host`.
    pub fn upload_pitched(
        &mut self,
        host: &[T],
        host_step_bytes: usize,
        rows: usize,
        cols: usize,
    ) -> Result<()> {
        let cols_bytes = bytes_for::<T>(cols, "column count")?;
        check_host_geometry(
            CopyKind::HostToDevice,
            mem::size_of_val(host),
            host_step_bytes,
            rows,
            cols_bytes,
        )?;
        unsafe {
            self.mem
                .upload_ptr(host.as_ptr() as *const u8, host_step_bytes, rows, cols_bytes)
        }
    }

    /// Download every row into `host`, row starts `host_step_bytes` apart.
    pub fn download_pitched(&self, host: &mut [T], host_step_bytes: usize) -> Result<()> {
        check_host_geometry(
            CopyKind::DeviceToHost,
            mem::size_of_val(host),
            host_step_bytes,
            self.rows(),
            self.mem.cols_bytes(),
        )?;
        unsafe { self.mem.download_ptr(host.as_mut_ptr() as *mut u8, host_step_bytes) }
    }

    /// Upload a tightly packed host matrix with `cols` elements per row.
    ///
    /// `host.len()` must be a multiple of `cols`.
    pub fn upload(&mut self, host: &[T], cols: usize) -> Result<()> {
        if host.is_empty() {
            return self.create(0, cols);
        }
        if cols == 0 || host.len() % cols != 0 {
            return Err(MemError::transfer(
                CopyKind::HostToDevice,
                DeviceError::geometry(format!(
                    "{} elements do not form rows of {}",
                    host.len(),
                    cols
                )),
            ));
        }
        let host_step = bytes_for::<T>(cols, "column count")?;
        self.upload_pitched(host, host_step, host.len() / cols, cols)
    }

    /// Download into a tightly packed vector, resized to `rows * cols`.
    ///
    /// Returns the number of columns, which is the row length of `host`.
    pub fn download(&self, host: &mut Vec<T>) -> Result<usize> {
        let (rows, cols) = (self.rows(), self.cols());
        let len = rows * cols;
        host.clear();
        host.reserve(len);
        // Safety: capacity covers `rows * cols` elements packed at
        // `cols * size_of::<T>()` bytes per row.
        unsafe {
            self.mem
                .download_ptr(host.as_mut_ptr() as *mut u8, cols * Self::ELEM_SIZE)?;
            host.set_len(len);
        }
        Ok(cols)
    }

    /// Download into a fresh tightly packed vector.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut host = Vec::new();
        self.download(&mut host)?;
        Ok(host)
    }

    /// Exchange buffers with `other` without allocating or copying.
    pub fn swap(&mut self, other: &mut Self) {
        self.mem.swap(&mut other.mem);
    }

    /// Pointer to the first element of row `row`, `row * step_bytes()` bytes
    /// past the base. Not bounds checked.
    #[inline]
    pub fn ptr(&self, row: usize) -> *const T {
        self.mem.ptr(row) as *const T
    }

    /// Mutable pointer to the first element of row `row`. Not bounds checked.
    #[inline]
    pub fn ptr_mut(&mut self, row: usize) -> *mut T {
        self.mem.ptr_mut(row) as *mut T
    }

    /// Number of rows
    #[inline]
    pub fn rows(&self) -> usize {
        self.mem.rows()
    }

    /// Elements per row
    #[inline]
    pub fn cols(&self) -> usize {
        self.mem
            .cols_bytes()
            .checked_div(Self::ELEM_SIZE)
            .unwrap_or(0)
    }

    /// Row stride in bytes
    #[inline]
    pub fn step_bytes(&self) -> usize {
        self.mem.step()
    }

    /// Row stride in elements, `step_bytes() / size_of::<T>()`.
    ///
    /// Truncates when the allocator's padding is not a multiple of the
    /// element size; do not use it for pointer arithmetic in that case,
    /// use [`ptr`](Self::ptr) instead.
    #[inline]
    pub fn elem_step(&self) -> usize {
        self.mem.step().checked_div(Self::ELEM_SIZE).unwrap_or(0)
    }

    /// Check if the array holds no memory
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Number of live handles sharing this buffer, 0 when not owning
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.mem.ref_count()
    }

    /// Check if the array owns its memory
    #[inline]
    pub fn is_owning(&self) -> bool {
        self.mem.is_owning()
    }

    /// Get the device this array allocates from
    #[inline]
    pub fn device(&self) -> &D {
        self.mem.device()
    }

    /// Underlying byte handle
    #[inline]
    pub fn as_memory(&self) -> &DeviceMemory2D<D> {
        &self.mem
    }

    /// Kernel view: bare pointer
    pub fn as_dev_ptr(&self) -> DevPtr<T> {
        DevPtr::new(self.ptr(0) as *mut T)
    }

    /// Kernel view: pointer and byte step
    pub fn as_ptr_step(&self) -> PtrStep<T> {
        PtrStep::new(self.ptr(0) as *mut T, self.step_bytes())
    }

    /// Kernel view: pointer, byte step and dimensions
    pub fn as_ptr_step_sz(&self) -> PtrStepSz<T> {
        self.mem.as_ptr_step_sz()
    }
}

impl<T: DeviceCopy, D: DeviceApi> Clone for DeviceArray2D<T, D> {
    /// Shares the buffer. Only the reference counter changes.
    fn clone(&self) -> Self {
        Self::from_memory(self.mem.clone())
    }
}

impl<T: DeviceCopy, D: DeviceApi + Default> Default for DeviceArray2D<T, D> {
    fn default() -> Self {
        Self::new(D::default())
    }
}

impl<T: DeviceCopy, D: DeviceApi> fmt::Debug for DeviceArray2D<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceArray2D")
            .field("data", &self.ptr(0))
            .field("rows", &self.rows())
            .field("cols", &self.cols())
            .field("step_bytes", &self.step_bytes())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
