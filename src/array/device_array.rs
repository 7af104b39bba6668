//! 1-D typed device array

use std::fmt;
use std::marker::PhantomData;
use std::mem;

use super::bytes_for;
use crate::device::{DeviceApi, DeviceCopy, HostDevice};
use crate::error::{CopyKind, DeviceError, MemError, Result};
use crate::kernel::{DevPtr, PtrSz};
use crate::memory::DeviceMemory;

/// Typed container for device memory with reference counting.
///
/// Cloning shares the buffer; see [`DeviceMemory`] for the ownership rules.
///
/// ```
/// use devmem::{DeviceArray, HostDevice};
///
/// let mut array = DeviceArray::<i32>::new(HostDevice::new());
/// array.upload(&[1, 2, 3, 4]).unwrap();
///
/// let mut host = [0; 4];
/// array.download(&mut host).unwrap();
/// assert_eq!(host, [1, 2, 3, 4]);
/// ```
pub struct DeviceArray<T: DeviceCopy, D: DeviceApi = HostDevice> {
    mem: DeviceMemory<D>,
    _elem: PhantomData<T>,
}

impl<T: DeviceCopy, D: DeviceApi> DeviceArray<T, D> {
    /// Size of one element in bytes
    pub const ELEM_SIZE: usize = mem::size_of::<T>();

    /// Create an empty array. Nothing is allocated.
    pub fn new(device: D) -> Self {
        Self::from_memory(DeviceMemory::new(device))
    }

    /// Allocate room for `len` elements.
    pub fn with_len(device: D, len: usize) -> Result<Self> {
        let mut array = Self::new(device);
        array.create(len)?;
        Ok(array)
    }

    /// Allocate and upload `host` in one step.
    pub fn from_host(device: D, host: &[T]) -> Result<Self> {
        let mut array = Self::new(device);
        array.upload(host)?;
        Ok(array)
    }

    /// Wrap caller-owned device memory of `len` elements. Reference counting
    /// is disabled and the array cannot be resized.
    ///
    /// # Safety
    ///
    /// Same contract as [`DeviceMemory::wrap`] for `len * size_of::<T>()`
    /// bytes.
    pub unsafe fn wrap(device: D, data: *mut T, len: usize) -> Self {
        Self::from_memory(DeviceMemory::wrap(
            device,
            data as *mut u8,
            len.saturating_mul(Self::ELEM_SIZE),
        ))
    }

    fn from_memory(mem: DeviceMemory<D>) -> Self {
        Self {
            mem,
            _elem: PhantomData,
        }
    }

    /// Make sure the array holds exactly `len` elements, reallocating (and
    /// dropping old contents) only when the size changes.
    pub fn create(&mut self, len: usize) -> Result<()> {
        self.mem.create(bytes_for::<T>(len, "element count")?)
    }

    /// Drop this array's reference to the buffer.
    pub fn release(&mut self) {
        self.mem.release();
    }

    /// Copy into `other`, reallocating it if its length differs.
    pub fn copy_to(&self, other: &mut Self) -> Result<()> {
        self.mem.copy_to(&mut other.mem)
    }

    /// Upload `host`, resizing the array to `host.len()` elements.
    pub fn upload(&mut self, host: &[T]) -> Result<()> {
        let size_bytes = bytes_for::<T>(host.len(), "host slice")?;
        unsafe { self.mem.upload_ptr(host.as_ptr() as *const u8, size_bytes) }
    }

    /// Download every element into `host`, which must hold at least
    /// [`len`](Self::len) elements.
    pub fn download(&self, host: &mut [T]) -> Result<()> {
        if host.len() < self.len() {
            return Err(MemError::transfer(
                CopyKind::DeviceToHost,
                DeviceError::geometry(format!(
                    "host slice of {} elements, array holds {}",
                    host.len(),
                    self.len()
                )),
            ));
        }
        unsafe { self.mem.download_ptr(host.as_mut_ptr() as *mut u8) }
    }

    /// Download into a vector, resizing it to [`len`](Self::len).
    pub fn download_vec(&self, host: &mut Vec<T>) -> Result<()> {
        let len = self.len();
        host.clear();
        host.reserve(len);
        // Safety: capacity covers `len` elements and `T: DeviceCopy` accepts
        // any bytes the device hands back.
        unsafe {
            self.mem.download_ptr(host.as_mut_ptr() as *mut u8)?;
            host.set_len(len);
        }
        Ok(())
    }

    /// Download into a fresh vector.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut host = Vec::new();
        self.download_vec(&mut host)?;
        Ok(host)
    }

    /// Exchange buffers with `other` without allocating or copying.
    pub fn swap(&mut self, other: &mut Self) {
        self.mem.swap(&mut other.mem);
    }

    /// Number of elements
    #[inline]
    pub fn len(&self) -> usize {
        self.mem
            .size_bytes()
            .checked_div(Self::ELEM_SIZE)
            .unwrap_or(0)
    }

    /// Check if the array holds no memory
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Pointer to the first element. Valid until the array is released or
    /// re-created with a different length.
    #[inline]
    pub fn ptr(&self) -> *const T {
        self.mem.ptr() as *const T
    }

    /// Mutable pointer to the first element
    #[inline]
    pub fn ptr_mut(&mut self) -> *mut T {
        self.mem.ptr_mut() as *mut T
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
    pub fn as_memory(&self) -> &DeviceMemory<D> {
        &self.mem
    }

    /// Kernel view: bare pointer
    pub fn as_dev_ptr(&self) -> DevPtr<T> {
        DevPtr::new(self.mem.ptr() as *mut T)
    }

    /// Kernel view: pointer and element count
    pub fn as_ptr_sz(&self) -> PtrSz<T> {
        self.mem.as_ptr_sz()
    }
}

impl<T: DeviceCopy, D: DeviceApi> Clone for DeviceArray<T, D> {
    /// Shares the buffer. Only the reference counter changes.
    fn clone(&self) -> Self {
        Self::from_memory(self.mem.clone())
    }
}

impl<T: DeviceCopy, D: DeviceApi + Default> Default for DeviceArray<T, D> {
    fn default() -> Self {
        Self::new(D::default())
    }
}

impl<T: DeviceCopy, D: DeviceApi> fmt::Debug for DeviceArray<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceArray")
            .field("data", &self.ptr())
            .field("len", &self.len())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
