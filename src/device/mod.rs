//! External memory API
//!
//! The handle layers never touch device memory directly. Every allocation,
//! free and transfer goes through a [`DeviceApi`] implementation, which plays
//! the role of the driver: `cudaMalloc`/`cudaFree`/`cudaMemcpy` on a GPU, or
//! [`HostDevice`] for page-mapped process memory.
//!
//! # Architecture
//!
//! ```text
//! DeviceArray<T> / DeviceArray2D<T>     typed containers
//!          │
//!          ▼
//! DeviceMemory / DeviceMemory2D         ref-counted byte handles
//!          │
//!          ▼
//! DeviceApi                             allocate / free / copy / copy_2d
//!          │
//!     ┌────┴─────┐
//!     ▼          ▼
//! HostDevice   GPU driver bindings
//! ```

mod host;

pub use host::{DeviceStats, HostDevice};

use std::ptr::NonNull;

use crate::error::{CopyKind, DeviceError};

/// Allocation and transfer primitives of an external memory space.
///
/// Implementations are cheap to clone; every handle keeps its own clone so it
/// can free its allocation without outside help.
pub trait DeviceApi: Clone {
    /// Allocate `size_bytes` bytes. Never called with zero.
    fn allocate(&self, size_bytes: usize) -> Result<NonNull<u8>, DeviceError>;

    /// Allocate `rows` rows of at least `width_bytes` bytes each.
    ///
    /// Returns the base pointer and the row step in bytes the allocator chose.
    /// The step is never smaller than `width_bytes`. The default keeps rows
    /// tightly packed.
    fn allocate_pitched(
        &self,
        width_bytes: usize,
        rows: usize,
    ) -> Result<(NonNull<u8>, usize), DeviceError> {
        let size = width_bytes.checked_mul(rows).ok_or_else(|| {
            DeviceError::geometry(format!("{} rows of {} bytes overflow", rows, width_bytes))
        })?;
        Ok((self.allocate(size)?, width_bytes))
    }

    /// Return an allocation to the device.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` or `allocate_pitched` on this device
    /// with the same total size, and must not be freed twice.
    unsafe fn free(&self, ptr: NonNull<u8>, size_bytes: usize);

    /// Copy `size_bytes` contiguous bytes. Blocks until the copy completes.
    ///
    /// # Safety
    ///
    /// Both ranges must be valid for `size_bytes` bytes on their side of the
    /// transfer given by `kind`.
    unsafe fn copy(
        &self,
        kind: CopyKind,
        dst: *mut u8,
        src: *const u8,
        size_bytes: usize,
    ) -> Result<(), DeviceError>;

    /// Copy `rows` rows of `width_bytes` bytes between two strided regions.
    ///
    /// # Safety
    ///
    /// Both regions must be valid for `rows` rows at their respective steps.
    #[allow(clippy::too_many_arguments)]
    unsafe fn copy_2d(
        &self,
        kind: CopyKind,
        dst: *mut u8,
        dst_step: usize,
        src: *const u8,
        src_step: usize,
        width_bytes: usize,
        rows: usize,
    ) -> Result<(), DeviceError> {
        if dst_step < width_bytes || src_step < width_bytes {
            return Err(DeviceError::geometry(format!(
                "step ({} dst, {} src) smaller than row width {}",
                dst_step, src_step, width_bytes
            )));
        }
        if dst_step == width_bytes && src_step == width_bytes {
            return self.copy(kind, dst, src, width_bytes * rows);
        }
        for row in 0..rows {
            self.copy(
                kind,
                dst.wrapping_add(row * dst_step),
                src.wrapping_add(row * src_step),
                width_bytes,
            )?;
        }
        Ok(())
    }
}

/// Element types that can be moved to and from device memory as raw bytes.
///
/// # Safety
///
/// The type must have no padding, no pointers into host memory, and every
/// bit pattern of its size must be a valid value: downloads read back
/// whatever bytes the device holds, including freshly allocated memory.
///
/// Zero-sized types such as `[T; 0]` satisfy the trait, but the containers
/// refuse to hold a non-zero number of them.
pub unsafe trait DeviceCopy: Copy + 'static {}

macro_rules! impl_device_copy {
    ($($t:ty)*) => {
        $(
            unsafe impl DeviceCopy for $t {}
        )*
    }
}

impl_device_copy! {
    u8 u16 u32 u64 u128 usize
    i8 i16 i32 i64 i128 isize
    f32 f64
}

unsafe impl<T: DeviceCopy, const N: usize> DeviceCopy for [T; N] {}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_device_copy<T: DeviceCopy>() {}

    #[test]
    fn test_device_copy_impls() {
        assert_device_copy::<u8>();
        assert_device_copy::<f64>();
        assert_device_copy::<[f32; 3]>();
        assert_device_copy::<[[i16; 2]; 4]>();
    }

    #[test]
    fn test_default_copy_2d_rejects_narrow_step() {
        let device = HostDevice::new();
        let src = [0u8; 8];
        let mut dst = [0u8; 8];
        let err = unsafe {
            device.copy_2d(
                CopyKind::DeviceToDevice,
                dst.as_mut_ptr(),
                2,
                src.as_ptr(),
                4,
                4,
                2,
            )
        }
        .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidGeometry(_)));
    }

    #[test]
    fn test_default_copy_2d_strided() {
        let device = HostDevice::new();
        // two rows of 3 bytes at step 4 into step 5
        let src = [1u8, 2, 3, 0, 4, 5, 6, 0];
        let mut dst = [9u8; 10];
        unsafe {
            device
                .copy_2d(
                    CopyKind::HostToDevice,
                    dst.as_mut_ptr(),
                    5,
                    src.as_ptr(),
                    4,
                    3,
                    2,
                )
                .unwrap();
        }
        assert_eq!(dst, [1, 2, 3, 9, 9, 4, 5, 6, 9, 9]);
    }
}
