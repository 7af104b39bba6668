//! Reference-counted handles over device memory
//!
//! [`DeviceMemory`] and [`DeviceMemory2D`] own (or borrow) a region of an
//! external memory space. Cloning a handle never copies memory: clones share
//! one [`Allocation`], and the allocation is freed when the last clone is
//! released or dropped. Handles built with `wrap` borrow caller memory and
//! never free it.
//!
//! Handles are deliberately `!Send` and `!Sync`: the shared counter is a
//! plain `Rc`, so aliasing handles must stay on the thread that created
//! them.

mod linear;
mod pitched;

pub use linear::DeviceMemory;
pub use pitched::DeviceMemory2D;

use std::fmt;
use std::ptr::NonNull;

use crate::device::DeviceApi;
use crate::error::{CopyKind, DeviceError, MemError, Result};

/// A live allocation shared by every clone of an owning handle.
///
/// The `Rc` strong count around it is the handle reference count; dropping
/// the last `Rc` returns the memory to the device.
pub(crate) struct Allocation<D: DeviceApi> {
    device: D,
    ptr: NonNull<u8>,
    size_bytes: usize,
}

impl<D: DeviceApi> Allocation<D> {
    pub(crate) fn new(device: D, ptr: NonNull<u8>, size_bytes: usize) -> Self {
        Self {
            device,
            ptr,
            size_bytes,
        }
    }
}

impl<D: DeviceApi> Drop for Allocation<D> {
    fn drop(&mut self) {
        // Safety: the pointer came from this device and this is the only free.
        unsafe { self.device.free(self.ptr, self.size_bytes) }
    }
}

impl<D: DeviceApi> fmt::Debug for Allocation<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("ptr", &self.ptr)
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

/// Bytes a host buffer must span to hold `rows` rows of `width` bytes at `step`.
fn strided_len(rows: usize, step: usize, width: usize) -> Option<usize> {
    if rows == 0 {
        return Some(0);
    }
    (rows - 1).checked_mul(step)?.checked_add(width)
}

/// Validate host-side geometry before a strided transfer touches it.
pub(crate) fn check_host_geometry(
    kind: CopyKind,
    host_len: usize,
    host_step: usize,
    rows: usize,
    width: usize,
) -> Result<()> {
    if rows > 0 && host_step < width {
        return Err(MemError::transfer(
            kind,
            DeviceError::geometry(format!(
                "host step {} smaller than row width {}",
                host_step, width
            )),
        ));
    }
    let required = strided_len(rows, host_step, width).ok_or_else(|| {
        MemError::transfer(kind, DeviceError::geometry("host extent overflows usize"))
    })?;
    if host_len < required {
        return Err(MemError::transfer(
            kind,
            DeviceError::geometry(format!(
                "host buffer of {} bytes, transfer needs {}",
                host_len, required
            )),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strided_len() {
        assert_eq!(strided_len(0, 16, 8), Some(0));
        assert_eq!(strided_len(1, 16, 8), Some(8));
        assert_eq!(strided_len(3, 16, 8), Some(40));
        assert_eq!(strided_len(usize::MAX, 2, 1), None);
    }

    #[test]
    fn test_check_host_geometry() {
        assert!(check_host_geometry(CopyKind::HostToDevice, 40, 16, 3, 8).is_ok());
        assert!(check_host_geometry(CopyKind::HostToDevice, 39, 16, 3, 8).is_err());
        assert!(check_host_geometry(CopyKind::DeviceToHost, 100, 4, 2, 8).is_err());
        assert!(check_host_geometry(CopyKind::DeviceToHost, 0, 0, 0, 8).is_ok());
    }
}
