//! Typed device containers
//!
//! [`DeviceArray`] and [`DeviceArray2D`] put an element type on top of the
//! byte handles in [`memory`](crate::memory). All allocation, reference
//! counting and transfer logic lives in the byte layer; the containers only
//! scale counts by `size_of::<T>()`.

mod device_array;
mod device_array_2d;

pub use device_array::DeviceArray;
pub use device_array_2d::DeviceArray2D;

use crate::error::{DeviceError, MemError, Result};

/// Scale an element count to bytes, failing on overflow.
///
/// A non-zero count of a zero-sized type is rejected: the byte handles
/// track sizes in bytes only, so the count could not be recovered.
#[inline]
fn bytes_for<T>(count: usize, what: &str) -> Result<usize> {
    let elem_size = std::mem::size_of::<T>();
    if elem_size == 0 && count > 0 {
        return Err(MemError::allocation(
            0,
            DeviceError::geometry(format!("{} of a zero-sized element type", what)),
        ));
    }
    count
        .checked_mul(elem_size)
        .ok_or_else(|| MemError::size_overflow(what))
}
