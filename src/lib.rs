//! Devmem - reference-counted handles over external device memory
//!
//! Memory that lives outside the Rust allocator (GPU device memory, mapped
//! regions, driver-owned buffers) still needs shared ownership with
//! deterministic release. Devmem gives it copy-is-cheap handles: cloning
//! bumps a shared counter, releasing lowers it, and the last release frees
//! the memory through the device's own free primitive.
//!
//! # Layers
//!
//! - **Device API** ([`device`]): the [`DeviceApi`] trait for external
//!   allocate/free/copy primitives, and [`HostDevice`], a reference backend
//!   over page-mapped process memory.
//! - **Byte handles** ([`memory`]): [`DeviceMemory`] and the pitched
//!   [`DeviceMemory2D`], with lazy allocation, idempotent `create`, and
//!   host/device transfers.
//! - **Typed containers** ([`array`]): [`DeviceArray<T>`] and
//!   [`DeviceArray2D<T>`], element-typed wrappers over the byte handles.
//! - **Kernel views** ([`kernel`]): `#[repr(C)]` pointer + geometry
//!   descriptors with no ownership, for passing buffers into kernels.
//!
//! # Example
//!
//! ```rust
//! use devmem::{DeviceArray, HostDevice};
//!
//! let device = HostDevice::new();
//! let mut array = DeviceArray::<i32>::new(device.clone());
//! array.upload(&[1, 2, 3, 4]).unwrap();
//!
//! // Clones share the allocation
//! let alias = array.clone();
//! assert_eq!(array.ref_count(), 2);
//!
//! // Releasing one handle leaves the other valid
//! array.release();
//! assert_eq!(alias.to_vec().unwrap(), vec![1, 2, 3, 4]);
//!
//! drop(alias);
//! assert_eq!(device.stats().live_allocations, 0);
//! ```
//!
//! # Threading
//!
//! Handles and containers are `!Send`: the reference count is not atomic,
//! so every handle aliasing one allocation must stay on one thread. Transfers
//! are synchronous and block until the device reports completion.

#![warn(clippy::all)]

pub mod array;
pub mod config;
pub mod device;
pub mod error;
pub mod kernel;
pub mod memory;

// Re-export commonly used types
pub use array::{DeviceArray, DeviceArray2D};
pub use config::{ConfigError, DeviceConfig, HostDeviceConfig};
pub use device::{DeviceApi, DeviceCopy, DeviceStats, HostDevice};
pub use error::{CopyKind, DeviceError, MemError, Result};
pub use kernel::{DevPtr, PtrStep, PtrStepSz, PtrSz};
pub use memory::{DeviceMemory, DeviceMemory2D};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
