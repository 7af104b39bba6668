//! Error types for device memory handles
//!
//! Two levels: [`DeviceError`] is what a [`DeviceApi`](crate::device::DeviceApi)
//! backend reports, [`MemError`] is what the handle and container layers
//! surface to callers.

use std::fmt;
use thiserror::Error;

/// Result type for handle and container operations.
pub type Result<T> = std::result::Result<T, MemError>;

/// Direction of a memory transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyKind {
    /// Host memory into the device memory space
    HostToDevice,
    /// Device memory into host memory
    DeviceToHost,
    /// Within the device memory space
    DeviceToDevice,
}

impl fmt::Display for CopyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CopyKind::HostToDevice => "host-to-device",
            CopyKind::DeviceToHost => "device-to-host",
            CopyKind::DeviceToDevice => "device-to-device",
        };
        f.write_str(name)
    }
}

/// Failure reported by the external memory API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The allocator cannot satisfy the request
    #[error("out of device memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory {
        /// Bytes requested
        requested: usize,
        /// Bytes still available under the device limit
        available: usize,
    },

    /// A transfer was handed a null pointer
    #[error("null pointer passed to transfer")]
    NullPointer,

    /// A transfer runs past the end of a live allocation
    #[error("access of {len} bytes at {address:#x} overruns allocation {base:#x}+{size}")]
    OutOfBounds {
        /// Start of the access
        address: usize,
        /// Length of the access
        len: usize,
        /// Base of the allocation the access starts in
        base: usize,
        /// Size of that allocation
        size: usize,
    },

    /// Row geometry does not describe a valid transfer
    #[error("invalid transfer geometry: {0}")]
    InvalidGeometry(String),

    /// Backend-specific failure
    #[error("device backend error: {0}")]
    Backend(String),
}

impl DeviceError {
    /// Create an out-of-memory error
    #[inline]
    pub fn out_of_memory(requested: usize, available: usize) -> Self {
        Self::OutOfMemory {
            requested,
            available,
        }
    }

    /// Create an invalid geometry error
    #[inline]
    pub fn geometry(message: impl Into<String>) -> Self {
        Self::InvalidGeometry(message.into())
    }
}

/// Errors surfaced by [`DeviceMemory`](crate::DeviceMemory) and the typed containers.
#[derive(Debug, Error)]
pub enum MemError {
    /// The external allocator refused a request. The handle is left empty.
    #[error("device allocation of {size} bytes failed: {source}")]
    Allocation {
        /// Bytes requested
        size: usize,
        /// Backend failure
        #[source]
        source: DeviceError,
    },

    /// A host/device copy failed. The handle itself is unchanged.
    #[error("{kind} transfer failed: {source}")]
    Transfer {
        /// Direction of the failed copy
        kind: CopyKind,
        /// Backend failure
        #[source]
        source: DeviceError,
    },

    /// Resize requested on a handle wrapping caller-owned memory
    #[error("cannot resize external buffer of {current} bytes to {requested} bytes")]
    ImmutableExternalBuffer {
        /// Current size in bytes
        current: usize,
        /// Requested size in bytes
        requested: usize,
    },
}

impl MemError {
    #[inline]
    pub(crate) fn allocation(size: usize, source: DeviceError) -> Self {
        Self::Allocation { size, source }
    }

    #[inline]
    pub(crate) fn transfer(kind: CopyKind, source: DeviceError) -> Self {
        Self::Transfer { kind, source }
    }

    /// Byte count overflowed `usize` while scaling an element count.
    pub(crate) fn size_overflow(what: &str) -> Self {
        Self::Allocation {
            size: usize::MAX,
            source: DeviceError::geometry(format!("{} overflows usize bytes", what)),
        }
    }

    /// Check if the failure came from the allocator running out of memory
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            Self::Allocation {
                source: DeviceError::OutOfMemory { .. },
                ..
            }
        )
    }
}
