//! Host-memory device
//!
//! A [`DeviceApi`] over page-mapped process memory. Useful as a stand-in for
//! a GPU in tests and on machines without one: allocations, frees and
//! transfers behave like a driver's, and the device keeps enough bookkeeping
//! to catch transfers that overrun an allocation.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{trace, warn};

use super::DeviceApi;
use crate::config::{DeviceConfig, HostDeviceConfig};
use crate::error::{CopyKind, DeviceError};

static GLOBAL_DEVICE: Lazy<HostDevice> = Lazy::new(|| match DeviceConfig::load_from_cwd() {
    Ok(config) => HostDevice::from_config(&config),
    Err(e) => {
        warn!(error = %e, "ignoring unreadable device config, using defaults");
        HostDevice::new()
    }
});

/// Allocation counters for a [`HostDevice`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Total successful allocations
    pub allocations: u64,
    /// Total frees
    pub frees: u64,
    /// Bytes currently allocated
    pub bytes_in_use: usize,
    /// High-water mark of `bytes_in_use`
    pub peak_bytes: usize,
    /// Allocations currently live
    pub live_allocations: usize,
}

#[derive(Debug, Default)]
struct DeviceState {
    /// Live allocations: base address -> size in bytes
    live: BTreeMap<usize, usize>,
    stats: DeviceStats,
}

impl DeviceState {
    /// Reject null pointers and accesses that start inside a live allocation
    /// but end past it. Addresses outside every allocation belong to wrapped
    /// caller memory and are passed through.
    fn check_range(&self, ptr: *const u8, len: usize) -> Result<(), DeviceError> {
        if ptr.is_null() {
            return Err(DeviceError::NullPointer);
        }
        let address = ptr as usize;
        if let Some((&base, &size)) = self.live.range(..=address).next_back() {
            let end = base + size;
            let overruns = address
                .checked_add(len)
                .map_or(true, |access_end| access_end > end);
            if address < end && overruns {
                return Err(DeviceError::OutOfBounds {
                    address,
                    len,
                    base,
                    size,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct HostDeviceInner {
    config: HostDeviceConfig,
    state: Mutex<DeviceState>,
}

/// Device backed by process memory.
///
/// Clones share the same bookkeeping. The device is `Send + Sync`; the
/// handles built on it are not.
#[derive(Debug, Clone)]
pub struct HostDevice {
    inner: Arc<HostDeviceInner>,
}

impl HostDevice {
    /// Create a device with default settings
    pub fn new() -> Self {
        Self::with_config(HostDeviceConfig::default())
    }

    /// Create a device with custom settings
    pub fn with_config(config: HostDeviceConfig) -> Self {
        Self {
            inner: Arc::new(HostDeviceInner {
                config,
                state: Mutex::new(DeviceState::default()),
            }),
        }
    }

    /// Create a device from a loaded configuration file
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::with_config(config.device.clone())
    }

    /// The process-wide device, configured from `devmem.toml` when present.
    pub fn global() -> &'static HostDevice {
        &GLOBAL_DEVICE
    }

    /// Get the device settings
    pub fn config(&self) -> &HostDeviceConfig {
        &self.inner.config
    }

    /// Snapshot of the allocation counters
    pub fn stats(&self) -> DeviceStats {
        self.inner.state.lock().stats.clone()
    }

    /// Check whether two handles refer to the same device instance
    pub fn same_device(&self, other: &HostDevice) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn pitch_for(&self, width_bytes: usize) -> Option<usize> {
        let align = self.inner.config.pitch_alignment.max(1);
        width_bytes.checked_next_multiple_of(align)
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::global().clone()
    }
}

impl DeviceApi for HostDevice {
    fn allocate(&self, size_bytes: usize) -> Result<NonNull<u8>, DeviceError> {
        if size_bytes == 0 {
            return Err(DeviceError::geometry("zero-sized allocation"));
        }

        let mut state = self.inner.state.lock();
        let limit = self.inner.config.memory_limit;
        if limit > 0 && size_bytes > limit.saturating_sub(state.stats.bytes_in_use) {
            return Err(DeviceError::out_of_memory(
                size_bytes,
                limit.saturating_sub(state.stats.bytes_in_use),
            ));
        }

        let ptr = allocate_region(size_bytes)
            .ok_or_else(|| DeviceError::Backend(format!("failed to map {} bytes", size_bytes)))?;
        if let Some(fill) = self.inner.config.fill_byte {
            unsafe {
                std::ptr::write_bytes(ptr.as_ptr(), fill, size_bytes);
            }
        }

        state.live.insert(ptr.as_ptr() as usize, size_bytes);
        let stats = &mut state.stats;
        stats.allocations += 1;
        stats.live_allocations += 1;
        stats.bytes_in_use += size_bytes;
        stats.peak_bytes = stats.peak_bytes.max(stats.bytes_in_use);

        trace!(address = ptr.as_ptr() as usize, size_bytes, "device allocate");
        Ok(ptr)
    }

    fn allocate_pitched(
        &self,
        width_bytes: usize,
        rows: usize,
    ) -> Result<(NonNull<u8>, usize), DeviceError> {
        let step = self.pitch_for(width_bytes).ok_or_else(|| {
            DeviceError::geometry(format!("row width {} cannot be aligned", width_bytes))
        })?;
        let size = step.checked_mul(rows).ok_or_else(|| {
            DeviceError::geometry(format!("{} rows of step {} overflow", rows, step))
        })?;
        Ok((self.allocate(size)?, step))
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size_bytes: usize) {
        let mut state = self.inner.state.lock();
        match state.live.remove(&(ptr.as_ptr() as usize)) {
            Some(size) => {
                debug_assert_eq!(size, size_bytes, "free size does not match allocation");
                state.stats.frees += 1;
                state.stats.live_allocations -= 1;
                state.stats.bytes_in_use -= size;
            }
            None => {
                warn!(address = ptr.as_ptr() as usize, "free of unknown allocation ignored");
                return;
            }
        }
        drop(state);

        trace!(address = ptr.as_ptr() as usize, size_bytes, "device free");
        deallocate_region(ptr, size_bytes);
    }

    unsafe fn copy(
        &self,
        kind: CopyKind,
        dst: *mut u8,
        src: *const u8,
        size_bytes: usize,
    ) -> Result<(), DeviceError> {
        if size_bytes == 0 {
            return Ok(());
        }
        if dst.is_null() || src.is_null() {
            return Err(DeviceError::NullPointer);
        }

        {
            let state = self.inner.state.lock();
            match kind {
                CopyKind::HostToDevice => state.check_range(dst, size_bytes)?,
                CopyKind::DeviceToHost => state.check_range(src, size_bytes)?,
                CopyKind::DeviceToDevice => {
                    state.check_range(src, size_bytes)?;
                    state.check_range(dst, size_bytes)?;
                }
            }
        }

        // Source and destination may alias when a handle copies onto a clone.
        std::ptr::copy(src, dst, size_bytes);
        Ok(())
    }
}

// Platform-specific memory mapping

#[cfg(unix)]
fn allocate_region(size: usize) -> Option<NonNull<u8>> {
    use libc::{mmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};
    use std::ptr;

    let ptr = unsafe {
        mmap(
            ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == MAP_FAILED {
        None
    } else {
        NonNull::new(ptr as *mut u8)
    }
}

#[cfg(unix)]
fn deallocate_region(ptr: NonNull<u8>, size: usize) {
    unsafe {
        libc::munmap(ptr.as_ptr() as *mut _, size);
    }
}

#[cfg(not(unix))]
const REGION_ALIGN: usize = 4096;

#[cfg(not(unix))]
fn allocate_region(size: usize) -> Option<NonNull<u8>> {
    let layout = std::alloc::Layout::from_size_align(size, REGION_ALIGN).ok()?;
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    NonNull::new(ptr)
}

#[cfg(not(unix))]
fn deallocate_region(ptr: NonNull<u8>, size: usize) {
    if let Ok(layout) = std::alloc::Layout::from_size_align(size, REGION_ALIGN) {
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}
