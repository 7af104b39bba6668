//! Ownership Tests
//!
//! Drives the handle layers through a counting device to verify that every
//! allocation is freed exactly once, wrapped memory is never freed, and
//! releases after swaps free the right allocation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::rc::Rc;

use devmem::{
    CopyKind, DeviceApi, DeviceArray, DeviceArray2D, DeviceError, DeviceMemory, DeviceMemory2D,
    MemError,
};

#[derive(Debug, Default)]
struct Ledger {
    /// Live allocations: address -> backing storage
    live: HashMap<usize, Vec<u8>>,
    allocations: usize,
    frees: Vec<usize>,
    fail_next_alloc: bool,
    fail_transfers: bool,
}

/// Device that keeps its memory in host vectors and records every call.
#[derive(Debug, Clone, Default)]
struct CountingDevice {
    ledger: Rc<RefCell<Ledger>>,
}

impl CountingDevice {
    fn allocations(&self) -> usize {
        self.ledger.borrow().allocations
    }

    fn frees(&self) -> Vec<usize> {
        self.ledger.borrow().frees.clone()
    }

    fn live(&self) -> usize {
        self.ledger.borrow().live.len()
    }
}

impl DeviceApi for CountingDevice {
    fn allocate(&self, size_bytes: usize) -> Result<NonNull<u8>, DeviceError> {
        let mut ledger = self.ledger.borrow_mut();
        if ledger.fail_next_alloc {
            ledger.fail_next_alloc = false;
            return Err(DeviceError::out_of_memory(size_bytes, 0));
        }
        let mut storage = vec![0u8; size_bytes];
        let ptr = NonNull::new(storage.as_mut_ptr()).unwrap();
        ledger.live.insert(ptr.as_ptr() as usize, storage);
        ledger.allocations += 1;
        Ok(ptr)
    }

    fn allocate_pitched(
        &self,
        width_bytes: usize,
        rows: usize,
    ) -> Result<(NonNull<u8>, usize), DeviceError> {
        // pad every row by 3 bytes so steps are never element multiples
        let step = width_bytes + 3;
        Ok((self.allocate(step * rows)?, step))
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size_bytes: usize) {
        let mut ledger = self.ledger.borrow_mut();
        let storage = ledger
            .live
            .remove(&(ptr.as_ptr() as usize))
            .expect("double free or foreign pointer");
        assert_eq!(storage.len(), size_bytes);
        ledger.frees.push(ptr.as_ptr() as usize);
    }

    unsafe fn copy(
        &self,
        _kind: CopyKind,
        dst: *mut u8,
        src: *const u8,
        size_bytes: usize,
    ) -> Result<(), DeviceError> {
        if self.ledger.borrow().fail_transfers {
            return Err(DeviceError::Backend("injected failure".into()));
        }
        if size_bytes == 0 {
            return Ok(());
        }
        std::ptr::copy(src, dst, size_bytes);
        Ok(())
    }
}

#[test]
fn test_clone_release_frees_once() {
    let device = CountingDevice::default();
    let mut a = DeviceMemory::with_size(device.clone(), 64).unwrap();
    let mut b = a.clone();
    let c = b.clone();
    assert_eq!(c.ref_count(), 3);

    a.release();
    a.release();
    b.release();
    assert!(device.frees().is_empty());
    assert_eq!(c.ref_count(), 1);

    drop(c);
    assert_eq!(device.frees().len(), 1);
    assert_eq!(device.live(), 0);
}

#[test]
fn test_release_after_swap_frees_correct_allocation() {
    let device = CountingDevice::default();
    let mut a = DeviceMemory::with_size(device.clone(), 8).unwrap();
    let mut b = DeviceMemory::with_size(device.clone(), 16).unwrap();
    let (pa, pb) = (a.ptr() as usize, b.ptr() as usize);

    a.swap(&mut b);
    a.release();
    assert_eq!(device.frees(), vec![pb]);
    b.release();
    assert_eq!(device.frees(), vec![pb, pa]);
}

#[test]
fn test_swap_with_shared_clone() {
    let device = CountingDevice::default();
    let mut a = DeviceArray::<u32, _>::from_host(device.clone(), &[1, 2, 3]).unwrap();
    let keep = a.clone();
    let mut b = DeviceArray::<u32, _>::new(device.clone());

    a.swap(&mut b);
    assert!(a.is_empty());
    assert_eq!(b.ref_count(), 2);

    b.release();
    assert!(device.frees().is_empty());
    assert_eq!(keep.to_vec().unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_wrap_never_frees() {
    let device = CountingDevice::default();
    let mut external = vec![0u8; 32];
    {
        let mut mem = unsafe { DeviceMemory::wrap(device.clone(), external.as_mut_ptr(), 32) };
        let copy = mem.clone();
        mem.upload(&[1u8; 32]).unwrap();
        mem.release();
        drop(copy);
    }
    {
        let mut grid = unsafe {
            DeviceArray2D::<u8, _>::wrap(device.clone(), 4, 8, external.as_mut_ptr(), 8)
        };
        assert_eq!(grid.ref_count(), 0);
        grid.release();
    }
    assert_eq!(device.allocations(), 0);
    assert!(device.frees().is_empty());
    assert_eq!(external, vec![1u8; 32]);
}

#[test]
fn test_scope_exit_on_error_path_frees() {
    fn fallible(device: &CountingDevice) -> Result<(), MemError> {
        let array = DeviceArray::<u64, _>::with_len(device.clone(), 4)?;
        let _alias = array.clone();
        let mut too_small = [0u64; 2];
        array.download(&mut too_small)?;
        Ok(())
    }

    let device = CountingDevice::default();
    assert!(fallible(&device).is_err());
    assert_eq!(device.allocations(), 1);
    assert_eq!(device.frees().len(), 1);
}

#[test]
fn test_allocation_failure_leaves_handle_releasable() {
    let device = CountingDevice::default();
    let mut mem = DeviceMemory::with_size(device.clone(), 8).unwrap();

    device.ledger.borrow_mut().fail_next_alloc = true;
    let err = mem.create(16).unwrap_err();
    assert!(err.is_out_of_memory());
    assert!(mem.is_empty());
    assert_eq!(device.frees().len(), 1);

    mem.release();
    mem.create(16).unwrap();
    assert_eq!(device.allocations(), 2);
}

#[test]
fn test_transfer_failure_keeps_handle() {
    let device = CountingDevice::default();
    let mut array = DeviceArray::<i16, _>::from_host(device.clone(), &[1, 2]).unwrap();
    let before = array.ptr();

    device.ledger.borrow_mut().fail_transfers = true;
    let err = array.upload(&[3, 4]).unwrap_err();
    assert!(matches!(
        err,
        MemError::Transfer {
            kind: CopyKind::HostToDevice,
            source: DeviceError::Backend(_)
        }
    ));
    assert_eq!(array.ptr(), before);
    assert_eq!(array.len(), 2);

    device.ledger.borrow_mut().fail_transfers = false;
    assert_eq!(array.to_vec().unwrap(), vec![1, 2]);
}

#[test]
fn test_pitched_odd_step() {
    let device = CountingDevice::default();
    let mut grid = DeviceArray2D::<u32, _>::with_size(device.clone(), 3, 2).unwrap();
    assert_eq!(grid.step_bytes(), 11);
    // 11-byte step truncates to 2 elements
    assert_eq!(grid.elem_step(), 2);
    assert_eq!(grid.ptr(2) as usize - grid.ptr(0) as usize, 22);

    let host = [10u32, 11, 20, 21, 30, 31];
    grid.upload(&host, 2).unwrap();
    assert_eq!(grid.to_vec().unwrap(), host.to_vec());

    let mut copy = DeviceMemory2D::new(device.clone());
    grid.as_memory().copy_to(&mut copy).unwrap();
    assert_eq!(copy.step(), 11);
    drop(grid);
    drop(copy);
    assert_eq!(device.live(), 0);
}

#[test]
fn test_copy_to_failure_reports_device_to_device() {
    let device = CountingDevice::default();
    let src = DeviceMemory::with_size(device.clone(), 24).unwrap();
    let mut dst = DeviceMemory::new(device.clone());
    let before = src.ptr();

    device.ledger.borrow_mut().fail_transfers = true;
    let err = src.copy_to(&mut dst).unwrap_err();
    assert!(matches!(
        err,
        MemError::Transfer {
            kind: CopyKind::DeviceToDevice,
            source: DeviceError::Backend(_)
        }
    ));
    assert_eq!(src.ptr(), before);
    assert_eq!(src.size_bytes(), 24);
    assert_eq!(src.ref_count(), 1);

    let grid = DeviceMemory2D::with_size(device.clone(), 3, 5).unwrap();
    let mut grid_dst = DeviceMemory2D::new(device.clone());
    let before = grid.ptr(0);
    let err = grid.copy_to(&mut grid_dst).unwrap_err();
    assert!(matches!(
        err,
        MemError::Transfer {
            kind: CopyKind::DeviceToDevice,
            source: DeviceError::Backend(_)
        }
    ));
    assert_eq!(grid.ptr(0), before);
    assert_eq!((grid.rows(), grid.cols_bytes(), grid.step()), (3, 5, 8));
}

#[test]
fn test_download_failure_reports_device_to_host() {
    let device = CountingDevice::default();
    let array = DeviceArray::<u32, _>::from_host(device.clone(), &[1, 2, 3]).unwrap();
    let mut grid = DeviceArray2D::<u16, _>::with_size(device.clone(), 2, 2).unwrap();
    grid.upload(&[1, 2, 3, 4], 2).unwrap();
    let (array_ptr, grid_ptr) = (array.ptr(), grid.ptr(0));

    device.ledger.borrow_mut().fail_transfers = true;
    let mut host = [0u32; 3];
    let err = array.download(&mut host).unwrap_err();
    assert!(matches!(
        err,
        MemError::Transfer {
            kind: CopyKind::DeviceToHost,
            source: DeviceError::Backend(_)
        }
    ));
    assert_eq!(array.ptr(), array_ptr);
    assert_eq!(array.len(), 3);

    let mut host = [0u16; 4];
    let err = grid.download_pitched(&mut host, 4).unwrap_err();
    assert!(matches!(
        err,
        MemError::Transfer {
            kind: CopyKind::DeviceToHost,
            source: DeviceError::Backend(_)
        }
    ));
    assert_eq!(grid.ptr(0), grid_ptr);
    assert_eq!((grid.rows(), grid.cols()), (2, 2));

    device.ledger.borrow_mut().fail_transfers = false;
    assert_eq!(array.to_vec().unwrap(), vec![1, 2, 3]);
    assert_eq!(grid.to_vec().unwrap(), vec![1, 2, 3, 4]);
}
