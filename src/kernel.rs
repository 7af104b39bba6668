//! Kernel views
//!
//! Plain-old-data descriptors handed to compute kernels in place of an
//! owning container. They carry a pointer and geometry, nothing else: no
//! reference count, no `Drop`. A view is produced from a live container
//! (`as_dev_ptr`, `as_ptr_sz`, `as_ptr_step`, `as_ptr_step_sz`) and is only
//! meaningful while that container keeps its current allocation. The
//! compiler cannot check this; it is the caller's obligation.
//!
//! All views are `#[repr(C)]` so they can be passed to kernels by value.
//! Steps are always in bytes.

use std::fmt;
use std::mem;
use std::ptr;

macro_rules! impl_view_common {
    ($name:ident { $($field:ident),* }) => {
        impl<T> $name<T> {
            /// Size of one element in bytes
            pub const ELEM_SIZE: usize = mem::size_of::<T>();

            /// Size of one element in bytes
            #[inline]
            pub fn elem_size(&self) -> usize {
                Self::ELEM_SIZE
            }

            /// Raw pointer to the first element
            #[inline]
            pub fn as_ptr(&self) -> *const T {
                self.data
            }

            /// Raw mutable pointer to the first element
            #[inline]
            pub fn as_mut_ptr(&self) -> *mut T {
                self.data
            }

            /// Check if the view points nowhere
            #[inline]
            pub fn is_null(&self) -> bool {
                self.data.is_null()
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $name<T> {}

        impl<T> Default for $name<T> {
            fn default() -> Self {
                Self {
                    data: ptr::null_mut(),
                    $($field: 0,)*
                }
            }
        }

        impl<T> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                self.data == other.data $(&& self.$field == other.$field)*
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("data", &self.data)
                    $(.field(stringify!($field), &self.$field))*
                    .finish()
            }
        }

        impl<T> From<$name<T>> for *mut T {
            fn from(view: $name<T>) -> Self {
                view.data
            }
        }

        impl<T> From<$name<T>> for *const T {
            fn from(view: $name<T>) -> Self {
                view.data
            }
        }
    };
}

/// Bare device pointer.
#[repr(C)]
pub struct DevPtr<T> {
    /// First element
    pub data: *mut T,
}

impl<T> DevPtr<T> {
    /// Wrap a raw device pointer
    pub fn new(data: *mut T) -> Self {
        Self { data }
    }
}

impl_view_common!(DevPtr {});

/// Device pointer with an element count.
#[repr(C)]
pub struct PtrSz<T> {
    /// First element
    pub data: *mut T,
    /// Number of elements
    pub size: usize,
}

impl<T> PtrSz<T> {
    /// View `size` elements starting at `data`
    pub fn new(data: *mut T, size: usize) -> Self {
        Self { data, size }
    }

    /// Check if the view spans no elements
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl_view_common!(PtrSz { size });

/// Device pointer with a row step.
#[repr(C)]
pub struct PtrStep<T> {
    /// First element
    pub data: *mut T,
    /// Stride between two consecutive rows, in bytes
    pub step: usize,
}

impl<T> PtrStep<T> {
    /// View rows `step` bytes apart starting at `data`
    pub fn new(data: *mut T, step: usize) -> Self {
        Self { data, step }
    }

    /// Pointer to the start of row `row`
    #[inline]
    pub fn ptr(&self, row: usize) -> *const T {
        row_ptr(self.data, self.step, row)
    }

    /// Mutable pointer to the start of row `row`
    #[inline]
    pub fn ptr_mut(&self, row: usize) -> *mut T {
        row_ptr(self.data, self.step, row)
    }
}

impl_view_common!(PtrStep { step });

/// Device pointer with a row step and the matrix dimensions.
#[repr(C)]
pub struct PtrStepSz<T> {
    /// First element
    pub data: *mut T,
    /// Stride between two consecutive rows, in bytes
    pub step: usize,
    /// Elements per row
    pub cols: usize,
    /// Number of rows
    pub rows: usize,
}

impl<T> PtrStepSz<T> {
    /// View a `rows` x `cols` matrix with rows `step` bytes apart
    pub fn new(rows: usize, cols: usize, data: *mut T, step: usize) -> Self {
        Self {
            data,
            step,
            cols,
            rows,
        }
    }

    /// Pointer to the start of row `row`
    #[inline]
    pub fn ptr(&self, row: usize) -> *const T {
        row_ptr(self.data, self.step, row)
    }

    /// Mutable pointer to the start of row `row`
    #[inline]
    pub fn ptr_mut(&self, row: usize) -> *mut T {
        row_ptr(self.data, self.step, row)
    }
}

impl_view_common!(PtrStepSz { step, cols, rows });

#[inline]
fn row_ptr<T>(data: *mut T, step: usize, row: usize) -> *mut T {
    (data as *mut u8).wrapping_add(row.wrapping_mul(step)) as *mut T
}

impl<T> From<PtrSz<T>> for DevPtr<T> {
    fn from(view: PtrSz<T>) -> Self {
        DevPtr::new(view.data)
    }
}

impl<T> From<PtrStep<T>> for DevPtr<T> {
    fn from(view: PtrStep<T>) -> Self {
        DevPtr::new(view.data)
    }
}

impl<T> From<PtrStepSz<T>> for DevPtr<T> {
    fn from(view: PtrStepSz<T>) -> Self {
        DevPtr::new(view.data)
    }
}

impl<T> From<PtrStepSz<T>> for PtrStep<T> {
    fn from(view: PtrStepSz<T>) -> Self {
        PtrStep::new(view.data, view.step)
    }
}
