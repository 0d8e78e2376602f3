//! Page-aligned payload storage
//!
//! Frame payloads are handed to hardware-mapped I/O paths, so every array starts
//! on a page boundary and its allocation is rounded up to a whole number of pages.
//! The capacity is fixed at construction; the storage never grows or shrinks.

use std::alloc::{self, Layout};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::{Result, RouterError};

/// Alignment unit for payload storage.
pub const PAGE_SIZE: usize = 4096;

/// Fixed-capacity, page-aligned array of plain sample values.
pub struct AlignedBuf<T: Copy> {
    ptr: NonNull<T>,
    capacity: usize,
    /// Bytes actually reserved (capacity rounded up to a page multiple).
    reserved: usize,
}

// SAFETY: AlignedBuf uniquely owns its allocation, like Vec<T>.
unsafe impl<T: Copy + Send> Send for AlignedBuf<T> {}
// SAFETY: shared access only hands out &[T].
unsafe impl<T: Copy + Sync> Sync for AlignedBuf<T> {}

impl<T: Copy> AlignedBuf<T> {
    /// Allocate `capacity` elements, each set to `fill`.
    ///
    /// Returns [`RouterError::OutOfMemory`] when the allocator refuses the request
    /// or the rounded size overflows.
    pub fn filled(capacity: usize, fill: T) -> Result<Self> {
        if capacity == 0 || size_of::<T>() == 0 {
            return Ok(Self::empty());
        }

        let bytes = capacity
            .checked_mul(size_of::<T>())
            .ok_or_else(|| RouterError::out_of_memory(usize::MAX))?;
        let reserved = round_to_page(bytes).ok_or_else(|| RouterError::out_of_memory(bytes))?;
        let layout = Layout::from_size_align(reserved, PAGE_SIZE.max(align_of::<T>()))
            .map_err(|_| RouterError::out_of_memory(reserved))?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc(layout) } as *mut T;
        let ptr = NonNull::new(raw).ok_or_else(|| RouterError::out_of_memory(reserved))?;

        // SAFETY: the allocation holds at least `capacity` properly aligned T.
        unsafe {
            for i in 0..capacity {
                ptr.as_ptr().add(i).write(fill);
            }
        }

        Ok(Self { ptr, capacity, reserved })
    }

    /// Storage with no capacity. Never allocates.
    pub fn empty() -> Self {
        Self { ptr: NonNull::dangling(), capacity: 0, reserved: 0 }
    }

    /// Number of elements this buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes reserved from the allocator, always a multiple of [`PAGE_SIZE`].
    pub fn reserved_bytes(&self) -> usize {
        self.reserved
    }

    /// Exchange storage with `other` without touching any element.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    fn layout(&self) -> Option<Layout> {
        if self.reserved == 0 {
            return None;
        }
        Layout::from_size_align(self.reserved, PAGE_SIZE.max(align_of::<T>())).ok()
    }
}

impl<T: Copy> Deref for AlignedBuf<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: ptr is valid for `capacity` initialized elements (or dangling with 0).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }
}

impl<T: Copy> DerefMut for AlignedBuf<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }
}

impl<T: Copy> Drop for AlignedBuf<T> {
    fn drop(&mut self) {
        if let Some(layout) = self.layout() {
            // SAFETY: allocated in `filled` with this exact layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, layout) };
        }
    }
}

impl<T: Copy> fmt::Debug for AlignedBuf<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuf")
            .field("capacity", &self.capacity)
            .field("reserved", &self.reserved)
            .finish()
    }
}

fn round_to_page(bytes: usize) -> Option<usize> {
    bytes.checked_add(PAGE_SIZE - 1).map(|n| n / PAGE_SIZE * PAGE_SIZE)
}
