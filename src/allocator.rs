//! Allocator collaborator.
//!
//! Control blocks carry a clone of the allocator that produced them and
//! hand their own storage back to it on last release, so the allocator is
//! a type parameter rather than a global.

use alloc::alloc::{alloc as raw_alloc, dealloc as raw_dealloc};
use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

/// Returned when an allocator cannot satisfy a request.
#[derive(Clone, Copy, Debug)]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    /// An error for the request described by `layout`.
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// The layout of the failed request.
    pub fn layout(&self) -> Layout {
        self.layout
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocation of {} bytes (align {}) failed",
            self.layout.size(),
            self.layout.align()
        )
    }
}

impl std::error::Error for AllocError {}

/// Block allocator consumed by the handle factories.
///
/// A clone of the allocator is moved into every control block it
/// allocates; that clone must be able to deallocate blocks produced by
/// the original (and may be called from whichever thread drops the last
/// reference).
pub trait BlockAlloc: Clone {
    /// Allocates a block for `layout`.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Deallocates a block previously returned by [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator (or a clone of
    /// it) with the same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The default allocator: the process global heap.
#[derive(Clone, Copy, Debug, Default)]
pub struct Heap;

impl BlockAlloc for Heap {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(layout.size() != 0, "control blocks are never zero-sized");
        // SAFETY: layout is non-zero-sized; every block starts with a
        // control block.
        let raw = unsafe { raw_alloc(layout) };
        NonNull::new(raw).ok_or(AllocError::new(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded caller contract.
        unsafe { raw_dealloc(ptr.as_ptr(), layout) }
    }
}
