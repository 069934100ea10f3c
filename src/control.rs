//! The per-object control block.
//!
//! One heap record per managed object: the strong count, the pointee
//! address, a type-erased deleter, and everything needed for the block to
//! release its own storage on last release (the block layout and a clone
//! of the allocator that produced it).
//!
//! Only the strong count is mutated after construction; the remaining
//! fields are written once and read-only until destroy, which runs
//! single-threaded on whichever thread drops the final reference.

use crate::allocator::BlockAlloc;
use alloc::boxed::Box;
use core::alloc::Layout;
use core::mem::ManuallyDrop;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Type-erased teardown for the pointee, invoked exactly once.
pub(crate) type Deleter<T> = Box<dyn FnOnce(*mut T) + Send>;

pub(crate) struct ControlBlock<T, A: BlockAlloc> {
    strong: AtomicUsize,
    object: *mut T,
    deleter: Option<Deleter<T>>,
    layout: Layout,
    alloc: ManuallyDrop<A>,
}

impl<T, A: BlockAlloc> ControlBlock<T, A> {
    /// A fresh block with a strong count of one.
    ///
    /// `layout` is the layout of the allocation this block heads (the
    /// block alone for claimed objects, block + pointee for the combined
    /// factory).
    pub(crate) fn new(layout: Layout, object: *mut T, deleter: Deleter<T>, alloc: A) -> Self {
        Self {
            strong: AtomicUsize::new(1),
            object,
            deleter: Some(deleter),
            layout,
            alloc: ManuallyDrop::new(alloc),
        }
    }

    /// Adds `n` strong references. Returns the new count.
    #[inline]
    pub(crate) fn retain(&self, n: usize) -> usize {
        self.strong.fetch_add(n, Ordering::Relaxed) + n
    }

    /// Advisory snapshot of the strong count.
    #[inline]
    pub(crate) fn use_count(&self) -> usize {
        self.strong.load(Ordering::Acquire)
    }

    /// The managed object. Immutable for the block's lifetime.
    #[inline]
    pub(crate) fn object(&self) -> *mut T {
        self.object
    }

    /// Drops `n` strong references; the thread that reaches zero tears
    /// the block down. Returns the remaining count.
    ///
    /// Acquire-release so the destroying thread observes every write made
    /// through previously released references.
    ///
    /// # Safety
    ///
    /// `this` must point to a live block and the caller must own `n`
    /// strong references. The block must not be touched after a call that
    /// may have reached zero.
    #[inline]
    pub(crate) unsafe fn release(this: *mut Self, n: usize) -> usize {
        // SAFETY: live block per caller contract.
        let previous = unsafe { (*this).strong.fetch_sub(n, Ordering::AcqRel) };
        debug_assert!(previous >= n, "strong count underflow");
        let remaining = previous - n;
        if remaining == 0 {
            // SAFETY: count reached zero exactly once; we are the sole owner.
            unsafe { Self::destroy(this) };
        }
        remaining
    }

    /// Deleter on the pointee, in-place teardown, storage back to the
    /// allocator clone.
    unsafe fn destroy(this: *mut Self) {
        // SAFETY: exclusive access; the count reached zero.
        unsafe {
            let layout = (*this).layout;
            if let Some(deleter) = (*this).deleter.take() {
                deleter((*this).object);
            }
            // The allocator must outlive the block it frees.
            let alloc = ManuallyDrop::take(&mut (*this).alloc);
            ptr::drop_in_place(this);
            alloc.deallocate(NonNull::new_unchecked(this.cast()), layout);
        }
    }
}
