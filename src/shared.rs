//! The non-atomic owning handle and its factories.
//!
//! [`Shared<T>`] is an ordinary reference-counted handle: clone retains,
//! drop releases, and the pointee is destroyed exactly once when the last
//! handle (atomic or not) goes away. It is the currency of the atomic
//! cell: loads mint one, stores consume one.
//!
//! A handle is two words: the packed control-block word (claims always
//! zero) and a cached pointee pointer. The packed word keeps the version
//! and tag bits of the cell value it was minted from.

use crate::allocator::{AllocError, BlockAlloc, Heap};
use crate::control::{ControlBlock, Deleter};
use crate::packed::PackedPtr;
use crate::versioned::VersionedPtr;
use alloc::alloc::handle_alloc_error;
use alloc::boxed::Box;
use core::alloc::Layout;
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::Deref;
use core::ptr::{self, NonNull};

/// A shared-ownership handle to a heap object.
///
/// The non-atomic companion of [`AtomicShared`](crate::AtomicShared):
/// copying a `Shared` increments the object's strong count, dropping one
/// decrements it, and the count reaching zero runs the deleter and frees
/// the block. A single `Shared` variable is **not** safe to mutate from
/// several threads; only the count it points at is. Distinct handles to
/// the same object may be used and dropped concurrently.
///
/// # Examples
///
/// ```
/// use ortak::make_shared;
///
/// let a = make_shared(String::from("hello"));
/// let b = a.clone();
/// assert_eq!(a.use_count(), 2);
/// assert!(a.ptr_eq(&b));
/// assert_eq!(&*b, "hello");
/// ```
pub struct Shared<T, A: BlockAlloc = Heap> {
    word: PackedPtr,
    object: *mut T,
    marker: PhantomData<A>,
}

// SAFETY: same rules as Arc. The handle is a strong reference to a
// shared T, so moving or sharing it across threads hands out &T and may
// run the destroy path (which uses the allocator clone) on any thread.
unsafe impl<T: Send + Sync, A: BlockAlloc + Send> Send for Shared<T, A> {}
unsafe impl<T: Send + Sync, A: BlockAlloc + Send> Sync for Shared<T, A> {}

impl<T, A: BlockAlloc> Shared<T, A> {
    /// The empty handle.
    #[inline]
    pub const fn null() -> Self {
        Self {
            word: PackedPtr::NULL,
            object: ptr::null_mut(),
            marker: PhantomData,
        }
    }

    /// True when this handle owns nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.word.is_empty()
    }

    /// The pointee, or `None` for an empty handle.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.is_empty() {
            None
        } else {
            // SAFETY: a non-empty handle owns a strong reference, so the
            // pointee outlives it.
            unsafe { Some(&*self.object) }
        }
    }

    /// Advisory strong count of the pointed-at object; 0 when empty.
    ///
    /// Racy by nature; treat it as a hint unless no other thread can be
    /// retaining or releasing.
    pub fn use_count(&self) -> usize {
        let cb = self.control();
        if cb.is_null() {
            0
        } else {
            // SAFETY: we hold a strong reference.
            unsafe { (*cb).use_count() }
        }
    }

    /// The version byte carried over from the cell this handle was
    /// loaded from (0 for factory-fresh handles).
    #[inline]
    pub fn version(&self) -> u8 {
        self.word.version()
    }

    /// The tag bit of this handle's word.
    #[inline]
    pub fn tag(&self) -> bool {
        self.word.tag()
    }

    /// Sets the tag bit on this handle's word, so that storing the handle
    /// publishes a tagged pointer.
    #[inline]
    pub fn set_tag(&mut self) {
        self.word = self.word.with_tag();
    }

    /// Clears the tag bit on this handle's word.
    #[inline]
    pub fn clear_tag(&mut self) {
        self.word = self.word.clear_tag();
    }

    /// A non-owning pointer+version snapshot of this handle.
    #[inline]
    pub fn versioned(&self) -> VersionedPtr<T, A> {
        VersionedPtr::from_word(self.word)
    }

    /// True when both handles reference the same object.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.object == other.object
    }

    #[inline]
    pub(crate) fn control(&self) -> *mut ControlBlock<T, A> {
        self.word.ptr_bits() as *mut ControlBlock<T, A>
    }

    #[inline]
    pub(crate) fn word(&self) -> PackedPtr {
        self.word
    }

    /// Assembles a handle from an already-accounted word. The claim byte
    /// is stripped; one strong reference on the word's block belongs to
    /// the new handle.
    #[inline]
    pub(crate) fn from_parts(word: PackedPtr, object: *mut T) -> Self {
        Self {
            word: word.with_claims(0),
            object,
            marker: PhantomData,
        }
    }

    /// Disassembles the handle without releasing its reference; the
    /// caller takes over the strong reference the handle held.
    #[inline]
    pub(crate) fn into_word(self) -> PackedPtr {
        let word = self.word;
        mem::forget(self);
        word
    }

    /// Wraps a freshly constructed control block (count already 1).
    ///
    /// # Safety
    ///
    /// `cb` must point to a live, fully initialized block not yet owned
    /// by any handle.
    pub(crate) unsafe fn from_new_control(cb: NonNull<ControlBlock<T, A>>) -> Self {
        // SAFETY: live block per caller contract.
        let object = unsafe { (*cb.as_ptr()).object() };
        Self {
            word: PackedPtr::from_addr(cb.as_ptr() as u64),
            object,
            marker: PhantomData,
        }
    }
}

impl<T, A: BlockAlloc> Clone for Shared<T, A> {
    fn clone(&self) -> Self {
        let cb = self.control();
        if !cb.is_null() {
            // SAFETY: our own reference keeps the block live.
            unsafe { (*cb).retain(1) };
        }
        Self {
            word: self.word,
            object: self.object,
            marker: PhantomData,
        }
    }
}

impl<T, A: BlockAlloc> Drop for Shared<T, A> {
    fn drop(&mut self) {
        let cb = self.control();
        if !cb.is_null() {
            // SAFETY: this handle owns one strong reference.
            unsafe { ControlBlock::release(cb, 1) };
        }
    }
}

impl<T, A: BlockAlloc> Deref for Shared<T, A> {
    type Target = T;

    /// # Panics
    ///
    /// Panics when the handle is empty; dereferencing an empty handle is
    /// a contract violation. Use [`get`](Shared::get) to branch instead.
    #[inline]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty Shared handle"),
        }
    }
}

impl<T, A: BlockAlloc> Default for Shared<T, A> {
    fn default() -> Self {
        Self::null()
    }
}

/// Pointee-address equality: two handles are equal when they reference
/// the same object (or are both empty), regardless of value.
impl<T, A: BlockAlloc> PartialEq for Shared<T, A> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T, A: BlockAlloc> Eq for Shared<T, A> {}

impl<T: fmt::Debug, A: BlockAlloc> fmt::Debug for Shared<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("Shared").field(value).finish(),
            None => f.write_str("Shared(<empty>)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Allocates an object and its control block in one combined block and
/// returns the first handle to it.
///
/// Aborts the process on allocation failure, like the std containers; use
/// [`try_make_shared`] to observe failure instead.
///
/// # Examples
///
/// ```
/// use ortak::make_shared;
///
/// let value = make_shared(vec![1, 2, 3]);
/// assert_eq!(value.len(), 3);
/// assert_eq!(value.use_count(), 1);
/// ```
pub fn make_shared<T: 'static>(value: T) -> Shared<T> {
    make_shared_in(Heap, value)
}

/// [`make_shared`] with an explicit allocator.
pub fn make_shared_in<T: 'static, A: BlockAlloc>(alloc: A, value: T) -> Shared<T, A> {
    match try_make_shared_in(alloc, value) {
        Ok(shared) => shared,
        Err(err) => handle_alloc_error(err.layout()),
    }
}

/// Fallible [`make_shared`].
pub fn try_make_shared<T: 'static>(value: T) -> Result<Shared<T>, AllocError> {
    try_make_shared_in(Heap, value)
}

/// Fallible [`make_shared_in`].
///
/// On allocation failure `value` is dropped and the error returned; no
/// partial state survives.
pub fn try_make_shared_in<T: 'static, A: BlockAlloc>(
    alloc: A,
    value: T,
) -> Result<Shared<T, A>, AllocError> {
    let header = Layout::new::<ControlBlock<T, A>>();
    let (layout, object_offset) = header
        .extend(Layout::new::<T>())
        .map_err(|_| AllocError::new(header))?;
    let block = alloc.allocate(layout)?;

    // Block layout: control block at offset 0, pointee at the first
    // suitably aligned offset past it. Pointee first, then the block that
    // refers to it.
    // SAFETY: the block is big enough for both per the layout above, and
    // object_offset is aligned for T.
    unsafe {
        let object = block.as_ptr().add(object_offset).cast::<T>();
        object.write(value);
        let deleter: Deleter<T> = Box::new(|object: *mut T| {
            // SAFETY: invoked exactly once by the destroy path on the
            // object this block was built around.
            unsafe { ptr::drop_in_place(object) }
        });
        let cb = block.cast::<ControlBlock<T, A>>();
        cb.as_ptr()
            .write(ControlBlock::new(layout, object, deleter, alloc));
        Ok(Shared::from_new_control(cb))
    }
}

/// Takes ownership of a boxed object, allocating a control block for it.
///
/// The object stays where it is; its box is reconstituted and dropped by
/// the deleter on last release.
pub fn from_box<T: 'static>(value: Box<T>) -> Shared<T> {
    let object = Box::into_raw(value);
    // SAFETY: object is a unique, valid heap pointer from Box::into_raw,
    // and the default deleter reconstitutes exactly that box.
    unsafe { claim_raw(object) }
}

/// Adopts a raw object with the default deleter (drops it as a `Box<T>`).
///
/// Aborts the process on allocation failure.
///
/// # Safety
///
/// `object` must be a unique pointer obtained from `Box::into_raw` (or
/// equivalent) and must not be used by the caller afterwards.
pub unsafe fn claim_raw<T: 'static>(object: *mut T) -> Shared<T> {
    // SAFETY: forwarded caller contract.
    unsafe {
        claim_raw_with(object, |object: *mut T| {
            // SAFETY: the caller handed the box over; the deleter runs once.
            drop(unsafe { Box::from_raw(object) });
        })
    }
}

/// Adopts a raw object with a caller-supplied deleter.
///
/// Aborts the process on allocation failure; the deleter still consumes
/// the object first.
///
/// # Safety
///
/// `object` must stay valid until the deleter runs, and the deleter must
/// fully dispose of it.
pub unsafe fn claim_raw_with<T: 'static, D>(object: *mut T, deleter: D) -> Shared<T>
where
    D: FnOnce(*mut T) + Send + 'static,
{
    // SAFETY: forwarded caller contract.
    match unsafe { try_claim_raw_with_in(Heap, object, deleter) } {
        Ok(shared) => shared,
        Err(err) => handle_alloc_error(err.layout()),
    }
}

/// Fallible, allocator-parameterized [`claim_raw_with`].
///
/// Only the control block is allocated. On failure the deleter is invoked
/// on `object` before the error is returned, so the object is consumed
/// either way.
///
/// # Safety
///
/// As [`claim_raw_with`].
pub unsafe fn try_claim_raw_with_in<T: 'static, A: BlockAlloc, D>(
    alloc: A,
    object: *mut T,
    deleter: D,
) -> Result<Shared<T, A>, AllocError>
where
    D: FnOnce(*mut T) + Send + 'static,
{
    let layout = Layout::new::<ControlBlock<T, A>>();
    let block = match alloc.allocate(layout) {
        Ok(block) => block,
        Err(err) => {
            deleter(object);
            return Err(err);
        }
    };
    let cb = block.cast::<ControlBlock<T, A>>();
    // SAFETY: the block was just allocated with the control block's layout.
    unsafe {
        cb.as_ptr()
            .write(ControlBlock::new(layout, object, Box::new(deleter), alloc));
        Ok(Shared::from_new_control(cb))
    }
}
