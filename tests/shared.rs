//! Integration tests for `Shared<T>`, its factories, and the allocator
//! and deleter collaborators.

use ortak::{
    claim_raw_with, from_box, make_shared, make_shared_in, try_claim_raw_with_in,
    try_make_shared_in, AllocError, BlockAlloc, Heap, Shared,
};
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

// ============================================================================
// Helpers: drop counting and instrumented allocators
// ============================================================================

/// Increments a counter on drop; verifies exactly-once teardown.
#[derive(Debug)]
struct DropCounter {
    value: usize,
    counter: Arc<AtomicUsize>,
}

impl DropCounter {
    fn new(value: usize, counter: &Arc<AtomicUsize>) -> Self {
        Self {
            value,
            counter: counter.clone(),
        }
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Forwards to the heap while tracking net live bytes.
#[derive(Clone)]
struct CountingAlloc {
    live: Arc<AtomicIsize>,
}

impl CountingAlloc {
    fn new() -> Self {
        Self {
            live: Arc::new(AtomicIsize::new(0)),
        }
    }

    fn live_bytes(&self) -> isize {
        self.live.load(Ordering::SeqCst)
    }
}

impl BlockAlloc for CountingAlloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.live.fetch_add(layout.size() as isize, Ordering::SeqCst);
        Heap.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live.fetch_sub(layout.size() as isize, Ordering::SeqCst);
        unsafe { Heap.deallocate(ptr, layout) }
    }
}

/// Refuses every request.
#[derive(Clone)]
struct FailingAlloc;

impl BlockAlloc for FailingAlloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        Err(AllocError::new(layout))
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        unreachable!("nothing was ever allocated");
    }
}

// ============================================================================
// Basic handle behavior
// ============================================================================

#[test]
fn make_shared_round_trip() {
    let value = make_shared(42i32);
    assert_eq!(*value, 42);
    assert_eq!(value.use_count(), 1);
    assert!(!value.is_empty());
}

#[test]
fn clone_retains_drop_releases() {
    let a = make_shared(String::from("ortak"));
    let b = a.clone();
    let c = b.clone();
    assert_eq!(a.use_count(), 3);
    drop(b);
    assert_eq!(a.use_count(), 2);
    drop(c);
    assert_eq!(a.use_count(), 1);
    assert_eq!(&*a, "ortak");
}

#[test]
fn pointee_dropped_exactly_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let handle = make_shared(DropCounter::new(7, &drops));
    let clone = handle.clone();
    assert_eq!(clone.value, 7);

    drop(handle);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(clone);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_handle_behavior() {
    let empty: Shared<u64> = Shared::null();
    assert!(empty.is_empty());
    assert!(empty.get().is_none());
    assert_eq!(empty.use_count(), 0);
    assert_eq!(empty, Shared::default());
    drop(empty);
}

#[test]
#[should_panic(expected = "dereferenced an empty Shared")]
fn deref_of_empty_panics() {
    let empty: Shared<u64> = Shared::null();
    let _ = *empty;
}

#[test]
fn equality_is_by_address() {
    let a = make_shared(5);
    let b = make_shared(5);
    assert_ne!(a, b);
    assert_eq!(a, a.clone());
    assert!(a.ptr_eq(&a.clone()));
    assert!(!a.ptr_eq(&b));
}

#[test]
fn tag_is_local_to_the_handle() {
    let mut a = make_shared(1);
    assert!(!a.tag());
    a.set_tag();
    assert!(a.tag());

    // The tag bit travels with this handle's word, not with the object.
    let b = a.clone();
    assert!(b.tag());
    a.clear_tag();
    assert!(!a.tag());
    assert!(b.tag());
}

#[test]
fn versioned_snapshot_of_handle() {
    let a = make_shared(9);
    let snap = a.versioned();
    assert!(snap.ptr_eq(&a));
    assert_eq!(snap.version(), a.version());
    assert!(!snap.is_empty());
}

#[test]
fn drop_on_another_thread() {
    let drops = Arc::new(AtomicUsize::new(0));
    let handle = make_shared(DropCounter::new(0, &drops));
    let clone = handle.clone();

    let worker = thread::spawn(move || {
        assert_eq!(clone.value, 0);
        drop(clone);
    });
    worker.join().unwrap();

    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(handle);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Claimed objects and custom deleters
// ============================================================================

#[test]
fn from_box_adopts_heap_object() {
    let handle = from_box(Box::new(vec![1u8, 2, 3]));
    assert_eq!(handle.len(), 3);
    assert_eq!(handle.use_count(), 1);
}

#[test]
fn custom_deleter_runs_once_with_the_object() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let object = Box::into_raw(Box::new(123u32));

    let handle = {
        let invoked = invoked.clone();
        // SAFETY: object is a fresh Box pointer, consumed by the deleter.
        unsafe {
            claim_raw_with(object, move |ptr: *mut u32| {
                assert_eq!(*ptr, 123);
                drop(Box::from_raw(ptr));
                invoked.fetch_add(1, Ordering::SeqCst);
            })
        }
    };

    let clone = handle.clone();
    drop(handle);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    drop(clone);
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
}

#[test]
fn claim_failure_consumes_the_object() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let object = Box::into_raw(Box::new(55u64));

    let result = {
        let invoked = invoked.clone();
        // SAFETY: object is a fresh Box pointer, consumed by the deleter
        // on the failure path.
        unsafe {
            try_claim_raw_with_in(FailingAlloc, object, move |ptr: *mut u64| {
                drop(Box::from_raw(ptr));
                invoked.fetch_add(1, Ordering::SeqCst);
            })
        }
    };

    assert!(result.is_err());
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
}

#[test]
fn make_shared_failure_drops_the_value() {
    let drops = Arc::new(AtomicUsize::new(0));
    let result = try_make_shared_in(FailingAlloc, DropCounter::new(1, &drops));
    assert!(result.is_err());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn alloc_error_reports_the_layout() {
    let result = try_make_shared_in(FailingAlloc, 0u128);
    let err = result.err().unwrap();
    assert!(err.layout().size() > 0);
    let message = err.to_string();
    assert!(message.contains("failed"));
}

// ============================================================================
// Allocator accounting
// ============================================================================

#[test]
fn combined_block_returns_to_its_allocator() {
    let alloc = CountingAlloc::new();

    let handle = make_shared_in(alloc.clone(), [0u64; 8]);
    assert!(alloc.live_bytes() > 0);

    let clone = handle.clone();
    drop(handle);
    assert!(alloc.live_bytes() > 0);
    drop(clone);
    assert_eq!(alloc.live_bytes(), 0);
}

#[test]
fn many_allocations_balance_out() {
    let alloc = CountingAlloc::new();
    let mut handles = Vec::new();
    for i in 0..100 {
        handles.push(make_shared_in(alloc.clone(), i));
    }
    let clones: Vec<_> = handles.iter().cloned().collect();
    drop(handles);
    assert!(alloc.live_bytes() > 0);
    drop(clones);
    assert_eq!(alloc.live_bytes(), 0);
}

#[test]
fn zero_sized_pointee_is_fine() {
    let handle = make_shared(());
    let clone = handle.clone();
    assert_eq!(handle.use_count(), 2);
    assert!(clone.get().is_some());
}
