//! Ortak: a lock-free atomic shared-ownership pointer.
//!
//! Ortak provides [`AtomicShared<T>`], a reference-counted smart pointer
//! whose *handle itself* is a shared mutable location: many threads may
//! load, store, swap, and compare-exchange the same slot concurrently,
//! without locks, hazard pointers, or epoch reclamation.
//!
//! # Key Features
//!
//! - **One 16-byte cell**: the handle's only mutable state is a single
//!   128-bit atomic word packing pointer, tag, claim counter, and version
//! - **Lock-Free Progress**: every operation is a bounded CAS protocol
//! - **Safe Loads Under Reclamation**: readers stake a claim on the cell
//!   before touching the reference count, so a loaded handle can never
//!   observe a destroyed object
//! - **Version-Qualified CAS**: an ABA-resistant compare-exchange shape
//!   keyed on pointer *and* version
//!
//! # Example
//!
//! ```rust
//! use std::thread;
//! use ortak::{make_shared, AtomicShared};
//!
//! let config = AtomicShared::new(make_shared(vec![1, 2, 3]));
//!
//! thread::scope(|s| {
//!     s.spawn(|| {
//!         // Readers get an owning handle; the pointee stays alive for
//!         // as long as they keep it.
//!         let snapshot = config.load();
//!         assert!(!snapshot.is_empty());
//!     });
//!     s.spawn(|| {
//!         // Writers replace the value wholesale; the displaced object
//!         // is destroyed once its last handle drops.
//!         config.store(make_shared(vec![4, 5, 6]));
//!     });
//! });
//! ```

#![warn(missing_docs)]

extern crate alloc;

mod allocator;
mod atomic;
mod control;
mod dword;
mod packed;
mod shared;
mod versioned;

pub use allocator::{AllocError, BlockAlloc, Heap};
pub use atomic::AtomicShared;
pub use dword::{AtomicDword, Dword, Subword};
pub use shared::{
    claim_raw, claim_raw_with, from_box, make_shared, make_shared_in, try_claim_raw_with_in,
    try_make_shared, try_make_shared_in, Shared,
};
pub use versioned::VersionedPtr;
