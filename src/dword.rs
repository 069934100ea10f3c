//! 16-byte atomic cell with sub-word read-modify-write operations.
//!
//! [`AtomicDword`] is the primitive everything else in this crate is built
//! on: a 16-byte-aligned cell offering atomic load, store, swap, strong
//! compare-exchange, and fetch-add/fetch-sub/swap on any aligned sub-word
//! (`u8` through `u64`) addressed by a width-scaled index.
//!
//! The sub-word operations are not single-instruction RMWs on any current
//! hardware; they re-read the whole cell, patch the selected lane, and
//! retry a full-cell compare-exchange until it lands. Observers therefore
//! see the cell move atomically from "old value" to "old value with that
//! one lane updated" and never a torn intermediate.
//!
//! Backed by [`portable_atomic::AtomicU128`], which lowers to the platform
//! 128-bit CAS (x86-64 `cmpxchg16b`, aarch64 `casp`, s390x `cdsg`). On
//! x86-64 without AVX even the plain load compiles to a compare-exchange
//! of the value against itself, so a load performs a write cycle on the
//! cache line; that cost is accepted for the simplicity of a homogeneous
//! primitive.

use core::fmt;
use core::sync::atomic::Ordering;
use portable_atomic::AtomicU128;

/// A plain (non-atomic) 16-byte value with little-endian sub-word lanes.
///
/// `Dword` is what [`AtomicDword`] operations consume and return. Lane
/// accessors view the same 128 bits as two `u64`s, four `u32`s, eight
/// `u16`s, or sixteen `u8`s, always in little-endian lane order.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Dword(u128);

impl Dword {
    /// The all-zero value.
    pub const ZERO: Self = Self(0);

    /// Creates a value from its raw 128 bits.
    #[inline]
    pub const fn new(bits: u128) -> Self {
        Self(bits)
    }

    /// Assembles a value from its low and high 64-bit lanes.
    #[inline]
    pub const fn from_lanes(lo: u64, hi: u64) -> Self {
        Self((lo as u128) | ((hi as u128) << 64))
    }

    /// Raw 128 bits.
    #[inline]
    pub const fn bits(self) -> u128 {
        self.0
    }

    /// Low 64-bit lane.
    #[inline]
    pub const fn lo(self) -> u64 {
        self.0 as u64
    }

    /// High 64-bit lane.
    #[inline]
    pub const fn hi(self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// Reads the sub-word lane `index` (width-scaled).
    ///
    /// # Panics
    ///
    /// Panics if the lane lies outside the 16-byte cell; an out-of-range
    /// index is a caller bug, not a runtime condition.
    #[inline]
    pub fn lane<W: Subword>(self, index: usize) -> W {
        W::get(self.0, byte_offset::<W>(index))
    }

    /// Returns a copy with the sub-word lane `index` replaced by `value`.
    ///
    /// # Panics
    ///
    /// Panics if the lane lies outside the 16-byte cell.
    #[inline]
    pub fn with_lane<W: Subword>(self, index: usize, value: W) -> Self {
        Self(W::put(self.0, byte_offset::<W>(index), value))
    }
}

impl fmt::Debug for Dword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dword({:#018x}, {:#018x})", self.hi(), self.lo())
    }
}

#[inline]
fn byte_offset<W: Subword>(index: usize) -> usize {
    let offset = index * W::BYTES;
    assert!(
        offset + W::BYTES <= 16,
        "sub-word index out of bounds: {index} (width {})",
        W::BYTES
    );
    offset
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// An unsigned integer width usable as a [`Dword`] sub-word lane.
///
/// Sealed; implemented for `u8`, `u16`, `u32`, and `u64`.
pub trait Subword: sealed::Sealed + Copy {
    /// Width of the lane in bytes.
    const BYTES: usize;

    /// Extracts the lane starting at `offset` bytes.
    fn get(word: u128, offset: usize) -> Self;

    /// Returns `word` with the lane at `offset` bytes replaced by `value`.
    fn put(word: u128, offset: usize, value: Self) -> u128;

    /// Wrapping addition at the lane width.
    fn wrapping_add(self, rhs: Self) -> Self;

    /// Wrapping subtraction at the lane width.
    fn wrapping_sub(self, rhs: Self) -> Self;
}

macro_rules! subword {
    ($($ty:ty),+) => {$(
        impl Subword for $ty {
            const BYTES: usize = core::mem::size_of::<$ty>();

            #[inline]
            fn get(word: u128, offset: usize) -> Self {
                (word >> (offset * 8)) as $ty
            }

            #[inline]
            fn put(word: u128, offset: usize, value: Self) -> u128 {
                let shift = offset * 8;
                let mask = (<$ty>::MAX as u128) << shift;
                (word & !mask) | ((value as u128) << shift)
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                <$ty>::wrapping_add(self, rhs)
            }

            #[inline]
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$ty>::wrapping_sub(self, rhs)
            }
        }
    )+};
}

subword!(u8, u16, u32, u64);

/// The 16-byte atomic cell.
///
/// All mutation funnels through the platform 128-bit compare-exchange, so
/// every operation (including the sub-word family) is a single atomic
/// transition of the full cell.
///
/// # Examples
///
/// ```
/// use ortak::{AtomicDword, Dword};
///
/// let cell = AtomicDword::new(Dword::from_lanes(7, 0));
/// let prev = cell.fetch_add_at::<u8>(1, 6);
/// assert_eq!(prev.lo(), 7);
/// assert_eq!(cell.load().lane::<u8>(6), 1);
/// ```
pub struct AtomicDword {
    cell: AtomicU128,
}

impl AtomicDword {
    /// Creates a cell holding `value`.
    #[inline]
    pub const fn new(value: Dword) -> Self {
        Self {
            cell: AtomicU128::new(value.bits()),
        }
    }

    /// Atomically loads the cell.
    #[inline]
    pub fn load(&self) -> Dword {
        Dword(self.cell.load(Ordering::Acquire))
    }

    /// Atomically stores `value`.
    #[inline]
    pub fn store(&self, value: Dword) {
        self.cell.store(value.bits(), Ordering::Release);
    }

    /// Atomically replaces the cell, returning the previous value.
    #[inline]
    pub fn swap(&self, value: Dword) -> Dword {
        Dword(self.cell.swap(value.bits(), Ordering::AcqRel))
    }

    /// Strong compare-exchange.
    ///
    /// On success returns `true`. On failure returns `false` and writes
    /// the observed cell value back through `expected`; there are no
    /// spurious failures.
    #[inline]
    pub fn compare_exchange(&self, expected: &mut Dword, desired: Dword) -> bool {
        match self.cell.compare_exchange(
            expected.bits(),
            desired.bits(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(observed) => {
                *expected = Dword(observed);
                false
            }
        }
    }

    /// Atomically adds `value` to the sub-word lane `index` (width-scaled),
    /// wrapping at the lane width. Returns the previous full cell value.
    ///
    /// # Panics
    ///
    /// Panics if the lane lies outside the 16-byte cell.
    #[inline]
    pub fn fetch_add_at<W: Subword>(&self, value: W, index: usize) -> Dword {
        self.rmw_at::<W>(index, |lane| lane.wrapping_add(value))
    }

    /// Atomically subtracts `value` from the sub-word lane `index`,
    /// wrapping at the lane width. Returns the previous full cell value.
    ///
    /// # Panics
    ///
    /// Panics if the lane lies outside the 16-byte cell.
    #[inline]
    pub fn fetch_sub_at<W: Subword>(&self, value: W, index: usize) -> Dword {
        self.rmw_at::<W>(index, |lane| lane.wrapping_sub(value))
    }

    /// Atomically replaces the sub-word lane `index` with `value`.
    /// Returns the previous full cell value.
    ///
    /// # Panics
    ///
    /// Panics if the lane lies outside the 16-byte cell.
    #[inline]
    pub fn swap_at<W: Subword>(&self, value: W, index: usize) -> Dword {
        self.rmw_at::<W>(index, |_| value)
    }

    // Full-cell CAS loop: reread, patch the lane, retry until the cell
    // transitions from the observed value in one step.
    fn rmw_at<W: Subword>(&self, index: usize, f: impl Fn(W) -> W) -> Dword {
        let offset = byte_offset::<W>(index);
        let mut current = self.cell.load(Ordering::Relaxed);
        loop {
            let updated = W::put(current, offset, f(W::get(current, offset)));
            match self.cell.compare_exchange_weak(
                current,
                updated,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return Dword(previous),
                Err(observed) => current = observed,
            }
        }
    }
}

impl fmt::Debug for AtomicDword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicDword").field(&self.load()).finish()
    }
}
