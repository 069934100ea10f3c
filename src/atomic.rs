//! The atomic handle and its claim protocol.
//!
//! An [`AtomicShared<T>`] is one 16-byte atomic cell whose low lane packs
//! {control-block pointer, tag, claim counter, version}. The pointee is
//! recovered through the control block on load, never stored in the cell,
//! which is what lets every operation stay within a single 128-bit CAS.
//!
//! # The claim protocol
//!
//! The classic hazard: a reader that loads the pointer and then bumps the
//! count can lose the race to a writer that swaps the pointer and drops
//! the last reference in between. Instead of loading first, a reader
//! *stakes a claim*: an atomic fetch-add on the claim byte of the cell
//! itself. The cell value returned by that fetch-add names the block the
//! reader now has a share of, and any writer that wants to replace the
//! cell must first credit the block's strong count with every staked
//! claim it observes before publishing a word with the claim byte zeroed.
//! Readers drain cooperatively too: after staking, a reader loops
//! crediting the block with the full observed claim count and CASing the
//! byte to zero, until either its own CAS lands or the word moves on;
//! the word only moves on through a CAS that credited first. Either
//! way, by the time the reader returns, its share is in the count.
//!
//! Every successful writer CAS advances the version byte by exactly one
//! (mod 256); claim drains leave it untouched. Pointer observations are
//! therefore version-qualified, which is what the versioned
//! compare-exchange keys on.

use crate::allocator::{BlockAlloc, Heap};
use crate::control::ControlBlock;
use crate::dword::{AtomicDword, Dword};
use crate::packed::{PackedPtr, CLAIMS_BYTE, PTR_MASK, VERSION_MASK};
use crate::shared::Shared;
use crate::versioned::VersionedPtr;
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ptr;

/// A lock-free atomic shared-ownership pointer.
///
/// The concurrent counterpart of [`Shared<T>`]: assignment, load,
/// exchange, and compare-exchange on the handle itself are safe from any
/// number of threads, without locks, hazard pointers, or epochs. Progress
/// is lock-free: operations may spin under contention but some thread
/// always completes.
///
/// Loads return a [`Shared`] whose reference is accounted before the load
/// returns; each successful replacement drops exactly one reference on
/// the displaced block.
///
/// # Examples
///
/// ```
/// use ortak::{make_shared, AtomicShared};
///
/// let slot = AtomicShared::new(make_shared(3));
/// let read = slot.load();
/// assert_eq!(*read, 3);
///
/// let previous = slot.swap(make_shared(4));
/// assert_eq!(*previous, 3);
/// assert_eq!(*slot.load(), 4);
/// ```
pub struct AtomicShared<T, A: BlockAlloc = Heap> {
    cell: AtomicDword,
    marker: PhantomData<Shared<T, A>>,
}

// SAFETY: the cell hands out Shared<T, A> handles; sharing it across
// threads is exactly sharing those, so the same bounds apply.
unsafe impl<T: Send + Sync, A: BlockAlloc + Send> Send for AtomicShared<T, A> {}
unsafe impl<T: Send + Sync, A: BlockAlloc + Send> Sync for AtomicShared<T, A> {}

impl<T, A: BlockAlloc> AtomicShared<T, A> {
    /// The empty handle.
    pub const fn null() -> Self {
        Self {
            cell: AtomicDword::new(Dword::ZERO),
            marker: PhantomData,
        }
    }

    /// A handle initially owning `value`.
    pub fn new(value: Shared<T, A>) -> Self {
        let word = value.into_word();
        Self {
            cell: AtomicDword::new(Dword::from_lanes(word.0, 0)),
            marker: PhantomData,
        }
    }

    // -- public operations --------------------------------------------------

    /// Returns an owning handle to the value current at some instant
    /// during the call. An empty cell yields an empty handle.
    ///
    /// The returned handle's reference is credited to the block before
    /// the call returns, so it can never observe a destroyed object.
    pub fn load(&self) -> Shared<T, A> {
        let word = self.fetch_claim();
        // SAFETY: fetch_claim settled one strong share for this word.
        unsafe { self.materialize(word) }
    }

    /// Replaces the current value with `value`, consuming it. The
    /// displaced block loses the one reference the cell held.
    pub fn store(&self, value: Shared<T, A>) {
        let word = value.into_word();
        self.swap_raw(word, true);
    }

    /// Replaces the current value with `value` and returns the previous
    /// one; the displaced reference transfers to the returned handle, so
    /// no count is touched for it.
    pub fn swap(&self, value: Shared<T, A>) -> Shared<T, A> {
        let word = value.into_word();
        let previous = self.swap_raw(word, false);
        // SAFETY: the cell's reference on the displaced block transfers
        // to the handle we return.
        unsafe { self.materialize(previous) }
    }

    /// Strong compare-exchange keyed on the handle's block.
    ///
    /// If the cell currently references the same block as `expected`,
    /// installs `desired` (consuming it), drops the displaced reference,
    /// and returns `Ok(())`; `expected` is left untouched. Otherwise
    /// rewrites `expected` with an owning handle to the cell's current
    /// value, leaves the cell unchanged, and returns the rejected
    /// `desired` back in the error. Never fails spuriously: claim
    /// traffic on a matching block is absorbed and retried internally.
    ///
    /// # Examples
    ///
    /// ```
    /// use ortak::{make_shared, AtomicShared};
    ///
    /// let slot = AtomicShared::new(make_shared(7));
    /// let mut expected = slot.load();
    /// assert!(slot.compare_exchange(&mut expected, make_shared(8)).is_ok());
    /// assert_eq!(*slot.load(), 8);
    /// ```
    pub fn compare_exchange(
        &self,
        expected: &mut Shared<T, A>,
        desired: Shared<T, A>,
    ) -> Result<(), Shared<T, A>> {
        let mut observed = expected.word();
        let initial_ptr = observed.ptr_bits();
        loop {
            if self.cas_raw(&mut observed, desired.word(), true, PTR_MASK) {
                let _ = desired.into_word();
                return Ok(());
            }
            if observed.ptr_bits() != initial_ptr {
                break;
            }
        }
        *expected = self.load();
        Err(desired)
    }

    /// Strong compare-exchange keyed on pointer **and** version.
    ///
    /// Like [`compare_exchange`](Self::compare_exchange) but against a
    /// non-owning [`VersionedPtr`] snapshot: the exchange succeeds only
    /// while no writer has replaced the cell since the snapshot was
    /// taken, even if the same block address is back. On failure
    /// `expected` receives a fresh snapshot; no reference count is
    /// touched for it.
    pub fn compare_exchange_versioned(
        &self,
        expected: &mut VersionedPtr<T, A>,
        desired: Shared<T, A>,
    ) -> Result<(), Shared<T, A>> {
        const KEY: u64 = PTR_MASK | VERSION_MASK;
        let initial = expected.word();
        let mut observed = initial;
        loop {
            if self.cas_raw(&mut observed, desired.word(), true, KEY) {
                let _ = desired.into_word();
                return Ok(());
            }
            if (observed.0 ^ initial.0) & KEY != 0 {
                break;
            }
        }
        *expected = VersionedPtr::from_word(observed);
        Err(desired)
    }

    /// Loads the current value and, in the same claim-drain transition,
    /// sets the tag bit on the cell's stored pointer field. Returns the
    /// pre-tag value.
    ///
    /// The tag is monotonic within a version epoch: drains preserve it
    /// and only the next writer CAS replaces it (with the tag bit of the
    /// word it installs). Tagging an empty cell is a no-op. Handles
    /// loaded before the call are unaffected.
    pub fn load_and_tag(&self) -> Shared<T, A> {
        let prior = self.stake_claim();
        let claimed = prior.add_claims(1);
        if !claimed.is_empty() {
            let mut observed = claimed;
            self.drain_claims(&mut observed, true);
        }
        // SAFETY: the staked claim settled one strong share for `prior`.
        unsafe { self.materialize(prior.with_claims(0)) }
    }

    /// A non-owning pointer+version snapshot of the cell.
    pub fn load_versioned(&self) -> VersionedPtr<T, A> {
        VersionedPtr::from_word(self.word())
    }

    // -- exclusive-access operations ----------------------------------------

    /// [`load`](Self::load) for exclusive access: a plain read plus a
    /// count bump, skipping the claim protocol. The borrow checker
    /// guarantees here what the protocol otherwise would.
    pub fn load_mut(&mut self) -> Shared<T, A> {
        let word = self.word().with_claims(0);
        let cb = Self::control_of(word);
        if !cb.is_null() {
            // SAFETY: exclusive access; the cell's reference keeps the
            // block live.
            unsafe { (*cb).retain(1) };
        }
        // SAFETY: the retain above accounted the returned handle.
        unsafe { self.materialize(word) }
    }

    /// [`store`](Self::store) for exclusive access.
    pub fn store_mut(&mut self, value: Shared<T, A>) {
        drop(self.swap_mut(value));
    }

    /// [`swap`](Self::swap) for exclusive access. Still advances the
    /// version, so versioned snapshots taken before stay invalidated.
    pub fn swap_mut(&mut self, value: Shared<T, A>) -> Shared<T, A> {
        let previous = self.word();
        let word = value
            .into_word()
            .with_claims(0)
            .with_version(previous.version().wrapping_add(1));
        self.cell.store(Dword::from_lanes(word.0, 0));
        // SAFETY: the displaced reference transfers to the returned handle.
        unsafe { self.materialize(previous.with_claims(0)) }
    }

    /// Consumes the cell and returns its final value as an owning handle.
    pub fn into_inner(self) -> Shared<T, A> {
        let word = self.word().with_claims(0);
        // SAFETY: consuming self; the cell's reference transfers out.
        let handle = unsafe { self.materialize(word) };
        mem::forget(self);
        handle
    }

    // -- reader side ---------------------------------------------------------

    /// Stakes one claim on the cell and returns the value the claim
    /// landed on (pre-increment).
    ///
    /// A full claim byte must not wrap. On a live word, 255 staked
    /// readers are each obligated to drive a drain CAS, so waiting for
    /// one of those to land is enough. On an empty word the claims are
    /// orphans nobody will drain; with no block to credit, the byte can
    /// simply be folded back down. The check is a fast-path guard, not a
    /// hard bound.
    fn stake_claim(&self) -> PackedPtr {
        loop {
            let seen = self.word();
            if seen.claims() == u8::MAX {
                if seen.is_empty() {
                    let mut observed = seen;
                    self.cas_word(&mut observed, seen.with_claims(0));
                } else {
                    core::hint::spin_loop();
                }
                continue;
            }
            return PackedPtr(self.cell.fetch_add_at::<u8>(1, CLAIMS_BYTE).lo());
        }
    }

    /// The reader load path: stake a claim, settle it, return the
    /// claimed word (claim byte stripped) with its share accounted.
    fn fetch_claim(&self) -> PackedPtr {
        let prior = self.stake_claim();
        let claimed = prior.add_claims(1);
        if !claimed.is_empty() {
            let mut observed = claimed;
            self.drain_claims(&mut observed, false);
        }
        prior.with_claims(0)
    }

    /// Cooperatively credits the block with the observed claim count and
    /// clears the claim byte, on behalf of every claimant. In `set_tag`
    /// mode the same transition also sets the tag bit.
    ///
    /// Only returns once the caller's own claim on `expected`'s word is
    /// guaranteed credited: our CAS landed, the byte was observed zero,
    /// or the pointer/version moved (every transition that moves those
    /// credits outstanding claims first). Returning any earlier would let
    /// the caller release a share that is not yet in the count.
    fn drain_claims(&self, expected: &mut PackedPtr, set_tag: bool) {
        let initial = *expected;
        let cb = Self::control_of(initial);
        loop {
            if (expected.0 ^ initial.0) & (PTR_MASK | VERSION_MASK) != 0 {
                return;
            }
            let staked = expected.claims();
            if staked == 0 && (!set_tag || expected.tag()) {
                return;
            }
            if !cb.is_null() && staked > 0 {
                // SAFETY: the cell still references this block and the
                // caller's staked claim keeps it live (module invariant).
                unsafe { (*cb).retain(staked as usize) };
            }
            let mut attempt = expected.with_claims(0);
            if set_tag {
                attempt = attempt.with_tag();
            }
            if self.cas_word(expected, attempt) {
                return;
            }
            if !cb.is_null() && staked > 0 {
                // SAFETY: undoing the speculative credit; the result stays
                // positive because our own share is still accounted above.
                unsafe { ControlBlock::release(cb, staked as usize) };
            }
        }
    }

    // -- writer side ---------------------------------------------------------

    /// Unconditional replacement: retries [`cas_raw`](Self::cas_raw)
    /// until it lands. Returns the displaced word.
    fn swap_raw(&self, to: PackedPtr, decrement_previous: bool) -> PackedPtr {
        let mut expected = self.word();
        while !self.cas_raw(&mut expected, to, decrement_previous, PTR_MASK) {}
        expected.with_claims(0)
    }

    /// One replacement attempt of `expected` by `desired`.
    ///
    /// `key_mask` names the bits of `expected` the caller is comparing on
    /// (always the pointer field, plus the version byte for the
    /// versioned shape); a change in those bits makes the attempt fail
    /// definitively, anything else is absorbed and retried inside.
    ///
    /// On success the installed word carries `desired`'s pointer and tag,
    /// a zero claim byte, and the successor of the displaced version;
    /// when `decrement_previous` is set the displaced block also loses
    /// the reference the cell held on it. On failure `expected` is
    /// rewritten with the observed word and no reference moves.
    fn cas_raw(
        &self,
        expected: &mut PackedPtr,
        desired: PackedPtr,
        decrement_previous: bool,
        key_mask: u64,
    ) -> bool {
        let prior_cb = Self::control_of(*expected);
        if expected.claims() == 0 {
            let attempt = desired
                .with_claims(0)
                .with_version(expected.version().wrapping_add(1));
            let swapped = self.cas_word(expected, attempt);
            if swapped && decrement_previous && !prior_cb.is_null() {
                // SAFETY: the cell held one reference on the block we just
                // displaced; it is ours to drop.
                unsafe { ControlBlock::release(prior_cb, 1) };
            }
            return swapped;
        }

        // Claims are outstanding: join them, so that whoever drains the
        // byte credits this thread too, then try to absorb-and-swap.
        let joined = self.stake_claim().add_claims(1);
        let joined_cb = Self::control_of(joined);
        let key_holds = joined_cb == prior_cb && (joined.0 ^ expected.0) & key_mask == 0;
        *expected = joined;

        let mut swapped = false;
        if key_holds {
            swapped = self.increment_and_try_swap(expected, desired, key_mask);
        } else {
            let mut observed = joined;
            self.drain_claims(&mut observed, false);
        }

        if !joined_cb.is_null() {
            // Settle the joined share: one reference came back to us when
            // the claims were credited. A winning swap also owes the
            // displaced reference.
            let surplus = 1 + usize::from(swapped && decrement_previous);
            // SAFETY: the credit for our claim has landed (swap or drain
            // above), so these references are ours to drop.
            unsafe { ControlBlock::release(joined_cb, surplus) };
        }
        swapped
    }

    /// Writer-side absorb loop: credit the observed claims, then try to
    /// install `desired` over the observed word in the same breath.
    ///
    /// The caller has a claim staked on `expected`'s block. Exits with
    /// `false` only once the `key_mask` bits have moved on; every such
    /// transition credited outstanding claims first, so the caller's
    /// share is settled on any exit.
    fn increment_and_try_swap(
        &self,
        expected: &mut PackedPtr,
        desired: PackedPtr,
        key_mask: u64,
    ) -> bool {
        let initial = *expected;
        let cb = Self::control_of(initial);
        loop {
            if (expected.0 ^ initial.0) & key_mask != 0 {
                return false;
            }
            let staked = expected.claims();
            if !cb.is_null() && staked > 0 {
                // SAFETY: our staked claim keeps the block live while the
                // key bits hold.
                unsafe { (*cb).retain(staked as usize) };
            }
            // The version is taken from the freshly observed word each
            // attempt: a successful writer CAS installs the successor of
            // what it displaces, not of what the caller once saw.
            let attempt = desired
                .with_claims(0)
                .with_version(expected.version().wrapping_add(1));
            if self.cas_word(expected, attempt) {
                return true;
            }
            if !cb.is_null() && staked > 0 {
                // SAFETY: undoing the speculative credit, as in drain_claims.
                unsafe { ControlBlock::release(cb, staked as usize) };
            }
        }
    }

    // -- plumbing ------------------------------------------------------------

    #[inline]
    fn control_of(word: PackedPtr) -> *mut ControlBlock<T, A> {
        word.ptr_bits() as *mut ControlBlock<T, A>
    }

    #[inline]
    fn word(&self) -> PackedPtr {
        PackedPtr(self.cell.load().lo())
    }

    /// 64-bit CAS of the packed word through the cell; the high lane
    /// stays zero for the handle's whole life.
    #[inline]
    fn cas_word(&self, expected: &mut PackedPtr, desired: PackedPtr) -> bool {
        let mut current = Dword::from_lanes(expected.0, 0);
        let swapped = self
            .cell
            .compare_exchange(&mut current, Dword::from_lanes(desired.0, 0));
        expected.0 = current.lo();
        swapped
    }

    /// Builds an owning handle for `word`, whose strong share the caller
    /// has already accounted (claim protocol or ownership transfer).
    ///
    /// # Safety
    ///
    /// `word`'s block, when non-null, must be live with one reference
    /// belonging to the handle being built.
    unsafe fn materialize(&self, word: PackedPtr) -> Shared<T, A> {
        let cb = Self::control_of(word);
        let object = if cb.is_null() {
            ptr::null_mut()
        } else {
            // SAFETY: live block per caller contract.
            unsafe { (*cb).object() }
        };
        Shared::from_parts(word, object)
    }
}

impl<T, A: BlockAlloc> Drop for AtomicShared<T, A> {
    fn drop(&mut self) {
        let cb = Self::control_of(self.word());
        if !cb.is_null() {
            // SAFETY: exclusive access; the cell owns one reference on its
            // current block.
            unsafe { ControlBlock::release(cb, 1) };
        }
    }
}

impl<T, A: BlockAlloc> Default for AtomicShared<T, A> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T, A: BlockAlloc> From<Shared<T, A>> for AtomicShared<T, A> {
    fn from(value: Shared<T, A>) -> Self {
        Self::new(value)
    }
}

impl<T, A: BlockAlloc> fmt::Debug for AtomicShared<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.word();
        f.debug_struct("AtomicShared")
            .field("ptr", &(word.ptr_bits() as *const ()))
            .field("version", &word.version())
            .field("tag", &word.tag())
            .finish()
    }
}
