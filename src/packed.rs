//! The packed 64-bit handle word.
//!
//! Layout (little-endian, matching lane 0 of the atomic cell):
//! - bit 0: tag (control blocks are aligned to at least 8, so the low
//!   pointer bit is free),
//! - bits 1..48: control-block address (user-space pointers fit in 48
//!   bits on the supported 64-bit targets),
//! - byte 6: claim counter, the outstanding read intents staked on the
//!   current control block,
//! - byte 7: version, bumped modulo 256 by every successful writer CAS
//!   and only by writer CASes.

/// Tag bit, stored in the low bit of the pointer field.
pub(crate) const TAG_MASK: u64 = 1;

/// Control-block address bits (48-bit pointer minus the tag bit).
pub(crate) const PTR_MASK: u64 = ((1 << 48) - 1) & !TAG_MASK;

pub(crate) const CLAIMS_SHIFT: u32 = 48;
pub(crate) const VERSION_SHIFT: u32 = 56;

/// Claim-counter byte.
pub(crate) const CLAIMS_MASK: u64 = 0xFF << CLAIMS_SHIFT;

/// Version byte.
pub(crate) const VERSION_MASK: u64 = 0xFF << VERSION_SHIFT;

/// `u8`-scaled lane index of the claim counter within the atomic cell.
pub(crate) const CLAIMS_BYTE: usize = 6;

/// A packed handle word: control-block address, tag, claim counter, and
/// version in one 64-bit value.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct PackedPtr(pub(crate) u64);

impl PackedPtr {
    pub(crate) const NULL: Self = Self(0);

    /// Packs a control-block address. The address must carry no bits
    /// outside the pointer field (48-bit, aligned ≥ 2).
    #[inline]
    pub(crate) fn from_addr(addr: u64) -> Self {
        debug_assert!(
            addr & !PTR_MASK == 0,
            "control block address {addr:#x} does not fit the pointer field"
        );
        Self(addr)
    }

    #[inline]
    pub(crate) fn ptr_bits(self) -> u64 {
        self.0 & PTR_MASK
    }

    /// True when the pointer field is zero. Version and tag bits may
    /// still be set on an empty word.
    #[inline]
    pub(crate) fn is_empty(self) -> bool {
        self.ptr_bits() == 0
    }

    #[inline]
    pub(crate) fn claims(self) -> u8 {
        (self.0 >> CLAIMS_SHIFT) as u8
    }

    #[inline]
    pub(crate) fn version(self) -> u8 {
        (self.0 >> VERSION_SHIFT) as u8
    }

    #[inline]
    pub(crate) fn tag(self) -> bool {
        self.0 & TAG_MASK != 0
    }

    #[inline]
    pub(crate) fn with_claims(self, claims: u8) -> Self {
        Self((self.0 & !CLAIMS_MASK) | ((claims as u64) << CLAIMS_SHIFT))
    }

    #[inline]
    pub(crate) fn add_claims(self, n: u8) -> Self {
        self.with_claims(self.claims().wrapping_add(n))
    }

    #[inline]
    pub(crate) fn with_version(self, version: u8) -> Self {
        Self((self.0 & !VERSION_MASK) | ((version as u64) << VERSION_SHIFT))
    }

    #[inline]
    pub(crate) fn with_tag(self) -> Self {
        Self(self.0 | TAG_MASK)
    }

    #[inline]
    pub(crate) fn clear_tag(self) -> Self {
        Self(self.0 & !TAG_MASK)
    }
}

impl core::fmt::Debug for PackedPtr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PackedPtr")
            .field("ptr", &(self.ptr_bits() as *const ()))
            .field("claims", &self.claims())
            .field("version", &self.version())
            .field("tag", &self.tag())
            .finish()
    }
}
