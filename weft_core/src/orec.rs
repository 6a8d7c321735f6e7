//! Ownership records (orecs).
//!
//! An orec guards a hash bucket of shared addresses. Its main word holds
//! either a monotone version number (lock bit clear) or the fingerprint of
//! the thread that owns it (lock bit set). While locked, the scratch slot
//! `p` remembers the pre-lock version so the owner can release by publishing
//! `p + 1` (commit, version advances) or `p` (abort, nothing was written).
//!
//! Exactly one thread may move an orec from an unlocked value to its own
//! fingerprint, and only via compare-and-swap.

use crate::word::{Word, WORD_SHIFT};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock bit: the most significant bit of the orec word.
///
/// Versions are bounded well below `2^(bits-1)`, so a set MSB always means
/// "locked" and the remaining bits carry the owner's id.
pub const LOCK_BIT: usize = 1 << (usize::BITS - 1);

/// Compose the lock fingerprint for a 1-based thread id.
#[inline]
pub const fn fingerprint(id: u32) -> usize {
    LOCK_BIT | id as usize
}

/// Check whether an orec word is a lock fingerprint.
#[inline]
pub const fn is_locked(v: usize) -> bool {
    v & LOCK_BIT != 0
}

/// A single ownership record.
#[derive(Debug)]
pub struct Orec {
    /// Version (lock bit clear) or owner fingerprint (lock bit set).
    v: AtomicUsize,
    /// Pre-lock version, meaningful only while `v` holds a fingerprint.
    /// Written only by the lock holder.
    p: AtomicUsize,
}

impl Orec {
    /// A fresh, unlocked orec at version 0.
    pub const fn new() -> Self {
        Self {
            v: AtomicUsize::new(0),
            p: AtomicUsize::new(0),
        }
    }

    /// Load the orec word.
    #[inline]
    pub fn load(&self) -> usize {
        self.v.load(Ordering::Acquire)
    }

    /// Try to move the orec from the `observed` unlocked value to the given
    /// fingerprint. Returns `false` if another thread got there first.
    #[inline]
    pub fn try_lock(&self, observed: usize, fp: usize) -> bool {
        debug_assert!(!is_locked(observed));
        debug_assert!(is_locked(fp));
        self.v
            .compare_exchange(observed, fp, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Stash the pre-lock version. Only the lock holder may call this.
    #[inline]
    pub fn stash_prior(&self, prior: usize) {
        self.p.store(prior, Ordering::Relaxed);
    }

    /// The stashed pre-lock version.
    #[inline]
    pub fn prior(&self) -> usize {
        self.p.load(Ordering::Relaxed)
    }

    /// Release after a successful writeback: publish `prior + 1`, atomically
    /// unlocking and advancing the version.
    #[inline]
    pub fn release_bumped(&self) {
        self.v.store(self.prior() + 1, Ordering::Release);
    }

    /// Release without a version bump (abort path: nothing was written).
    #[inline]
    pub fn release_unchanged(&self) {
        self.v.store(self.prior(), Ordering::Release);
    }
}

impl Default for Orec {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide table of orecs, addressed by hashing the low bits of a
/// word-aligned address.
#[derive(Debug)]
pub struct OrecTable {
    orecs: Box<[Orec]>,
    mask: usize,
}

impl OrecTable {
    /// Allocate a table with `count` orecs. `count` must be a power of two.
    pub fn new(count: usize) -> Self {
        assert!(count.is_power_of_two(), "orec count must be a power of two");
        let orecs: Vec<Orec> = (0..count).map(|_| Orec::new()).collect();
        Self {
            orecs: orecs.into_boxed_slice(),
            mask: count - 1,
        }
    }

    /// The orec guarding `addr`.
    #[inline]
    pub fn orec_for(&self, addr: *const Word) -> &Orec {
        let h = (addr as usize >> WORD_SHIFT) & self.mask;
        &self.orecs[h]
    }

    /// Number of orecs in the table.
    pub fn len(&self) -> usize {
        self.orecs.len()
    }

    /// Whether the table is empty (never true for a constructed table).
    pub fn is_empty(&self) -> bool {
        self.orecs.is_empty()
    }
}
