//! The write set: a hash-indexed redo log.
//!
//! Buffered writes are appended to a flat list (preserving insertion order
//! for writeback) and located through an open-addressed index keyed by
//! address. The index is never cleared entry-by-entry: every index entry is
//! stamped with the write set's current `version`, and `reset` simply bumps
//! the version, invalidating the whole index in O(1). Only when the version
//! counter wraps does the index get physically zeroed.
//!
//! The index is kept at least three times as long as the number of live
//! entries; crossing that load factor doubles the index and rebuilds it in
//! insertion order. The entry list itself grows by doubling.

use crate::undolog::ThrownObject;
use crate::word::{merge, store_masked, Mask, Word, WORD_BYTES, WORD_SHIFT};

/// A single buffered write: the live bytes (per `mask`) of `value` destined
/// for the word at `addr`.
#[derive(Debug, Clone, Copy)]
pub struct WriteSetEntry {
    /// Destination word.
    pub addr: *mut Word,
    /// Buffered value; only the bytes selected by `mask` are meaningful.
    pub value: Word,
    /// Byte mask of the live bytes.
    pub mask: Mask,
}

impl WriteSetEntry {
    /// Apply this entry to memory.
    ///
    /// # Safety
    /// - `addr` must be valid for reads and writes, and the caller must hold
    ///   whatever ownership the commit protocol requires.
    #[inline]
    pub unsafe fn writeback(&self) {
        // SAFETY: forwarded to the caller.
        unsafe { store_masked(self.addr, self.value, self.mask) };
    }
}

/// Open-addressed index slot.
#[derive(Debug, Clone, Copy, Default)]
struct IndexEntry {
    /// Write-set version this slot was written under; any other value means
    /// the slot is logically empty.
    version: u64,
    /// Keyed address.
    address: usize,
    /// Position of the entry in the insertion-order list.
    slot: usize,
}

/// Hash-indexed, append-only redo log.
pub struct WriteSet {
    index: Box<[IndexEntry]>,
    ilength: usize,
    version: u64,
    list: Vec<WriteSetEntry>,
}

impl WriteSet {
    /// Create a write set sized for `capacity` buffered writes.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        // Keep the index at least 3x the capacity, rounded up to a power of
        // two so probing can use a mask.
        let ilength = (3 * capacity).next_power_of_two();
        Self {
            index: vec![IndexEntry::default(); ilength].into_boxed_slice(),
            ilength,
            version: 1,
            list: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    fn hash(&self, addr: usize) -> usize {
        // Fibonacci hashing over the word-aligned address bits.
        const GOLDEN: usize = 0x9E37_79B9_7F4A_7C15_u64 as usize;
        (addr >> WORD_SHIFT).wrapping_mul(GOLDEN) & (self.ilength - 1)
    }

    /// Number of buffered writes.
    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Whether the log holds no writes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Current index length (always a power of two, at least 3x `len`).
    pub fn index_len(&self) -> usize {
        self.ilength
    }

    /// Look up a buffered write by address.
    #[inline]
    pub fn find(&self, addr: *const Word) -> Option<WriteSetEntry> {
        let key = addr as usize;
        let mut h = self.hash(key);
        loop {
            let e = self.index[h];
            if e.version != self.version {
                return None;
            }
            if e.address == key {
                return Some(self.list[e.slot]);
            }
            h = (h + 1) & (self.ilength - 1);
        }
    }

    /// Buffer a write, coalescing with any earlier write to the same word.
    ///
    /// A coalesced entry keeps its original position in insertion order; its
    /// value takes the new bytes where the new mask is live and keeps the old
    /// bytes elsewhere.
    pub fn insert(&mut self, entry: WriteSetEntry) {
        let key = entry.addr as usize;
        let mut h = self.hash(key);
        loop {
            let e = self.index[h];
            if e.version != self.version {
                break;
            }
            if e.address == key {
                let existing = &mut self.list[e.slot];
                existing.value = merge(existing.value, entry.value, entry.mask);
                existing.mask |= entry.mask;
                return;
            }
            h = (h + 1) & (self.ilength - 1);
        }

        self.index[h] = IndexEntry {
            version: self.version,
            address: key,
            slot: self.list.len(),
        };
        self.list.push(entry);

        // Keep the index at least 3x the live entry count.
        if self.list.len() * 3 >= self.ilength {
            self.rebuild();
        }
    }

    /// Double the index and reinsert every entry in insertion order.
    fn rebuild(&mut self) {
        self.ilength *= 2;
        self.index = vec![IndexEntry::default(); self.ilength].into_boxed_slice();
        for (slot, entry) in self.list.iter().enumerate() {
            let key = entry.addr as usize;
            let mut h = self.hash(key);
            while self.index[h].version == self.version {
                h = (h + 1) & (self.ilength - 1);
            }
            self.index[h] = IndexEntry {
                version: self.version,
                address: key,
                slot,
            };
        }
    }

    /// Apply every buffered write to memory in insertion order.
    ///
    /// # Safety
    /// - Every logged address must be valid for reads and writes, and the
    ///   caller must hold the ownership the commit protocol requires.
    pub unsafe fn writeback(&self) {
        for entry in &self.list {
            // SAFETY: forwarded to the caller.
            unsafe { entry.writeback() };
        }
    }

    /// On abort with a thrown object: apply only the bytes of buffered
    /// writes that land inside the thrown range, so the escaping object
    /// carries the transaction's values out. Everything else is dropped.
    ///
    /// # Safety
    /// - The thrown range must be valid for reads and writes.
    pub unsafe fn rollback_into(&self, thrown: ThrownObject) {
        let (lower, upper) = (thrown.start(), thrown.end());
        for entry in &self.list {
            let base = entry.addr as usize;
            let mut keep: Mask = 0;
            for byte in 0..WORD_BYTES {
                let a = base + byte;
                if a >= lower && a < upper {
                    keep |= 0xFF << (8 * byte);
                }
            }
            let mask = entry.mask & keep;
            if mask != 0 {
                // SAFETY: the bytes selected lie inside the thrown range,
                // which the caller guarantees writable.
                unsafe { store_masked(entry.addr, entry.value, mask) };
            }
        }
    }

    /// Iterate the buffered writes in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, WriteSetEntry> {
        self.list.iter()
    }

    /// The `i`-th buffered write in insertion order.
    #[inline]
    pub fn entry(&self, i: usize) -> WriteSetEntry {
        self.list[i]
    }

    /// Logically clear the log. O(1) amortized: the index is invalidated by
    /// bumping the version; physical zeroing happens only on wrap.
    pub fn reset(&mut self) {
        self.list.clear();
        self.version += 1;
        if self.version == 0 {
            self.index.fill(IndexEntry::default());
            self.version = 1;
        }
    }
}

impl std::fmt::Debug for WriteSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSet")
            .field("len", &self.len())
            .field("index_len", &self.ilength)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::FULL_MASK;

    fn entry(addr: *mut Word, value: Word, mask: Mask) -> WriteSetEntry {
        WriteSetEntry { addr, value, mask }
    }

    #[test]
    fn test_insert_and_find() {
        let mut ws = WriteSet::new(8);
        let mut a: Word = 0;
        let mut b: Word = 0;
        ws.insert(entry(&mut a, 7, FULL_MASK));
        ws.insert(entry(&mut b, 9, FULL_MASK));

        assert_eq!(ws.len(), 2);
        assert_eq!(ws.find(&a).unwrap().value, 7);
        assert_eq!(ws.find(&b).unwrap().value, 9);
        let other: Word = 0;
        assert!(ws.find(&other).is_none());
    }

    #[test]
    fn test_insert_coalesces_by_address() {
        let mut ws = WriteSet::new(8);
        let mut a: Word = 0;
        ws.insert(entry(&mut a, 0x1111, 0xFF));
        ws.insert(entry(&mut a, 0x2200, 0xFF00));

        assert_eq!(ws.len(), 1);
        let found = ws.find(&a).unwrap();
        assert_eq!(found.mask, 0xFFFF);
        assert_eq!(found.value & 0xFFFF, 0x2211);
    }

    #[test]
    fn test_coalesce_later_write_wins() {
        let mut ws = WriteSet::new(8);
        let mut a: Word = 0;
        ws.insert(entry(&mut a, 1, FULL_MASK));
        ws.insert(entry(&mut a, 2, FULL_MASK));
        assert_eq!(ws.len(), 1);
        assert_eq!(ws.find(&a).unwrap().value, 2);
    }

    #[test]
    fn test_reset_invalidates_index() {
        let mut ws = WriteSet::new(8);
        let mut a: Word = 0;
        ws.insert(entry(&mut a, 7, FULL_MASK));
        ws.reset();
        assert!(ws.is_empty());
        assert!(ws.find(&a).is_none());

        // The slot is reusable after reset.
        ws.insert(entry(&mut a, 8, FULL_MASK));
        assert_eq!(ws.find(&a).unwrap().value, 8);
    }

    #[test]
    fn test_rebuild_triggers_at_load_factor() {
        let mut ws = WriteSet::new(4);
        let initial = ws.index_len();
        let mut words: Vec<Word> = vec![0; initial];

        // Insert until the index must have doubled at least once.
        let mut grown = false;
        for w in words.iter_mut() {
            ws.insert(entry(w, 1, FULL_MASK));
            if ws.index_len() > initial {
                grown = true;
                break;
            }
            // Invariant: index stays at least 3x the live count.
            assert!(ws.index_len() >= 3 * ws.len());
        }
        assert!(grown);
        assert!(ws.index_len() >= 3 * ws.len());
    }

    #[test]
    fn test_rebuild_preserves_insertion_order() {
        let mut ws = WriteSet::new(2);
        let mut words: Vec<Word> = vec![0; 32];
        for (i, w) in words.iter_mut().enumerate() {
            ws.insert(entry(w, i as Word, FULL_MASK));
        }
        let order: Vec<Word> = ws.iter().map(|e| e.value).collect();
        let expected: Vec<Word> = (0..32).collect();
        assert_eq!(order, expected);

        // All entries still reachable through the rebuilt index.
        for (i, w) in words.iter().enumerate() {
            assert_eq!(ws.find(w).unwrap().value, i as Word);
        }
    }

    #[test]
    fn test_writeback_applies_in_order() {
        let mut ws = WriteSet::new(8);
        let mut a: Word = 0;
        let mut b: Word = 0;
        ws.insert(entry(&mut a, 41, FULL_MASK));
        ws.insert(entry(&mut b, 42, FULL_MASK));
        ws.insert(entry(&mut a, 43, FULL_MASK)); // coalesces over the first

        unsafe { ws.writeback() };
        assert_eq!(a, 43);
        assert_eq!(b, 42);
    }

    #[test]
    fn test_masked_writeback_preserves_dead_bytes() {
        let mut ws = WriteSet::new(8);
        let mut a: Word = 0x1122_3344;
        ws.insert(entry(&mut a, 0xFF, 0xFF));
        unsafe { ws.writeback() };
        assert_eq!(a, 0x1122_33FF);
    }

    #[test]
    fn test_rollback_into_writes_only_thrown_range() {
        let mut ws = WriteSet::new(8);
        let mut inside: Word = 0;
        let mut outside: Word = 0;
        ws.insert(entry(&mut inside, 0xAA, FULL_MASK));
        ws.insert(entry(&mut outside, 0xBB, FULL_MASK));

        let thrown = ThrownObject::new(&mut inside as *mut Word as *mut u8, WORD_BYTES);
        unsafe { ws.rollback_into(thrown) };
        assert_eq!(inside, 0xAA);
        assert_eq!(outside, 0);
    }
}
