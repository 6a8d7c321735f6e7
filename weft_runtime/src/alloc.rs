//! Deferred transactional allocation.
//!
//! Memory management inside a transaction must respect speculation:
//!
//! - an allocation made by a transaction that later aborts must be released
//!   (nobody else can have seen it);
//! - a `free` issued inside a transaction must be deferred to commit, since
//!   a concurrent transaction may still be reading the block right up until
//!   this one serializes.
//!
//! The bookkeeping lives in two [`BlockList`] ledgers — one for speculative
//! allocations, one for deferred frees — and the transaction boundary hooks
//! decide which ledger releases its blocks and which forgets them:
//!
//! ```text
//!              speculative          deferred_frees
//! commit       forget (kept)        release (free for real)
//! abort        release (undo)       forget (never freed)
//! ```

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

/// One recorded heap block.
#[derive(Debug, Clone, Copy)]
struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
}

/// A ledger of heap blocks owned by one side of the deferral protocol.
///
/// Tracks the blocks and their total byte footprint; the owning hook either
/// releases everything or forgets everything at a transaction boundary.
#[derive(Debug, Default)]
struct BlockList {
    blocks: Vec<Block>,
    bytes: usize,
}

impl BlockList {
    /// Record a block.
    #[inline]
    fn record(&mut self, ptr: NonNull<u8>, layout: Layout) {
        self.blocks.push(Block { ptr, layout });
        self.bytes += layout.size();
    }

    /// Release every recorded block back to the system allocator.
    ///
    /// # Safety
    /// - Every recorded block must still be live and must have been
    ///   allocated with its recorded layout.
    unsafe fn release_all(&mut self) {
        for block in self.blocks.drain(..) {
            // SAFETY: forwarded to the caller.
            unsafe { dealloc(block.ptr.as_ptr(), block.layout) };
        }
        self.bytes = 0;
    }

    /// Drop the records without touching the blocks.
    #[inline]
    fn forget_all(&mut self) {
        self.blocks.clear();
        self.bytes = 0;
    }

    /// Number of recorded blocks.
    #[inline]
    fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Total recorded bytes.
    #[inline]
    fn bytes(&self) -> usize {
        self.bytes
    }

    /// Whether the ledger is empty.
    #[inline]
    fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Drop for BlockList {
    fn drop(&mut self) {
        // Ledgers are empty between transactions; anything still recorded at
        // descriptor teardown is unreachable and must not leak.
        // SAFETY: recorded blocks are live until released exactly once, and
        // this is the last owner of the records.
        unsafe { self.release_all() };
    }
}

/// Per-thread transactional allocator state.
#[derive(Debug, Default)]
pub struct TxAlloc {
    in_tx: bool,
    /// Blocks allocated by the running transaction (released on abort).
    speculative: BlockList,
    /// Blocks freed by the running transaction (released on commit).
    deferred_frees: BlockList,
}

impl TxAlloc {
    /// Fresh allocator state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called at transaction begin.
    pub fn on_tx_begin(&mut self) {
        debug_assert!(self.speculative.is_empty());
        debug_assert!(self.deferred_frees.is_empty());
        self.in_tx = true;
    }

    /// Called at commit: deferred frees become real, speculative
    /// allocations become permanent.
    pub fn on_tx_commit(&mut self) {
        // SAFETY: deferred blocks were live when recorded and nothing frees
        // them in between; the transaction that freed them has serialized.
        unsafe { self.deferred_frees.release_all() };
        self.speculative.forget_all();
        self.in_tx = false;
    }

    /// Called at abort: speculative allocations are released, deferred
    /// frees are forgotten (the frees never happened).
    pub fn on_tx_abort(&mut self) {
        // SAFETY: speculative blocks were never published (the transaction
        // aborted), so this is their only release.
        unsafe { self.speculative.release_all() };
        self.deferred_frees.forget_all();
        self.in_tx = false;
    }

    /// Allocate a block, remembering it for release if the transaction
    /// aborts. Outside a transaction this is a plain allocation.
    ///
    /// Returns null when the underlying allocator fails.
    pub fn allocate(&mut self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 {
            return NonNull::<u8>::dangling().as_ptr();
        }
        // SAFETY: size checked nonzero.
        let ptr = unsafe { alloc(layout) };
        if self.in_tx {
            if let Some(nn) = NonNull::new(ptr) {
                self.speculative.record(nn, layout);
            }
        }
        ptr
    }

    /// Free a block. Inside a transaction the release is deferred to
    /// commit; outside it happens immediately.
    ///
    /// # Safety
    /// - `ptr` must have been allocated with `layout` and not freed before.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        let Some(nn) = NonNull::new(ptr) else { return };
        if self.in_tx {
            // A block this transaction itself allocated can be released at
            // abort either way; keep the deferral uniform.
            self.deferred_frees.record(nn, layout);
        } else {
            // SAFETY: forwarded to the caller.
            unsafe { dealloc(ptr, layout) };
        }
    }

    /// Whether a transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.in_tx
    }

    /// Blocks allocated speculatively by the running transaction.
    pub fn speculative_count(&self) -> usize {
        self.speculative.len()
    }

    /// Bytes held by pending deferred frees.
    pub fn deferred_bytes(&self) -> usize {
        self.deferred_frees.bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        Layout::from_size_align(64, 8).unwrap()
    }

    #[test]
    fn test_commit_applies_deferred_frees() {
        let mut a = TxAlloc::new();
        let ptr = a.allocate(layout());
        assert!(!ptr.is_null());

        a.on_tx_begin();
        unsafe { a.deallocate(ptr, layout()) };
        // Deferred: nothing freed yet, so the ledger carries the block.
        assert_eq!(a.deferred_bytes(), 64);
        a.on_tx_commit();
        assert_eq!(a.deferred_bytes(), 0);
    }

    #[test]
    fn test_abort_releases_speculative_allocations() {
        let mut a = TxAlloc::new();
        a.on_tx_begin();
        let ptr = a.allocate(layout());
        assert!(!ptr.is_null());
        assert_eq!(a.speculative_count(), 1);
        a.on_tx_abort();
        assert_eq!(a.speculative_count(), 0);
    }

    #[test]
    fn test_abort_forgets_deferred_frees() {
        let mut a = TxAlloc::new();
        let ptr = a.allocate(layout());

        a.on_tx_begin();
        unsafe { a.deallocate(ptr, layout()) };
        a.on_tx_abort();
        assert_eq!(a.deferred_bytes(), 0);

        // The block is still live; free it for real.
        unsafe { a.deallocate(ptr, layout()) };
    }

    #[test]
    fn test_outside_transaction_is_passthrough() {
        let mut a = TxAlloc::new();
        let ptr = a.allocate(layout());
        assert!(!ptr.is_null());
        assert_eq!(a.speculative_count(), 0);
        unsafe { a.deallocate(ptr, layout()) };
        assert_eq!(a.deferred_bytes(), 0);
    }

    #[test]
    fn test_ledger_accounting() {
        let mut list = BlockList::default();
        assert!(list.is_empty());

        let l = layout();
        let ptr = NonNull::new(unsafe { alloc(l) }).unwrap();
        list.record(ptr, l);
        assert_eq!(list.len(), 1);
        assert_eq!(list.bytes(), 64);

        unsafe { list.release_all() };
        assert!(list.is_empty());
        assert_eq!(list.bytes(), 0);
    }
}
