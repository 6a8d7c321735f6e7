//! The per-thread transaction descriptor.
//!
//! `TxThread` owns everything a transaction touches that is not shared
//! metadata: the redo and undo logs, the orec and bytelock logs, the scope
//! stack, the allocator hooks, and the cached barrier set the boundary API
//! dispatches through.
//!
//! # Barrier dispatch
//!
//! The read/write/commit slots are function pointers, not trait methods, so
//! individual slots can be rewritten at state transitions: the first
//! transactional write swaps `read_ro → read_rw`, `write_ro → write_rw`,
//! and `commit_ro → commit_rw` in place, and the fast path never branches
//! on "have I written yet".

use crate::alloc::TxAlloc;
use crate::backoff::Backoff;
use crate::error::Abort;
use crate::scope::ScopeStack;
use crate::system::runtime;
use crate::threads::ThreadEntry;
use smallvec::SmallVec;
use std::sync::Arc;
use weft_core::orec::fingerprint;
use weft_core::{Bytelock, Mask, Orec, UndoLog, Word, WriteSet};

/// Shared-table orec reference. Metadata tables live for the process, so
/// the reference is `'static`.
pub type OrecRef = &'static Orec;

/// Shared-table bytelock reference.
pub type BytelockRef = &'static Bytelock;

/// One orec observation: the orec and the version it held when read.
#[derive(Debug, Clone, Copy)]
pub struct OrecSnapshot {
    /// The observed orec.
    pub orec: OrecRef,
    /// The unlocked value it held at observation time.
    pub version: usize,
}

/// Per-transaction log of orec observations.
pub type OrecLog = SmallVec<[OrecSnapshot; 64]>;

/// Per-transaction list of orecs this transaction has locked.
pub type OrecList = SmallVec<[OrecRef; 16]>;

/// Per-transaction list of bytelocks (read side or write side).
pub type BytelockList = SmallVec<[BytelockRef; 16]>;

/// Transactional load barrier.
pub type ReadBarrierFn = fn(&mut TxThread, *mut Word, Mask) -> Result<Word, Abort>;

/// Transactional store barrier.
pub type WriteBarrierFn = fn(&mut TxThread, *mut Word, Word, Mask) -> Result<(), Abort>;

/// Transaction commit.
pub type CommitFn = fn(&mut TxThread) -> Result<(), Abort>;

/// The dispatchable barrier slots cached in the descriptor.
#[derive(Clone, Copy)]
pub struct BarrierSet {
    /// Current read barrier.
    pub read: ReadBarrierFn,
    /// Current write barrier.
    pub write: WriteBarrierFn,
    /// Current commit entry point.
    pub commit: CommitFn,
}

impl std::fmt::Debug for BarrierSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarrierSet").finish_non_exhaustive()
    }
}

/// Per-thread transaction descriptor.
pub struct TxThread {
    /// 1-based thread id.
    pub id: u32,
    /// Reader-slot index (`id - 1`).
    pub slot: usize,
    /// Orec lock fingerprint for this thread.
    pub fingerprint: usize,

    /// Algorithm the cached barriers belong to.
    pub algorithm: crate::algs::AlgorithmId,
    /// Dispatch slots; rewritten on state transitions.
    pub barriers: BarrierSet,

    /// Redo log (lazy algorithms).
    pub writes: WriteSet,
    /// Undo log (in-place algorithms).
    pub undo_log: UndoLog,
    /// Orec observations (orec-logging algorithms).
    pub orec_reads: OrecLog,
    /// Orecs locked at commit.
    pub orec_locks: OrecList,
    /// Bytelocks this transaction holds read locks on.
    pub r_bytelocks: BytelockList,
    /// Bytelocks this transaction owns for writing.
    pub w_bytelocks: BytelockList,

    /// Nested transaction frames.
    pub scopes: ScopeStack,
    /// Deferred allocation hooks.
    pub alloc: TxAlloc,
    /// Randomized backoff state.
    pub backoff: Backoff,

    /// Aborts since the last commit.
    pub consec_aborts: u32,
    /// Lifetime read-write commits.
    pub num_commits: u64,
    /// Lifetime read-only commits.
    pub num_ro_commits: u64,
    /// Lifetime aborts.
    pub num_aborts: u64,
    /// Lifetime restarts issued by the retry driver.
    pub num_restarts: u64,

    /// Registry entry (id ownership and the in-flight flag).
    pub entry: Arc<ThreadEntry>,
}

impl TxThread {
    /// Build a descriptor for a freshly registered thread.
    pub(crate) fn new(
        entry: Arc<ThreadEntry>,
        algorithm: crate::algs::AlgorithmId,
        barriers: BarrierSet,
        write_set_capacity: usize,
    ) -> Self {
        let id = entry.id();
        Self {
            id,
            slot: (id - 1) as usize,
            fingerprint: fingerprint(id),
            algorithm,
            barriers,
            writes: WriteSet::new(write_set_capacity),
            undo_log: UndoLog::new(),
            orec_reads: OrecLog::new(),
            orec_locks: OrecList::new(),
            r_bytelocks: BytelockList::new(),
            w_bytelocks: BytelockList::new(),
            scopes: ScopeStack::new(),
            alloc: TxAlloc::new(),
            backoff: Backoff::new(id as u64),
            consec_aborts: 0,
            num_commits: 0,
            num_ro_commits: 0,
            num_aborts: 0,
            num_restarts: 0,
            entry,
        }
    }

    /// First transactional write: swap the barrier set to the writing-state
    /// variants.
    #[inline]
    pub fn on_first_write(&mut self, rw: BarrierSet) {
        self.barriers = rw;
    }

    /// Common read-only commit bookkeeping: counters, allocator hook, and
    /// the barrier set back to the read-only variants.
    pub fn on_commit_ro(&mut self, ro: BarrierSet) {
        self.num_ro_commits += 1;
        self.consec_aborts = 0;
        self.alloc.on_tx_commit();
        self.barriers = ro;
        runtime().stats.record_commit(true);
    }

    /// Common read-write commit bookkeeping.
    pub fn on_commit_rw(&mut self, ro: BarrierSet) {
        self.num_commits += 1;
        self.consec_aborts = 0;
        self.alloc.on_tx_commit();
        self.barriers = ro;
        runtime().stats.record_commit(false);
    }

    /// Common rollback bookkeeping: counters, allocator hook, and the
    /// barrier set back to the read-only variants.
    pub fn on_rollback(&mut self, ro: BarrierSet) {
        self.num_aborts += 1;
        self.consec_aborts += 1;
        self.alloc.on_tx_abort();
        self.barriers = ro;
    }
}

impl Drop for TxThread {
    fn drop(&mut self) {
        // Relinquish the id at thread finalize (explicit shutdown or TLS
        // teardown). Identity-based, so a recycled id is never stolen from
        // its new owner.
        runtime().threads.unregister_entry(&self.entry);
    }
}

impl std::fmt::Debug for TxThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxThread")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("writes", &self.writes.len())
            .field("undo_log", &self.undo_log.len())
            .field("depth", &self.scopes.depth())
            .finish_non_exhaustive()
    }
}
