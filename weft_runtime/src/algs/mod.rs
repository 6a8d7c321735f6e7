//! Algorithm registry and dispatch.
//!
//! Every algorithm variant is described by a record of function pointers —
//! the begin/read/write/commit/rollback entry points plus optional
//! reserve/release hooks — and a `privatization_safe` flag. The records
//! live in a static table indexed by [`AlgorithmId`], initialized once and
//! read-only afterwards, so dispatch is a plain indexed load with no
//! virtual-call machinery:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      ALGORITHM TABLE                             │
//! │  ┌────────────┬─────────┬─────────┬──────────┬────────────────┐  │
//! │  │ id         │ begin   │ read_ro │ commit_ro│ privatization  │  │
//! │  ├────────────┼─────────┼─────────┼──────────┼────────────────┤  │
//! │  │ Nano       │ fn      │ fn      │ fn       │ false          │  │
//! │  │ ByteEager  │ fn      │ fn      │ fn       │ true           │  │
//! │  └────────────┴─────────┴─────────┴──────────┴────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Switching
//!
//! Changing the process-wide algorithm requires quiescence: no thread may
//! be inside a transaction under the old algorithm when the new one starts.
//! The switcher raises a gate that holds new begins back, waits for every
//! registered thread's in-flight flag to clear (spin, then yield), runs the
//! incoming algorithm's `on_switch` hook, publishes the new index, and
//! drops the gate. Threads repoint their cached barrier set at their next
//! begin.

pub mod byteeager;
pub mod nano;

use crate::descriptor::{BarrierSet, TxThread};
use crate::error::{Abort, SwitchError};
use crate::system::runtime;
use crate::threads::ThreadEntry;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;
use weft_core::{ThrownObject, Word};

// =============================================================================
// Algorithm Identity
// =============================================================================

/// Identifies an algorithm variant in the registry.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmId {
    /// Orec-based, value-validating, lazy (redo-log) algorithm.
    Nano = 0,
    /// Bytelock-based, eager, in-place (undo-log) algorithm.
    ByteEager = 1,
}

/// Number of registered algorithm variants.
pub const ALGORITHM_COUNT: usize = 2;

impl AlgorithmId {
    /// Table index for this id.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    fn from_index(index: usize) -> Self {
        match index {
            0 => AlgorithmId::Nano,
            1 => AlgorithmId::ByteEager,
            _ => unreachable!("invalid algorithm index"),
        }
    }
}

// =============================================================================
// Algorithm Record
// =============================================================================

/// Transaction begin; returns whether the caller must restart the begin.
pub type BeginFn = fn(&mut TxThread) -> bool;

/// Release per-thread resources after a conflict or user abort. Receives
/// the protected range (already policy-filtered) and passes it through.
pub type RollbackFn = fn(&mut TxThread, Option<ThrownObject>) -> Option<ThrownObject>;

/// Attempt to make the running transaction irrevocable.
pub type IrrevocFn = fn(&mut TxThread) -> bool;

/// Hook run once when the algorithm becomes the active one.
pub type SwitchFn = fn();

/// Acquire access to a location without transferring data.
pub type ReserveFn = fn(&mut TxThread, *mut Word) -> Result<(), Abort>;

/// Drop a read reservation early.
pub type ReleaseFn = fn(&mut TxThread, *mut Word);

/// Registry record for one algorithm variant.
pub struct Algorithm {
    /// Human-readable variant name.
    pub name: &'static str,
    /// Begin entry point.
    pub begin: BeginFn,
    /// Initial (read-only state) barrier set installed at begin.
    pub barriers: BarrierSet,
    /// Rollback entry point.
    pub rollback: RollbackFn,
    /// In-flight irrevocability request.
    pub irrevoc: IrrevocFn,
    /// Activation hook.
    pub switcher: SwitchFn,
    /// Optional read reservation (pessimistic algorithms).
    pub read_reserve: Option<ReserveFn>,
    /// Optional write reservation.
    pub write_reserve: Option<ReserveFn>,
    /// Optional early read release.
    pub release: Option<ReleaseFn>,
    /// Whether a committed privatizer may touch the privatized words
    /// non-transactionally without further coordination.
    pub privatization_safe: bool,
}

impl std::fmt::Debug for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Algorithm")
            .field("name", &self.name)
            .field("privatization_safe", &self.privatization_safe)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Registry
// =============================================================================

static TABLE: OnceLock<[Algorithm; ALGORITHM_COUNT]> = OnceLock::new();

fn table() -> &'static [Algorithm; ALGORITHM_COUNT] {
    TABLE.get_or_init(|| [nano::descriptor(), byteeager::descriptor()])
}

/// The registry record for `id`.
#[inline]
pub fn algorithm(id: AlgorithmId) -> &'static Algorithm {
    &table()[id.index()]
}

/// Look an algorithm up by name.
pub fn algorithm_from_name(name: &str) -> Option<AlgorithmId> {
    static NAMES: OnceLock<FxHashMap<&'static str, AlgorithmId>> = OnceLock::new();
    let map = NAMES.get_or_init(|| {
        let mut m = FxHashMap::default();
        for index in 0..ALGORITHM_COUNT {
            let id = AlgorithmId::from_index(index);
            m.insert(algorithm(id).name, id);
        }
        m
    });
    map.get(name).copied()
}

// =============================================================================
// Current Algorithm and Switching
// =============================================================================

/// Index of the active algorithm.
static CURRENT: AtomicUsize = AtomicUsize::new(AlgorithmId::Nano as usize);

/// Raised while a switch is quiescing; holds new begins back.
static SWITCHING: AtomicBool = AtomicBool::new(false);

/// Serializes switch requests.
static SWITCH_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

/// The active algorithm.
#[inline]
pub fn current_algorithm() -> AlgorithmId {
    AlgorithmId::from_index(CURRENT.load(Ordering::SeqCst))
}

/// Switch the process to `id` after reaching quiescence.
pub fn change_algorithm(id: AlgorithmId) -> Result<(), SwitchError> {
    change_inner(id, false)
}

/// Like [`change_algorithm`], but refuses targets that are not
/// privatization-safe.
pub fn change_algorithm_privatizing(id: AlgorithmId) -> Result<(), SwitchError> {
    change_inner(id, true)
}

fn change_inner(id: AlgorithmId, demand_privatization: bool) -> Result<(), SwitchError> {
    let _guard = SWITCH_LOCK.lock();
    if demand_privatization && !algorithm(id).privatization_safe {
        return Err(SwitchError::PrivatizationUnsafe);
    }

    let rt = runtime();

    // Hold new begins back, then drain every in-flight transaction.
    SWITCHING.store(true, Ordering::SeqCst);
    for entry in rt.threads.snapshot() {
        wait_not_in_flight(&entry);
    }

    // Quiescent: let the incoming algorithm reset whatever global state it
    // reuses, then publish it.
    (algorithm(id).switcher)();
    CURRENT.store(id.index(), Ordering::SeqCst);
    SWITCHING.store(false, Ordering::SeqCst);

    rt.stats.record_switch();
    Ok(())
}

/// Spin, then yield, until the thread leaves its transaction.
fn wait_not_in_flight(entry: &ThreadEntry) {
    const MAX_SPINS: u32 = 1000;
    let mut spins = 0;
    while entry.in_flight() {
        if spins < MAX_SPINS {
            for _ in 0..10 {
                std::hint::spin_loop();
            }
            spins += 1;
        } else {
            std::thread::yield_now();
        }
    }
}

/// Mark the calling thread in-flight, honoring the switch gate: a begin
/// never lands while a switch is draining the old algorithm.
pub(crate) fn begin_gate(entry: &ThreadEntry) {
    loop {
        while SWITCHING.load(Ordering::SeqCst) {
            std::hint::spin_loop();
        }
        entry.set_in_flight(true);
        if !SWITCHING.load(Ordering::SeqCst) {
            return;
        }
        // A switch started between the check and the flag; back out and
        // wait for it.
        entry.set_in_flight(false);
    }
}
