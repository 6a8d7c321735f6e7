//! The transaction boundary API.
//!
//! This is the surface a compiler front end (or a careful hand-written
//! caller) drives: descriptor lifecycle, begin/commit/abort, the read and
//! write barriers, callback registration, and thrown-object control. The
//! descriptor lives in thread-local storage and is created on first use.
//!
//! # Abort discipline
//!
//! A barrier or commit that returns `Err(Abort)` has already rolled the
//! transaction back and released every acquired resource; the caller's only
//! job is to propagate the abort (with `?`) out to the retry loop. The
//! [`atomic`] driver packages that loop: it re-executes the body from the
//! checkpoint until commit succeeds.
//!
//! # Nesting
//!
//! Nested begins push scopes whose callback lists merge into the parent at
//! nested commit. The per-thread logs are flat, so an abort anywhere in the
//! nest unwinds the whole nest and control restarts from the outermost
//! checkpoint; the innermost live checkpoint after unwinding is that
//! outermost frame.

use crate::algs::{self, AlgorithmId};
use crate::descriptor::TxThread;
use crate::error::{Abort, ThreadInitError};
use crate::scope::{ScopeCallback, ScopeFlags};
use crate::system::runtime;
use std::cell::RefCell;
use weft_core::word::{byte_mask, WORD_BYTES};
use weft_core::{AbortCause, Mask, ThrownObject, Word};

thread_local! {
    static TX: RefCell<Option<Box<TxThread>>> = const { RefCell::new(None) };
}

// =============================================================================
// Descriptor Lifecycle
// =============================================================================

fn make_descriptor() -> Result<Box<TxThread>, ThreadInitError> {
    let rt = runtime();
    let entry = rt.threads.register()?;
    rt.stats.record_thread();
    let id = algs::current_algorithm();
    let alg = algs::algorithm(id);
    Ok(Box::new(TxThread::new(
        entry,
        id,
        alg.barriers,
        rt.config.write_set_capacity,
    )))
}

/// Create and register this thread's descriptor explicitly.
///
/// Transactional operations create the descriptor implicitly on first use;
/// call this to surface registration failure (the id space is bounded by
/// the reader-slot count) as an error instead of a panic.
pub fn thread_init() -> Result<(), ThreadInitError> {
    TX.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_some() {
            return Err(ThreadInitError::AlreadyInitialized);
        }
        *slot = Some(make_descriptor()?);
        Ok(())
    })
}

/// Free this thread's descriptor and relinquish its id.
///
/// Dropping the descriptor unregisters it; a thread that exits without
/// calling this is unregistered by TLS teardown.
pub fn thread_shutdown() {
    TX.with(|cell| {
        if let Some(tx) = cell.borrow_mut().take() {
            assert!(
                !tx.scopes.in_transaction(),
                "thread_shutdown inside a transaction"
            );
            drop(tx);
        }
    });
}

/// Run `f` with this thread's descriptor, creating it on first use.
fn with_tx<R>(f: impl FnOnce(&mut TxThread) -> R) -> R {
    TX.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(make_descriptor().expect("no free thread slots"));
        }
        f(slot.as_mut().expect("descriptor just installed"))
    })
}

// =============================================================================
// Transaction Boundary
// =============================================================================

/// What the caller should do after a begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAction {
    /// Run the transaction body.
    Run,
    /// Re-issue the begin (the algorithm requested a restart loop).
    Restart,
    /// Run the body irrevocably; it will not abort.
    RunIrrevocably,
}

/// Flags for [`begin_transaction`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BeginFlags {
    /// Request irrevocable execution.
    pub irrevocable: bool,
    /// The body contains an exception region that may declare a thrown
    /// object.
    pub exception_region: bool,
}

/// Open a transaction frame on this thread.
///
/// The outermost begin marks the thread in-flight (honoring the algorithm
/// switch gate), repoints the cached barriers when the process-wide
/// algorithm changed, and captures a checkpoint. Nested begins just push a
/// frame.
pub fn begin_transaction(flags: BeginFlags) -> TxAction {
    with_tx(|tx| {
        let outermost = !tx.scopes.in_transaction();
        let scope_flags = ScopeFlags {
            outermost,
            irrevocable: false,
            exception_region: flags.exception_region,
        };

        if !outermost {
            tx.scopes.push(scope_flags);
            return TxAction::Run;
        }

        algs::begin_gate(&tx.entry);

        // Repoint dispatch if a switch landed since our last transaction.
        let current = algs::current_algorithm();
        let alg = algs::algorithm(current);
        tx.algorithm = current;
        tx.barriers = alg.barriers;

        if (alg.begin)(tx) {
            // The algorithm wants the begin re-issued; leave no frame behind.
            tx.entry.set_in_flight(false);
            return TxAction::Restart;
        }
        tx.scopes.push(scope_flags);

        if flags.irrevocable {
            if (alg.irrevoc)(tx) {
                if let Some(scope) = tx.scopes.innermost_mut() {
                    scope.set_irrevocable();
                }
                return TxAction::RunIrrevocably;
            }
            // The variant cannot guarantee irrevocability; run normally.
        }
        TxAction::Run
    })
}

/// Commit the innermost frame.
///
/// A nested commit merges the frame's callbacks into its parent. The
/// outermost commit runs the algorithm's commit; on success the on-commit
/// callbacks run FIFO, on failure the transaction is already rolled back
/// and the abort is returned.
pub fn commit_transaction() -> Result<(), Abort> {
    with_tx(|tx| {
        assert!(tx.scopes.in_transaction(), "commit outside a transaction");

        if tx.scopes.depth() > 1 {
            let mut child = tx.scopes.pop().expect("depth checked");
            child.merge_into(tx.scopes.innermost_mut().expect("parent exists"));
            tx.scopes.recycle(child);
            return Ok(());
        }

        match (tx.barriers.commit)(tx) {
            Ok(()) => {
                let mut scope = tx.scopes.pop().expect("depth checked");
                scope.commit_outermost();
                tx.scopes.recycle(scope);
                tx.entry.set_in_flight(false);
                Ok(())
            }
            Err(abort) => {
                runtime().stats.record_abort(abort.cause);
                rollback_all(tx, None);
                Err(abort)
            }
        }
    })
}

/// Roll back immediately.
///
/// With `thrown`, declares the protected byte range first; the range (or
/// one declared earlier via [`set_thrown_object`]) is excluded from
/// rollback and handed back so the caller can surface the escaping object.
pub fn abort_transaction(thrown: Option<ThrownObject>) -> Option<ThrownObject> {
    with_tx(|tx| {
        assert!(tx.scopes.in_transaction(), "abort outside a transaction");
        runtime().stats.record_abort(AbortCause::Explicit);
        rollback_all(tx, thrown)
    })
}

/// Unwind the whole nest: algorithm rollback once (the logs are flat),
/// then per-scope logged words and callbacks from innermost out.
fn rollback_all(tx: &mut TxThread, explicit: Option<ThrownObject>) -> Option<ThrownObject> {
    let rt = runtime();

    if let Some(range) = explicit {
        if let Some(scope) = tx.scopes.innermost_mut() {
            scope.clear_thrown_object();
            scope.set_thrown_object(range);
        }
    }
    let thrown = tx.scopes.innermost().and_then(|s| s.thrown_object());
    let filter = rt.config.rollback_on_throw;

    let alg = algs::algorithm(tx.algorithm);
    (alg.rollback)(tx, if filter { thrown } else { None });

    while let Some(mut scope) = tx.scopes.pop() {
        scope.rollback(filter);
        tx.scopes.recycle(scope);
    }

    tx.num_restarts += 1;
    tx.entry.set_in_flight(false);
    thrown
}

// =============================================================================
// Barriers
// =============================================================================

/// Transactional load, dispatched to the current algorithm.
///
/// On `Err` the transaction has been rolled back; propagate to the retry
/// driver.
///
/// # Safety
/// - `addr` must be a live, word-aligned shared location for the duration
///   of the transaction.
pub unsafe fn read_barrier(addr: *mut Word, mask: Mask) -> Result<Word, Abort> {
    with_tx(|tx| {
        assert!(tx.scopes.in_transaction(), "barrier outside a transaction");
        match (tx.barriers.read)(tx, addr, mask) {
            Ok(value) => Ok(value),
            Err(abort) => {
                runtime().stats.record_abort(abort.cause);
                rollback_all(tx, None);
                Err(abort)
            }
        }
    })
}

/// Transactional store, dispatched to the current algorithm.
///
/// On `Err` the transaction has been rolled back.
///
/// # Safety
/// - `addr` must be a live, word-aligned shared location for the duration
///   of the transaction.
pub unsafe fn write_barrier(addr: *mut Word, value: Word, mask: Mask) -> Result<(), Abort> {
    with_tx(|tx| {
        assert!(tx.scopes.in_transaction(), "barrier outside a transaction");
        match (tx.barriers.write)(tx, addr, value, mask) {
            Ok(()) => Ok(()),
            Err(abort) => {
                runtime().stats.record_abort(abort.cause);
                rollback_all(tx, None);
                Err(abort)
            }
        }
    })
}

/// Reserve a location for reading (pessimistic algorithms; a no-op where
/// the variant provides no reservation hook).
///
/// # Safety
/// - `addr` must be a live, word-aligned shared location.
pub unsafe fn read_reserve(addr: *mut Word) -> Result<(), Abort> {
    with_tx(|tx| {
        assert!(tx.scopes.in_transaction(), "barrier outside a transaction");
        let Some(hook) = algs::algorithm(tx.algorithm).read_reserve else {
            return Ok(());
        };
        match hook(tx, addr) {
            Ok(()) => Ok(()),
            Err(abort) => {
                runtime().stats.record_abort(abort.cause);
                rollback_all(tx, None);
                Err(abort)
            }
        }
    })
}

/// Reserve a location for writing without storing to it.
///
/// # Safety
/// - `addr` must be a live, word-aligned shared location.
pub unsafe fn write_reserve(addr: *mut Word) -> Result<(), Abort> {
    with_tx(|tx| {
        assert!(tx.scopes.in_transaction(), "barrier outside a transaction");
        let Some(hook) = algs::algorithm(tx.algorithm).write_reserve else {
            return Ok(());
        };
        match hook(tx, addr) {
            Ok(()) => Ok(()),
            Err(abort) => {
                runtime().stats.record_abort(abort.cause);
                rollback_all(tx, None);
                Err(abort)
            }
        }
    })
}

/// Drop a read reservation early (no-op where unsupported).
///
/// # Safety
/// - `addr` must be a live, word-aligned shared location.
pub unsafe fn release(addr: *mut Word) {
    with_tx(|tx| {
        if let Some(hook) = algs::algorithm(tx.algorithm).release {
            hook(tx, addr);
        }
    })
}

// =============================================================================
// Callbacks and Thrown Objects
// =============================================================================

/// Queue a callback to run when the outermost frame commits (FIFO).
///
/// Callbacks must not issue transactional operations.
pub fn register_on_commit(cb: impl FnOnce() + 'static) {
    with_tx(|tx| {
        let scope = tx
            .scopes
            .innermost_mut()
            .expect("callback outside a transaction");
        scope.register_on_commit(Box::new(cb) as ScopeCallback);
    })
}

/// Queue a callback to run if the innermost frame rolls back (FIFO).
///
/// Callbacks must not issue transactional operations.
pub fn register_on_abort(cb: impl FnOnce() + 'static) {
    with_tx(|tx| {
        let scope = tx
            .scopes
            .innermost_mut()
            .expect("callback outside a transaction");
        scope.register_on_rollback(Box::new(cb) as ScopeCallback);
    })
}

/// Declare the byte range `[addr, addr + len)` as protected from rollback.
pub fn set_thrown_object(addr: *mut u8, len: usize) {
    with_tx(|tx| {
        let scope = tx
            .scopes
            .innermost_mut()
            .expect("thrown object outside a transaction");
        scope.set_thrown_object(ThrownObject::new(addr, len));
    })
}

/// Clear the declared thrown object.
pub fn clear_thrown_object() {
    with_tx(|tx| {
        if let Some(scope) = tx.scopes.innermost_mut() {
            scope.clear_thrown_object();
        }
    })
}

/// Log `len` bytes at `addr` for restoration if the innermost frame rolls
/// back, independent of the write barriers (stack/frame protection).
///
/// # Safety
/// - `[addr, addr + len)` must be valid for reads now and writes at
///   rollback time, and must not be touched by concurrent transactions.
pub unsafe fn log_region(addr: *mut u8, len: usize) {
    with_tx(|tx| {
        let scope = tx
            .scopes
            .innermost_mut()
            .expect("logging outside a transaction");
        // SAFETY: forwarded to the caller.
        unsafe { scope.log_region(addr, len) };
    })
}

/// Try to make the running transaction irrevocable. Returns whether the
/// current algorithm could guarantee it.
pub fn become_irrevocable() -> bool {
    with_tx(|tx| {
        if !tx.scopes.in_transaction() {
            return false;
        }
        let alg = algs::algorithm(tx.algorithm);
        if (alg.irrevoc)(tx) {
            if let Some(scope) = tx.scopes.innermost_mut() {
                scope.set_irrevocable();
            }
            true
        } else {
            false
        }
    })
}

// =============================================================================
// Algorithm Selection (re-exported control surface)
// =============================================================================

pub use crate::algs::{
    algorithm_from_name, change_algorithm, change_algorithm_privatizing, current_algorithm,
};

// =============================================================================
// Retry Driver
// =============================================================================

/// Unwind payload carrying an abort from a nested driver out to the
/// outermost one, which owns the retry loop.
struct AbortSignal(#[allow(dead_code)] Abort);

/// Execute `body` as a transaction, retrying from the checkpoint until it
/// commits, and return its result.
///
/// The body reports aborts by propagating the `Abort` a barrier returned
/// (with `?`); the driver rolls nothing back itself — barriers already did
/// — and simply re-runs the body. This loop is the architecture-neutral
/// stand-in for a register-checkpoint restart.
///
/// Nesting is flat: a nested `atomic` joins the enclosing transaction, and
/// an abort inside it rewinds control to the outermost driver, whose retry
/// re-executes the entire nest.
pub fn atomic<T>(mut body: impl FnMut() -> Result<T, Abort>) -> T {
    if transaction_depth() > 0 {
        // Subsumed: run as part of the enclosing transaction. On abort the
        // nest is already unwound; hand control back to the outermost
        // driver.
        match body() {
            Ok(value) => return value,
            Err(abort) => std::panic::resume_unwind(Box::new(AbortSignal(abort))),
        }
    }

    loop {
        match begin_transaction(BeginFlags::default()) {
            TxAction::Restart => continue,
            TxAction::Run | TxAction::RunIrrevocably => {}
        }

        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(&mut body)) {
            Ok(Ok(value)) => {
                if commit_transaction().is_ok() {
                    return value;
                }
            }
            Ok(Err(_)) => {
                // The aborting barrier rolled back; a body that fabricated
                // its own Err may still hold open frames — unwind them.
                cleanup_open_frames();
            }
            Err(payload) => {
                if !payload.is::<AbortSignal>() {
                    // A genuine panic: let it propagate.
                    std::panic::resume_unwind(payload);
                }
                cleanup_open_frames();
            }
        }
    }
}

/// Unwind any frames a non-barrier exit left open.
fn cleanup_open_frames() {
    with_tx(|tx| {
        if tx.scopes.in_transaction() {
            rollback_all(tx, None);
        }
    });
}

// =============================================================================
// Typed Accessors
// =============================================================================

/// Transactionally read a plain-old-data value of 1, 2, 4, or 8 bytes.
///
/// The access is mapped onto the containing word with a byte mask, the way
/// sub-word accesses are instrumented. Adjacent bytes of the same word
/// accessed non-transactionally can still race (granular lost updates are
/// the documented cost of word-level metadata).
///
/// # Safety
/// - `addr` must be live for the duration of the transaction, aligned for
///   `T`, and the access must not span a word boundary.
/// - `T` must be plain old data.
pub unsafe fn read_value<T: Copy>(addr: *const T) -> Result<T, Abort> {
    let size = std::mem::size_of::<T>();
    assert!(
        size <= WORD_BYTES && size.is_power_of_two(),
        "unsupported transactional access size"
    );
    let base = (addr as usize) & !(WORD_BYTES - 1);
    let offset = addr as usize - base;
    assert!(offset + size <= WORD_BYTES, "access spans a word boundary");

    // SAFETY: base is the word containing the access, per the caller's
    // liveness contract.
    let word = unsafe { read_barrier(base as *mut Word, byte_mask(offset, size))? };
    let bytes = word.to_ne_bytes();
    // SAFETY: offset + size <= WORD_BYTES keeps the read in-bounds; T is
    // plain old data per the contract.
    Ok(unsafe { std::ptr::read_unaligned(bytes.as_ptr().add(offset) as *const T) })
}

/// Transactionally write a plain-old-data value of 1, 2, 4, or 8 bytes.
///
/// # Safety
/// - Same contract as [`read_value`].
pub unsafe fn write_value<T: Copy>(addr: *mut T, value: T) -> Result<(), Abort> {
    let size = std::mem::size_of::<T>();
    assert!(
        size <= WORD_BYTES && size.is_power_of_two(),
        "unsupported transactional access size"
    );
    let base = (addr as usize) & !(WORD_BYTES - 1);
    let offset = addr as usize - base;
    assert!(offset + size <= WORD_BYTES, "access spans a word boundary");

    let mut bytes = [0u8; WORD_BYTES];
    // SAFETY: offset + size <= WORD_BYTES keeps the write in-bounds.
    unsafe { std::ptr::write_unaligned(bytes.as_mut_ptr().add(offset) as *mut T, value) };
    // SAFETY: base is the word containing the access, per the caller's
    // liveness contract.
    unsafe {
        write_barrier(
            base as *mut Word,
            Word::from_ne_bytes(bytes),
            byte_mask(offset, size),
        )
    }
}

// =============================================================================
// Introspection
// =============================================================================

/// Current nesting depth on this thread (0 = not in a transaction).
pub fn transaction_depth() -> usize {
    TX.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|tx| tx.scopes.depth())
            .unwrap_or(0)
    })
}

/// The active algorithm this thread's descriptor is dispatching to.
pub fn thread_algorithm() -> Option<AlgorithmId> {
    TX.with(|cell| cell.borrow().as_ref().map(|tx| tx.algorithm))
}
