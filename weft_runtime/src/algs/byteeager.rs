//! ByteEager: bytelock-based, eager, in-place.
//!
//! The pessimistic counterpart to Nano, in the TLRW family: readers and
//! writers take bytelocks up front, stores go straight to memory with the
//! old value recorded in the undo log, and commit is just lock release —
//! no validation, the locks carried the proof. Deadlock avoidance is by
//! bounded spin: every wait site has a timeout that turns into an abort,
//! and aborts back off with randomized exponential delays.
//!
//! The lock version closes the privatization hole: a reader that dropped
//! its byte while stalled behind a writer re-checks the version it first
//! recorded, and a mismatch means a writer ran in between — abort rather
//! than read a privatized word.

use super::Algorithm;
use crate::descriptor::{BarrierSet, TxThread};
use crate::error::Abort;
use crate::system::runtime;
use weft_core::bytelock::{Bytelock, READER_WORDS};
use weft_core::word::{load_word, store_masked};
use weft_core::{Mask, ThrownObject, UndoEntry, Word, FULL_MASK};

/// Registry record for this variant.
pub(crate) fn descriptor() -> Algorithm {
    Algorithm {
        name: "ByteEager",
        begin,
        barriers: ro_barriers(),
        rollback,
        irrevoc,
        switcher: on_switch,
        read_reserve: Some(read_reserve),
        write_reserve: Some(write_reserve),
        release: Some(release),
        privatization_safe: true,
    }
}

fn ro_barriers() -> BarrierSet {
    BarrierSet {
        read: read_ro,
        write: write_ro,
        commit: commit_ro,
    }
}

fn rw_barriers() -> BarrierSet {
    BarrierSet {
        read: read_rw,
        write: write_rw,
        commit: commit_rw,
    }
}

fn begin(tx: &mut TxThread) -> bool {
    tx.alloc.on_tx_begin();
    false
}

/// Take (or re-validate) a read lock, without loading the word.
///
/// The slow path drops our byte while an owner is present and spins on the
/// owner word with the READ budget, then retries. On the successful path
/// the first read records the lock version; any later attempt that finds a
/// different version saw an intervening writer and aborts.
fn acquire_read(tx: &mut TxThread, lock: &'static Bytelock) -> Result<(), Abort> {
    let rt = runtime();
    let slot = tx.slot;
    let mut tries: u32 = 0;

    // Log the location on first contact only; reader_version doubles as the
    // "have I been here" marker.
    if lock.reader_version(slot) == 0 {
        tx.r_bytelocks.push(lock);
    }

    loop {
        lock.set_reader(slot);

        if lock.owner() == 0 {
            let recorded = lock.reader_version(slot);
            if recorded == 0 {
                lock.set_reader_version(slot, lock.version());
            } else if recorded != lock.version() {
                // A writer ran while we stalled.
                return Err(Abort::conflict());
            }
            return Ok(());
        }

        // A writer holds the lock: get out of its drain set, then wait.
        lock.clear_reader(slot);
        while lock.owner() != 0 {
            tries += 1;
            if tries > rt.config.read_timeout {
                return Err(Abort::timeout());
            }
            std::hint::spin_loop();
        }
    }
}

/// Acquire write ownership: CAS the owner word, evict our own read, check
/// the version against any prior read, drain the other readers, and bump
/// the version.
fn acquire_write(tx: &mut TxThread, lock: &'static Bytelock) -> Result<(), Abort> {
    let rt = runtime();
    let slot = tx.slot;

    let mut tries: u32 = 0;
    while !lock.try_acquire(tx.id) {
        tries += 1;
        if tries > rt.config.acquire_timeout {
            return Err(Abort::timeout());
        }
        std::hint::spin_loop();
    }

    // Ownership is ours; rollback releases it if anything below aborts.
    tx.w_bytelocks.push(lock);
    lock.clear_reader(slot);

    let recorded = lock.reader_version(slot);
    if recorded != 0 && recorded != lock.version() {
        return Err(Abort::conflict());
    }

    // Wait for the readers to drain, four slots at a time.
    for word in 0..READER_WORDS {
        let mut tries: u32 = 0;
        while lock.readers_word(word) != 0 {
            tries += 1;
            if tries > rt.config.drain_timeout {
                return Err(Abort::timeout());
            }
            std::hint::spin_loop();
        }
    }

    lock.bump_version();
    Ok(())
}

/// Transactional load, read-only context.
fn read_ro(tx: &mut TxThread, addr: *mut Word, _mask: Mask) -> Result<Word, Abort> {
    let lock = runtime().bytelocks.bytelock_for(addr);

    // Fast path: we already hold a read lock.
    if lock.reader(tx.slot) {
        // SAFETY: barriers receive live, word-aligned shared addresses.
        return Ok(unsafe { load_word(addr) });
    }

    acquire_read(tx, lock)?;
    // SAFETY: as above; the read lock now holds writers out.
    Ok(unsafe { load_word(addr) })
}

/// Transactional load, writing context: our own write lock also licenses
/// the read.
fn read_rw(tx: &mut TxThread, addr: *mut Word, _mask: Mask) -> Result<Word, Abort> {
    let lock = runtime().bytelocks.bytelock_for(addr);

    if lock.owner() == tx.id {
        // SAFETY: we own the word; in-place value is ours to read.
        return Ok(unsafe { load_word(addr) });
    }
    if lock.reader(tx.slot) {
        // SAFETY: read lock held.
        return Ok(unsafe { load_word(addr) });
    }

    acquire_read(tx, lock)?;
    // SAFETY: read lock acquired above.
    Ok(unsafe { load_word(addr) })
}

/// Log the old value and store in place. Requires ownership of the word.
unsafe fn logged_store(tx: &mut TxThread, addr: *mut Word, value: Word, mask: Mask) {
    // SAFETY: forwarded to the caller (owner of the bytelock).
    let old = unsafe { load_word(addr) };
    tx.undo_log.insert(UndoEntry {
        addr,
        value: old,
        mask,
    });
    // SAFETY: forwarded to the caller.
    unsafe { store_masked(addr, value, mask) };
}

/// Transactional store, read-only context: acquire, store, promote.
fn write_ro(tx: &mut TxThread, addr: *mut Word, value: Word, mask: Mask) -> Result<(), Abort> {
    let lock = runtime().bytelocks.bytelock_for(addr);
    acquire_write(tx, lock)?;
    // SAFETY: acquire_write drained the readers; the word is ours.
    unsafe { logged_store(tx, addr, value, mask) };
    tx.on_first_write(rw_barriers());
    Ok(())
}

/// Transactional store, writing context.
fn write_rw(tx: &mut TxThread, addr: *mut Word, value: Word, mask: Mask) -> Result<(), Abort> {
    let lock = runtime().bytelocks.bytelock_for(addr);

    if lock.owner() == tx.id {
        // SAFETY: already the owner.
        unsafe { logged_store(tx, addr, value, mask) };
        return Ok(());
    }

    acquire_write(tx, lock)?;
    // SAFETY: acquire_write drained the readers; the word is ours.
    unsafe { logged_store(tx, addr, value, mask) };
    Ok(())
}

/// Read-only commit: drop the read locks. The locks enforced consistency
/// all along, so there is nothing to validate.
fn commit_ro(tx: &mut TxThread) -> Result<(), Abort> {
    let slot = tx.slot;
    for lock in &tx.r_bytelocks {
        lock.clear_reader(slot);
        lock.clear_reader_version(slot);
    }
    tx.r_bytelocks.clear();
    tx.on_commit_ro(ro_barriers());
    Ok(())
}

/// Writing commit: release write locks, then read locks.
fn commit_rw(tx: &mut TxThread) -> Result<(), Abort> {
    let slot = tx.slot;
    for lock in &tx.w_bytelocks {
        lock.release_owner();
    }
    for lock in &tx.r_bytelocks {
        lock.clear_reader(slot);
        lock.clear_reader_version(slot);
    }
    tx.r_bytelocks.clear();
    tx.w_bytelocks.clear();
    tx.undo_log.reset();
    tx.on_commit_rw(ro_barriers());
    Ok(())
}

/// Reserve a location for reading without loading it.
fn read_reserve(tx: &mut TxThread, addr: *mut Word) -> Result<(), Abort> {
    let lock = runtime().bytelocks.bytelock_for(addr);
    if lock.owner() == tx.id || lock.reader(tx.slot) {
        return Ok(());
    }
    acquire_read(tx, lock)
}

/// Reserve a location for writing: take ownership and log the old value,
/// but perform no store.
fn write_reserve(tx: &mut TxThread, addr: *mut Word) -> Result<(), Abort> {
    let lock = runtime().bytelocks.bytelock_for(addr);

    if lock.owner() == tx.id {
        // SAFETY: owner; logging the current value is a plain owned read.
        let old = unsafe { load_word(addr) };
        tx.undo_log.insert(UndoEntry {
            addr,
            value: old,
            mask: FULL_MASK,
        });
        return Ok(());
    }

    acquire_write(tx, lock)?;
    // SAFETY: ownership acquired and readers drained.
    let old = unsafe { load_word(addr) };
    tx.undo_log.insert(UndoEntry {
        addr,
        value: old,
        mask: FULL_MASK,
    });

    // The first write lock promotes the transaction to the writing state.
    if tx.w_bytelocks.len() == 1 {
        tx.on_first_write(rw_barriers());
    }
    Ok(())
}

/// Drop a read reservation early. The location stays logged, so commit and
/// rollback cleanup remain correct either way.
fn release(tx: &mut TxThread, addr: *mut Word) {
    let lock = runtime().bytelocks.bytelock_for(addr);
    if lock.owner() != tx.id {
        lock.clear_reader(tx.slot);
    }
}

/// Unwinder: undo in-place stores LIFO (skipping the thrown range),
/// release locks, back off.
fn rollback(tx: &mut TxThread, thrown: Option<ThrownObject>) -> Option<ThrownObject> {
    // SAFETY: every logged word is still owned by this transaction; the
    // write locks are released only below.
    unsafe { tx.undo_log.undo_all(thrown) };

    let slot = tx.slot;
    for lock in &tx.w_bytelocks {
        lock.release_owner();
    }
    for lock in &tx.r_bytelocks {
        lock.clear_reader(slot);
        lock.clear_reader_version(slot);
    }

    tx.r_bytelocks.clear();
    tx.w_bytelocks.clear();
    tx.undo_log.reset();
    tx.on_rollback(ro_barriers());

    let (floor, ceiling) = {
        let cfg = &runtime().config;
        (cfg.backoff_floor, cfg.backoff_ceiling)
    };
    tx.backoff.exp_backoff(tx.consec_aborts, floor, ceiling);
    thrown
}

/// In-flight irrevocability is not supported by this variant.
fn irrevoc(_tx: &mut TxThread) -> bool {
    false
}

/// Bytelock state is self-cleaning (commit and rollback leave every lock
/// free), so activation needs no global reset.
fn on_switch() {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::AlgorithmId;

    #[test]
    fn test_descriptor_shape() {
        let d = descriptor();
        assert_eq!(d.name, "ByteEager");
        assert!(d.privatization_safe);
        assert!(d.read_reserve.is_some());
        assert!(d.write_reserve.is_some());
        assert!(d.release.is_some());
    }

    #[test]
    fn test_barrier_sets_are_distinct() {
        let ro = ro_barriers();
        let rw = rw_barriers();
        assert!(ro.read as usize != rw.read as usize);
        assert!(ro.write as usize != rw.write as usize);
        assert!(ro.commit as usize != rw.commit as usize);
    }

    #[test]
    fn test_algorithm_id_index() {
        assert_eq!(AlgorithmId::ByteEager.index(), 1);
    }
}
