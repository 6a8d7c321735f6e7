//! Nano: orec-based, value-validating, lazy.
//!
//! A deliberate step away from timestamp algorithms: no global counter at
//! all, at the price of quadratic validation. Reads never lock — each read
//! double-samples the orec around the data load, then re-validates the
//! entire orec log. Writes buffer into the redo log; commit acquires the
//! write set's orecs, validates the log once more, writes back, and
//! releases with a version bump.
//!
//! With no timestamp bottleneck, the variant holds up on multi-chip
//! machines and on short transactions, where the quadratic term never gets
//! room to hurt.

use super::Algorithm;
use crate::backoff::spin_cycles;
use crate::descriptor::{BarrierSet, OrecSnapshot, TxThread};
use crate::error::Abort;
use crate::system::runtime;
use std::sync::atomic::{compiler_fence, Ordering};
use weft_core::orec::is_locked;
use weft_core::word::{load_word, merge};
use weft_core::{Mask, ThrownObject, Word, WriteSetEntry};

/// Registry record for this variant.
pub(crate) fn descriptor() -> Algorithm {
    Algorithm {
        name: "Nano",
        begin,
        barriers: ro_barriers(),
        rollback,
        irrevoc,
        switcher: on_switch,
        read_reserve: None,
        write_reserve: None,
        release: None,
        privatization_safe: false,
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

/// Pause between retries of an inconsistent orec sample.
const SNAPSHOT_RETRY_PAUSE: u64 = 64;

/// Transactional load, read-only context.
///
/// The consistent-snapshot dance: sample the orec, load the word, sample
/// the orec again. Equal unlocked samples mean the load happened at that
/// version; log it and re-validate the whole orec log so the transaction
/// never holds an inconsistent view.
fn read_ro(tx: &mut TxThread, addr: *mut Word, _mask: Mask) -> Result<Word, Abort> {
    let rt = runtime();
    let orec = rt.orecs.orec_for(addr);
    let mut tries: u32 = 0;

    loop {
        let before = orec.load();
        compiler_fence(Ordering::SeqCst);
        // SAFETY: the caller hands barriers only live, word-aligned shared
        // addresses; the acquire load pairs with the orec samples around it.
        let value = unsafe { load_word(addr) };
        compiler_fence(Ordering::SeqCst);
        let after = orec.load();

        if before == after && !is_locked(before) {
            tx.orec_reads.push(OrecSnapshot {
                orec,
                version: after,
            });
            // Quadratic validation: the entire log must still hold.
            for snap in &tx.orec_reads {
                if snap.orec.load() != snap.version {
                    return Err(Abort::conflict());
                }
            }
            return Ok(value);
        }

        // Inconsistent sample or a held lock: bounded pause, then retry.
        tries += 1;
        if tries > rt.config.read_timeout {
            return Err(Abort::timeout());
        }
        if is_locked(after) {
            spin_cycles(SNAPSHOT_RETRY_PAUSE);
        }
    }
}

/// Transactional load, writing context: check the redo log for a
/// read-after-write hit first.
fn read_rw(tx: &mut TxThread, addr: *mut Word, mask: Mask) -> Result<Word, Abort> {
    let buffered = tx.writes.find(addr);
    if let Some(entry) = buffered {
        if entry.mask & mask == mask {
            return Ok(entry.value);
        }
    }

    let value = read_ro(tx, addr, mask)?;
    // Partial hit: lay the buffered bytes over the memory value.
    match buffered {
        Some(entry) => Ok(merge(value, entry.value, entry.mask)),
        None => Ok(value),
    }
}

/// Transactional store, read-only context: buffer and promote to writer.
fn write_ro(tx: &mut TxThread, addr: *mut Word, value: Word, mask: Mask) -> Result<(), Abort> {
    tx.writes.insert(WriteSetEntry { addr, value, mask });
    tx.on_first_write(rw_barriers());
    Ok(())
}

/// Transactional store, writing context.
fn write_rw(tx: &mut TxThread, addr: *mut Word, value: Word, mask: Mask) -> Result<(), Abort> {
    tx.writes.insert(WriteSetEntry { addr, value, mask });
    Ok(())
}

/// Read-only commit: nothing to publish, drop the orec log.
fn commit_ro(tx: &mut TxThread) -> Result<(), Abort> {
    tx.orec_reads.clear();
    tx.on_commit_ro(ro_barriers());
    Ok(())
}

/// Writing commit: acquire, validate, write back, release.
fn commit_rw(tx: &mut TxThread) -> Result<(), Abort> {
    let rt = runtime();

    // Phase 1: acquire every orec covering the write set. A failed CAS or a
    // foreign lock aborts; rollback releases whatever got acquired.
    for i in 0..tx.writes.len() {
        let entry = tx.writes.entry(i);
        let orec = rt.orecs.orec_for(entry.addr);
        let observed = orec.load();
        if observed == tx.fingerprint {
            continue; // already ours via an earlier entry
        }
        if is_locked(observed) {
            return Err(Abort::conflict());
        }
        if !orec.try_lock(observed, tx.fingerprint) {
            return Err(Abort::conflict());
        }
        orec.stash_prior(observed);
        tx.orec_locks.push(orec);
    }

    // Phase 2: validate the read log under the locks. An entry is fine if
    // its orec still shows the observed version, or if we hold the lock and
    // the stashed prior version matches.
    for snap in &tx.orec_reads {
        let now = snap.orec.load();
        if now != snap.version && (now != tx.fingerprint || snap.orec.prior() != snap.version) {
            return Err(Abort::conflict());
        }
    }

    // Phase 3: writeback in insertion order.
    // SAFETY: every destination word's orec is held by this thread.
    unsafe { tx.writes.writeback() };

    // Phase 4: release with a version bump.
    for orec in &tx.orec_locks {
        orec.release_bumped();
    }

    tx.orec_reads.clear();
    tx.writes.reset();
    tx.orec_locks.clear();
    tx.on_commit_rw(ro_barriers());
    Ok(())
}

/// Unwinder: restore pre-lock versions (nothing was written under a lock
/// that aborts), carry buffered writes into the thrown range, reset logs.
fn rollback(tx: &mut TxThread, thrown: Option<ThrownObject>) -> Option<ThrownObject> {
    if let Some(range) = thrown {
        // The escaping object must observe this transaction's buffered
        // writes; everything else in the redo log evaporates.
        // SAFETY: the thrown range is caller-declared live memory.
        unsafe { tx.writes.rollback_into(range) };
    }

    for orec in &tx.orec_locks {
        orec.release_unchanged();
    }

    tx.orec_reads.clear();
    tx.writes.reset();
    tx.orec_locks.clear();
    tx.on_rollback(ro_barriers());
    thrown
}

/// In-flight irrevocability is not supported by this variant.
fn irrevoc(_tx: &mut TxThread) -> bool {
    false
}

/// No global state to reset: the variant keeps no timestamp and its orec
/// versions stay meaningful across activations.
fn on_switch() {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::AlgorithmId;

    #[test]
    fn test_descriptor_shape() {
        let d = descriptor();
        assert_eq!(d.name, "Nano");
        assert!(!d.privatization_safe);
        assert!(d.read_reserve.is_none() && d.write_reserve.is_none() && d.release.is_none());
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
        assert_eq!(AlgorithmId::Nano.index(), 0);
    }
}
