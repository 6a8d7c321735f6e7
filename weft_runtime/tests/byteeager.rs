//! End-to-end scenarios for the ByteEager (eager, in-place) algorithm.
//!
//! This binary switches the process to ByteEager once, up front. Tests
//! serialize on a file-wide lock because they assert on shared bytelock
//! versions.

use parking_lot::Mutex;
use std::sync::{Arc, Barrier};
use std::time::Duration;
use weft_core::AbortCause;
use weft_runtime::{
    abort_transaction, atomic, begin_transaction, change_algorithm, commit_transaction,
    read_barrier, release, runtime, sys_init, write_barrier, AlgorithmId, BeginFlags, StmConfig,
    Word, FULL_MASK,
};

static SERIAL: Mutex<()> = Mutex::new(());

fn setup() -> parking_lot::MutexGuard<'static, ()> {
    // Real (finite) spin budgets: the eager protocol resolves lock-order
    // collisions by timeout-abort-retry, so budgets must expire.
    let _ = sys_init(StmConfig::default());
    let guard = SERIAL.lock();
    if weft_runtime::current_algorithm() != AlgorithmId::ByteEager {
        change_algorithm(AlgorithmId::ByteEager).unwrap();
    }
    guard
}

fn leak_word(init: Word) -> *mut Word {
    Box::leak(Box::new(init)) as *mut Word
}

#[test]
fn test_in_place_write_and_undo_on_abort() {
    let _guard = setup();
    let addr = leak_word(10);

    begin_transaction(BeginFlags::default());
    unsafe {
        write_barrier(addr, 20, FULL_MASK).unwrap();
        // Eager: the store is already in memory.
        assert_eq!(std::ptr::read(addr), 20);
        assert_eq!(read_barrier(addr, FULL_MASK).unwrap(), 20);
    }
    let _ = abort_transaction(None);

    // Undo restored the pre-transaction value and released the lock.
    assert_eq!(unsafe { std::ptr::read(addr) }, 10);
    let lock = runtime().bytelocks.bytelock_for(addr);
    assert_eq!(lock.owner(), 0);
}

#[test]
fn test_commit_releases_locks_and_keeps_writes() {
    let _guard = setup();
    let addr = leak_word(1);
    let lock = runtime().bytelocks.bytelock_for(addr);
    let version_before = lock.version();

    begin_transaction(BeginFlags::default());
    unsafe { write_barrier(addr, 2, FULL_MASK).unwrap() };
    commit_transaction().unwrap();

    assert_eq!(unsafe { std::ptr::read(addr) }, 2);
    assert_eq!(lock.owner(), 0);
    // Exactly one ownership acquisition.
    assert_eq!(lock.version(), version_before + 1);
}

#[test]
fn test_reader_drain_timeout_aborts_then_writer_succeeds() {
    let _guard = setup();
    let addr = leak_word(0) as usize;
    let reader_holding = Arc::new(Barrier::new(2));
    let stats = &runtime().stats;
    let timeouts_before = stats.timeout_aborts.load(std::sync::atomic::Ordering::Relaxed);

    let reader = {
        let reader_holding = Arc::clone(&reader_holding);
        std::thread::spawn(move || {
            let addr = addr as *mut Word;
            begin_transaction(BeginFlags::default());
            assert_eq!(unsafe { read_barrier(addr, FULL_MASK) }.unwrap(), 0);
            reader_holding.wait();
            // Hold the read lock well past the writer's drain budget.
            std::thread::sleep(Duration::from_millis(20));
            commit_transaction().unwrap();
        })
    };

    let writer = {
        let reader_holding = Arc::clone(&reader_holding);
        std::thread::spawn(move || {
            let addr = addr as *mut Word;
            reader_holding.wait();
            // The drain loop times out against the held reader byte and
            // aborts; the retry loop wins once the reader commits.
            atomic(|| unsafe { write_barrier(addr, 7, FULL_MASK) });
        })
    };

    reader.join().unwrap();
    writer.join().unwrap();

    assert_eq!(unsafe { std::ptr::read(addr as *const Word) }, 7);
    // The held reader byte must have burned at least one drain budget.
    assert!(stats.timeout_aborts.load(std::sync::atomic::Ordering::Relaxed) > timeouts_before);
}

#[test]
fn test_version_mismatch_after_early_release_aborts_reader() {
    let _guard = setup();
    let addr = leak_word(0) as usize;

    let reader_released = Arc::new(Barrier::new(2));
    let writer_committed = Arc::new(Barrier::new(2));

    let reader = {
        let reader_released = Arc::clone(&reader_released);
        let writer_committed = Arc::clone(&writer_committed);
        std::thread::spawn(move || {
            let addr = addr as *mut Word;
            begin_transaction(BeginFlags::default());
            // First read records the lock version.
            assert_eq!(unsafe { read_barrier(addr, FULL_MASK) }.unwrap(), 0);
            // Drop the reader byte early; the recorded version stays.
            unsafe { release(addr) };
            reader_released.wait();
            writer_committed.wait();
            // The writer bumped the version in between: the re-read must
            // detect the privatization hazard and abort.
            let err = unsafe { read_barrier(addr, FULL_MASK) }.expect_err("stale version");
            assert_eq!(err.cause, AbortCause::Conflict);
        })
    };

    let writer = {
        let reader_released = Arc::clone(&reader_released);
        let writer_committed = Arc::clone(&writer_committed);
        std::thread::spawn(move || {
            let addr = addr as *mut Word;
            reader_released.wait();
            begin_transaction(BeginFlags::default());
            unsafe { write_barrier(addr, 5, FULL_MASK).unwrap() };
            commit_transaction().unwrap();
            writer_committed.wait();
        })
    };

    reader.join().unwrap();
    writer.join().unwrap();
    assert_eq!(unsafe { std::ptr::read(addr as *const Word) }, 5);
}

#[test]
fn test_write_reserve_promotes_and_logs_old_value() {
    let _guard = setup();
    let addr = leak_word(42);

    begin_transaction(BeginFlags::default());
    unsafe {
        weft_runtime::write_reserve(addr).unwrap();
        // Reservation took ownership without storing.
        assert_eq!(std::ptr::read(addr), 42);
        write_barrier(addr, 43, FULL_MASK).unwrap();
    }
    let _ = abort_transaction(None);
    assert_eq!(unsafe { std::ptr::read(addr) }, 42);
}

#[test]
fn test_read_reserve_blocks_writers() {
    let _guard = setup();
    let addr = leak_word(0);

    begin_transaction(BeginFlags::default());
    unsafe { weft_runtime::read_reserve(addr).unwrap() };
    let lock = runtime().bytelocks.bytelock_for(addr);
    // Our reader byte is visible to any would-be owner's drain loop.
    assert!((0..weft_core::bytelock::READER_WORDS).any(|i| lock.readers_word(i) != 0));
    commit_transaction().unwrap();
    assert!((0..weft_core::bytelock::READER_WORDS).all(|i| lock.readers_word(i) == 0));
}

#[test]
fn test_concurrent_counter_increments() {
    let _guard = setup();
    const THREADS: usize = 4;
    const INCREMENTS: usize = 200;

    let addr = leak_word(0) as usize;
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let start = Arc::clone(&start);
            std::thread::spawn(move || {
                let addr = addr as *mut Word;
                start.wait();
                for _ in 0..INCREMENTS {
                    atomic(|| {
                        let v = unsafe { read_barrier(addr, FULL_MASK)? };
                        unsafe { write_barrier(addr, v + 1, FULL_MASK) }
                    });
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        unsafe { std::ptr::read(addr as *const Word) },
        THREADS * INCREMENTS
    );
}

#[test]
fn test_acquire_timeout_aborts_second_writer() {
    let _guard = setup();
    let addr = leak_word(0) as usize;
    let owner_holding = Arc::new(Barrier::new(2));
    let loser_done = Arc::new(Barrier::new(2));

    let owner = {
        let owner_holding = Arc::clone(&owner_holding);
        let loser_done = Arc::clone(&loser_done);
        std::thread::spawn(move || {
            let addr = addr as *mut Word;
            begin_transaction(BeginFlags::default());
            unsafe { write_barrier(addr, 1, FULL_MASK).unwrap() };
            owner_holding.wait();
            // Keep ownership until the second writer has timed out.
            loser_done.wait();
            commit_transaction().unwrap();
        })
    };

    let loser = {
        let owner_holding = Arc::clone(&owner_holding);
        let loser_done = Arc::clone(&loser_done);
        std::thread::spawn(move || {
            let addr = addr as *mut Word;
            owner_holding.wait();
            begin_transaction(BeginFlags::default());
            let err = unsafe { write_barrier(addr, 2, FULL_MASK) }.expect_err("owner held");
            assert_eq!(err.cause, AbortCause::Timeout);
            loser_done.wait();
        })
    };

    owner.join().unwrap();
    loser.join().unwrap();
    assert_eq!(unsafe { std::ptr::read(addr as *const Word) }, 1);
}

#[test]
fn test_sub_word_store_preserves_neighbors() {
    let _guard = setup();
    let addr = leak_word(0x1122_3344);

    begin_transaction(BeginFlags::default());
    unsafe { write_barrier(addr, 0xFF00, 0xFF00).unwrap() };
    commit_transaction().unwrap();
    assert_eq!(unsafe { std::ptr::read(addr) }, 0x1122_FF44);
}
