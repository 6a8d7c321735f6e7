//! Boundary API behavior: typed accessors, the retry driver, descriptor
//! lifecycle, and irrevocability.

use parking_lot::Mutex;
use weft_runtime::{
    atomic, become_irrevocable, begin_transaction, commit_transaction, read_value, sys_init,
    thread_init, thread_shutdown, transaction_depth, write_value, BeginFlags, StmConfig,
    ThreadInitError, TxAction,
};

static SERIAL: Mutex<()> = Mutex::new(());

fn setup() -> parking_lot::MutexGuard<'static, ()> {
    let _ = sys_init(StmConfig::for_testing());
    SERIAL.lock()
}

#[test]
fn test_typed_round_trips() {
    let _guard = setup();

    // An aligned word holds all the sub-word fields.
    let cell: &'static mut u64 = Box::leak(Box::new(0));
    let base = cell as *mut u64;

    atomic(|| unsafe {
        write_value(base as *mut u32, 0xDEAD_BEEFu32)?;
        write_value((base as *mut u8).add(4), 0x7Fu8)?;
        Ok(())
    });

    let (word, byte) = atomic(|| unsafe {
        let w: u32 = read_value(base as *const u32)?;
        let b: u8 = read_value((base as *const u8).add(4))?;
        Ok((w, b))
    });
    assert_eq!(word, 0xDEAD_BEEF);
    assert_eq!(byte, 0x7F);

    // The sub-word stores landed in the right bytes of the raw cell.
    assert_eq!(*cell & 0xFFFF_FFFF, 0xDEAD_BEEF);
    assert_eq!((*cell >> 32) & 0xFF, 0x7F);
}

#[test]
fn test_atomic_returns_body_value() {
    let _guard = setup();
    let value = atomic(|| Ok(42));
    assert_eq!(value, 42);
}

#[test]
fn test_nested_atomic_joins_enclosing_transaction() {
    let _guard = setup();
    let value = atomic(|| {
        let inner = atomic(|| Ok(1));
        assert_eq!(transaction_depth(), 1);
        Ok(inner + 1)
    });
    assert_eq!(value, 2);
}

#[test]
fn test_transaction_depth_tracks_nesting() {
    let _guard = setup();
    assert_eq!(transaction_depth(), 0);

    assert_eq!(begin_transaction(BeginFlags::default()), TxAction::Run);
    assert_eq!(transaction_depth(), 1);
    begin_transaction(BeginFlags::default());
    assert_eq!(transaction_depth(), 2);

    commit_transaction().unwrap();
    assert_eq!(transaction_depth(), 1);
    commit_transaction().unwrap();
    assert_eq!(transaction_depth(), 0);
}

#[test]
fn test_irrevocability_is_declined_by_shipped_variants() {
    let _guard = setup();

    // Requesting it at begin degrades to a plain run.
    assert_eq!(
        begin_transaction(BeginFlags {
            irrevocable: true,
            ..Default::default()
        }),
        TxAction::Run
    );
    // And an in-flight request reports failure.
    assert!(!become_irrevocable());
    commit_transaction().unwrap();
}

#[test]
fn test_log_region_restores_on_abort() {
    let _guard = setup();
    let mut buf = [0xABu8; 20];
    let saved = buf;

    begin_transaction(BeginFlags::default());
    unsafe { weft_runtime::log_region(buf.as_mut_ptr(), buf.len()) };
    buf.fill(0);
    let _ = weft_runtime::abort_transaction(None);

    assert_eq!(buf, saved);
}

#[test]
fn test_thread_lifecycle() {
    let _guard = setup();

    let handle = std::thread::spawn(|| {
        thread_init().unwrap();
        assert_eq!(thread_init(), Err(ThreadInitError::AlreadyInitialized));
        atomic(|| Ok(()));
        thread_shutdown();
        // A fresh descriptor can be created after shutdown.
        thread_init().unwrap();
        thread_shutdown();
    });
    handle.join().unwrap();
}
