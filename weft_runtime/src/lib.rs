//! Weft: a software transactional memory runtime.
//!
//! Application threads execute blocks of shared-memory reads and writes as
//! atomic transactions with automatic conflict detection, rollback, and
//! retry. Committed transactions appear to execute in some serial order
//! despite running concurrently on many threads.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Boundary API (api)                          │
//! │   begin / commit / abort · read & write barriers · atomic()     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │          Algorithm registry + dispatch (algs)                   │
//! │   ┌─────────────┐   ┌───────────────┐                           │
//! │   │ Nano        │   │ ByteEager     │   quiescence-gated switch │
//! │   │ lazy, orecs │   │ eager, locks  │                           │
//! │   └─────────────┘   └───────────────┘                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   TxThread descriptor · scope stack · checkpoint · backoff      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   weft_core: orec table · bytelock table · redo/undo logs       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use weft_runtime::{atomic, read_value, write_value};
//!
//! static mut COUNTER: usize = 0;
//!
//! let addr = unsafe { std::ptr::addr_of_mut!(COUNTER) };
//! atomic(|| {
//!     let v: usize = unsafe { read_value(addr)? };
//!     unsafe { write_value(addr, v + 1)? };
//!     Ok(())
//! });
//! ```
//!
//! # Choosing an algorithm
//!
//! `Nano` (the default) is optimistic: reads never lock, writes buffer, and
//! commit acquires/validates/writes back. `ByteEager` is pessimistic:
//! reader/writer bytelocks up front, in-place stores with an undo log, no
//! commit-time validation. Switch with [`change_algorithm`], which waits
//! for quiescence before repointing dispatch.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

pub mod algs;
pub mod api;
pub mod error;
pub mod scope;
pub mod system;

mod alloc;
mod backoff;
mod checkpoint;
mod descriptor;
mod threads;

// Re-exports: the boundary surface.
pub use algs::{Algorithm, AlgorithmId};
pub use api::{
    abort_transaction, algorithm_from_name, atomic, become_irrevocable, begin_transaction,
    change_algorithm, change_algorithm_privatizing, clear_thrown_object, commit_transaction,
    current_algorithm, log_region, read_barrier, read_reserve, read_value, register_on_abort,
    register_on_commit, release, set_thrown_object, thread_init, thread_shutdown,
    transaction_depth, write_barrier, write_reserve, write_value, BeginFlags, TxAction,
};
pub use alloc::TxAlloc;
pub use backoff::Backoff;
pub use checkpoint::Checkpoint;
pub use descriptor::{
    BarrierSet, BytelockList, BytelockRef, OrecList, OrecLog, OrecRef, OrecSnapshot, TxThread,
};
pub use error::{Abort, InitError, SwitchError, ThreadInitError};
pub use scope::{Scope, ScopeFlags, ScopeStack};
pub use system::{runtime, sys_init, sys_shutdown, StmRuntime};
pub use threads::{ThreadEntry, ThreadRegistry};

// The substrate types callers touch directly.
pub use weft_core::{
    AbortCause, Mask, StmConfig, StmStats, ThrownObject, Word, FULL_MASK, WORD_BYTES,
};
