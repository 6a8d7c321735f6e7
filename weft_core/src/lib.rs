//! Weft synchronization substrate.
//!
//! This crate provides the shared metadata and per-transaction data
//! structures on which the Weft STM algorithms are built:
//!
//! - **Orec table**: hash-addressed ownership records. Each orec holds either
//!   a monotone version (lock bit clear) or the fingerprint of the locking
//!   thread (lock bit set), plus a scratch slot for the pre-lock version.
//! - **Bytelock table**: TLRW-style reader/writer locks with one owner word
//!   and a per-thread reader byte, versioned so a stalled reader can detect
//!   an intervening writer.
//! - **Write set**: a hash-indexed redo log with O(1) amortized reset and
//!   in-order writeback.
//! - **Undo log**: old-value log for in-place algorithms, applied LIFO on
//!   abort with optional filtering against a protected byte range.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       SHARED METADATA                            │
//! │  ┌───────────────────────┐    ┌───────────────────────────────┐  │
//! │  │ OrecTable             │    │ BytelockTable                 │  │
//! │  │  addr ──hash──▶ orec  │    │  addr ──hash──▶ bytelock      │  │
//! │  │  { v | p }            │    │  { owner, reader[64], ver }   │  │
//! │  └───────────────────────┘    └───────────────────────────────┘  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                    PER-TRANSACTION LOGS                          │
//! │  WriteSet (redo)    UndoLog (in-place)    orec / bytelock logs   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Thread Safety
//!
//! The metadata tables are initialized once and then mutated only through
//! atomic operations on individual words; they are shared by all threads.
//! The logs are exclusively owned by one thread's transaction descriptor and
//! are not `Sync`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod bytelock;
pub mod config;
pub mod orec;
pub mod stats;
pub mod undolog;
pub mod word;
pub mod writeset;

pub use bytelock::{Bytelock, BytelockTable, MAX_THREAD_SLOTS};
pub use config::{ConfigError, StmConfig};
pub use orec::{Orec, OrecTable, LOCK_BIT};
pub use stats::{AbortCause, StmStats};
pub use undolog::{ThrownObject, UndoEntry, UndoLog};
pub use word::{Mask, Word, FULL_MASK, WORD_BYTES};
pub use writeset::{WriteSet, WriteSetEntry};
