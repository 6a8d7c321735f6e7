//! Process-wide runtime state and lifecycle.
//!
//! The metadata tables, thread registry, and statistics are global,
//! initialized exactly once, and accessed without locks afterwards (the
//! tables synchronize through atomics on individual words). `sys_init`
//! brings the runtime up with an explicit configuration; any transactional
//! operation issued before that initializes it implicitly with defaults.

use crate::error::InitError;
use crate::threads::ThreadRegistry;
use std::sync::OnceLock;
use weft_core::{BytelockTable, OrecTable, StmConfig, StmStats};

/// The process-wide runtime: configuration snapshot, metadata tables,
/// thread roster, and statistics.
#[derive(Debug)]
pub struct StmRuntime {
    /// Immutable configuration the runtime was built with.
    pub config: StmConfig,
    /// Ownership-record table.
    pub orecs: OrecTable,
    /// Bytelock table.
    pub bytelocks: BytelockTable,
    /// Registered transactional threads.
    pub threads: ThreadRegistry,
    /// Process-wide counters.
    pub stats: StmStats,
}

impl StmRuntime {
    fn build(config: StmConfig) -> Self {
        Self {
            orecs: OrecTable::new(config.orec_count),
            bytelocks: BytelockTable::new(config.bytelock_count),
            threads: ThreadRegistry::new(),
            stats: StmStats::new(),
            config,
        }
    }
}

static RUNTIME: OnceLock<StmRuntime> = OnceLock::new();

/// Initialize the runtime with an explicit configuration.
///
/// Returns [`InitError::AlreadyInitialized`] when the runtime was already
/// brought up — including implicitly, by an earlier transactional
/// operation on any thread.
pub fn sys_init(config: StmConfig) -> Result<(), InitError> {
    config.validate()?;
    let mut installed = false;
    RUNTIME.get_or_init(|| {
        installed = true;
        StmRuntime::build(config.clone())
    });
    if installed {
        Ok(())
    } else {
        Err(InitError::AlreadyInitialized)
    }
}

/// The process-wide runtime, initializing with defaults on first touch.
pub fn runtime() -> &'static StmRuntime {
    RUNTIME.get_or_init(|| StmRuntime::build(StmConfig::default()))
}

/// Tear down at process exit: reports statistics when configured to.
///
/// Metadata tables are process-lived and deliberately not reclaimed; after
/// shutdown the runtime stays usable (this mirrors the tables' static
/// lifetime, which descriptors hold references into).
pub fn sys_shutdown() {
    if let Some(rt) = RUNTIME.get() {
        if rt.config.report_stats {
            rt.stats.print_summary();
        }
    }
}
