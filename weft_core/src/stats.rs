//! Runtime statistics.
//!
//! Process-wide atomic counters for commit/abort activity, kept out of the
//! hot path (per-thread descriptors count locally and merge here at thread
//! shutdown).

use std::sync::atomic::{AtomicU64, Ordering};

/// Why a transaction aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortCause {
    /// CAS failure, version mismatch, or validation failure.
    Conflict,
    /// A bounded spin expired.
    Timeout,
    /// The user cancelled the transaction.
    Explicit,
}

/// Statistics about transactional activity.
#[derive(Debug, Default)]
pub struct StmStats {
    /// Committed read-write transactions.
    pub commits: AtomicU64,
    /// Committed read-only transactions.
    pub ro_commits: AtomicU64,
    /// Aborts caused by conflicts.
    pub conflict_aborts: AtomicU64,
    /// Aborts caused by spin-budget expiry.
    pub timeout_aborts: AtomicU64,
    /// Explicit user aborts.
    pub explicit_aborts: AtomicU64,
    /// Completed algorithm switches.
    pub algorithm_switches: AtomicU64,
    /// Threads that ever registered a descriptor.
    pub threads_registered: AtomicU64,
}

impl StmStats {
    /// Create empty statistics.
    pub const fn new() -> Self {
        Self {
            commits: AtomicU64::new(0),
            ro_commits: AtomicU64::new(0),
            conflict_aborts: AtomicU64::new(0),
            timeout_aborts: AtomicU64::new(0),
            explicit_aborts: AtomicU64::new(0),
            algorithm_switches: AtomicU64::new(0),
            threads_registered: AtomicU64::new(0),
        }
    }

    /// Record a commit.
    #[inline]
    pub fn record_commit(&self, read_only: bool) {
        if read_only {
            self.ro_commits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.commits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an abort.
    #[inline]
    pub fn record_abort(&self, cause: AbortCause) {
        let counter = match cause {
            AbortCause::Conflict => &self.conflict_aborts,
            AbortCause::Timeout => &self.timeout_aborts,
            AbortCause::Explicit => &self.explicit_aborts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed algorithm switch.
    pub fn record_switch(&self) {
        self.algorithm_switches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a thread registration.
    pub fn record_thread(&self) {
        self.threads_registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Total aborts across all causes.
    pub fn total_aborts(&self) -> u64 {
        self.conflict_aborts.load(Ordering::Relaxed)
            + self.timeout_aborts.load(Ordering::Relaxed)
            + self.explicit_aborts.load(Ordering::Relaxed)
    }

    /// Total commits (read-only and read-write).
    pub fn total_commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed) + self.ro_commits.load(Ordering::Relaxed)
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.commits.store(0, Ordering::Relaxed);
        self.ro_commits.store(0, Ordering::Relaxed);
        self.conflict_aborts.store(0, Ordering::Relaxed);
        self.timeout_aborts.store(0, Ordering::Relaxed);
        self.explicit_aborts.store(0, Ordering::Relaxed);
        self.algorithm_switches.store(0, Ordering::Relaxed);
        self.threads_registered.store(0, Ordering::Relaxed);
    }

    /// Print a summary of transactional activity.
    pub fn print_summary(&self) {
        eprintln!("=== STM Statistics ===");
        eprintln!(
            "Commits: {} read-write, {} read-only",
            self.commits.load(Ordering::Relaxed),
            self.ro_commits.load(Ordering::Relaxed)
        );
        eprintln!(
            "Aborts: {} conflict, {} timeout, {} explicit",
            self.conflict_aborts.load(Ordering::Relaxed),
            self.timeout_aborts.load(Ordering::Relaxed),
            self.explicit_aborts.load(Ordering::Relaxed)
        );
        eprintln!(
            "Threads: {}, algorithm switches: {}",
            self.threads_registered.load(Ordering::Relaxed),
            self.algorithm_switches.load(Ordering::Relaxed)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_recording() {
        let stats = StmStats::new();
        stats.record_commit(false);
        stats.record_commit(false);
        stats.record_commit(true);
        assert_eq!(stats.commits.load(Ordering::Relaxed), 2);
        assert_eq!(stats.ro_commits.load(Ordering::Relaxed), 1);
        assert_eq!(stats.total_commits(), 3);
    }

    #[test]
    fn test_abort_recording_by_cause() {
        let stats = StmStats::new();
        stats.record_abort(AbortCause::Conflict);
        stats.record_abort(AbortCause::Timeout);
        stats.record_abort(AbortCause::Timeout);
        stats.record_abort(AbortCause::Explicit);
        assert_eq!(stats.conflict_aborts.load(Ordering::Relaxed), 1);
        assert_eq!(stats.timeout_aborts.load(Ordering::Relaxed), 2);
        assert_eq!(stats.explicit_aborts.load(Ordering::Relaxed), 1);
        assert_eq!(stats.total_aborts(), 4);
    }

    #[test]
    fn test_reset() {
        let stats = StmStats::new();
        stats.record_commit(false);
        stats.record_switch();
        stats.reset();
        assert_eq!(stats.total_commits(), 0);
        assert_eq!(stats.algorithm_switches.load(Ordering::Relaxed), 0);
    }
}
