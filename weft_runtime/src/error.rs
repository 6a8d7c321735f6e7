//! Error and abort types.
//!
//! Transactional aborts are control flow, not failures: a barrier that
//! returns `Err(Abort)` has already rolled the transaction back, and the
//! retry driver re-executes the body from the checkpoint. The error enums
//! below cover the genuinely fallible surfaces: bring-up, thread
//! registration, and algorithm switching.

use weft_core::{AbortCause, ConfigError};

/// A transactional abort in flight.
///
/// Produced by barriers and commit when the algorithm detects a conflict or
/// exhausts a spin budget. By the time the caller sees one, the transaction
/// has been rolled back; propagate it with `?` to the retry driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort {
    /// What triggered the abort.
    pub cause: AbortCause,
}

impl Abort {
    /// Abort due to CAS failure, version mismatch, or validation failure.
    #[inline]
    pub const fn conflict() -> Self {
        Self {
            cause: AbortCause::Conflict,
        }
    }

    /// Abort due to an exhausted spin budget.
    #[inline]
    pub const fn timeout() -> Self {
        Self {
            cause: AbortCause::Timeout,
        }
    }

    /// Abort requested by the user.
    #[inline]
    pub const fn explicit() -> Self {
        Self {
            cause: AbortCause::Explicit,
        }
    }
}

impl std::fmt::Display for Abort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cause {
            AbortCause::Conflict => write!(f, "transaction aborted: conflict"),
            AbortCause::Timeout => write!(f, "transaction aborted: spin budget exhausted"),
            AbortCause::Explicit => write!(f, "transaction aborted: user cancel"),
        }
    }
}

/// Errors from `sys_init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The runtime was already initialized (possibly implicitly, by the
    /// first transactional operation).
    AlreadyInitialized,
    /// The supplied configuration failed validation.
    Config(ConfigError),
}

impl From<ConfigError> for InitError {
    fn from(e: ConfigError) -> Self {
        InitError::Config(e)
    }
}

impl std::fmt::Display for InitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitError::AlreadyInitialized => write!(f, "runtime already initialized"),
            InitError::Config(e) => write!(f, "invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for InitError {}

/// Errors from `thread_init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadInitError {
    /// This thread already has a descriptor.
    AlreadyInitialized,
    /// All reader slots are taken; no more threads can register until one
    /// shuts down.
    TooManyThreads,
}

impl std::fmt::Display for ThreadInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadInitError::AlreadyInitialized => {
                write!(f, "thread descriptor already initialized")
            }
            ThreadInitError::TooManyThreads => {
                write!(f, "all thread slots are in use")
            }
        }
    }
}

impl std::error::Error for ThreadInitError {}

/// Errors from `change_algorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchError {
    /// The target algorithm is not privatization-safe, but the caller
    /// demanded privatization safety.
    PrivatizationUnsafe,
}

impl std::fmt::Display for SwitchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchError::PrivatizationUnsafe => {
                write!(f, "target algorithm is not privatization-safe")
            }
        }
    }
}

impl std::error::Error for SwitchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_constructors() {
        assert_eq!(Abort::conflict().cause, AbortCause::Conflict);
        assert_eq!(Abort::timeout().cause, AbortCause::Timeout);
        assert_eq!(Abort::explicit().cause, AbortCause::Explicit);
    }

    #[test]
    fn test_init_error_from_config() {
        let e: InitError = ConfigError::ZeroSpinBudget.into();
        assert_eq!(e, InitError::Config(ConfigError::ZeroSpinBudget));
    }

    #[test]
    fn test_display_is_nonempty() {
        assert!(!Abort::conflict().to_string().is_empty());
        assert!(!InitError::AlreadyInitialized.to_string().is_empty());
        assert!(!SwitchError::PrivatizationUnsafe.to_string().is_empty());
    }
}
