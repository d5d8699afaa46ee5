use thiserror::Error;

/// Recoverable failure of a single transaction attempt.
///
/// Every variant drives a restart of the surrounding retry loop with a fresh
/// snapshot. Bodies should propagate it with `?` rather than handle it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    #[error("cell is locked by a committing transaction")]
    Locked,

    #[error("cell version {version} is newer than snapshot {snapshot}")]
    Stale { version: u64, snapshot: u64 },

    #[error("cell changed while it was being read")]
    Torn,

    #[error("could not acquire write lock")]
    LockBusy,

    #[error("transaction requested a retry")]
    Retry,
}

impl Conflict {
    /// True for a restart the body asked for, as opposed to one detected by
    /// the engine.
    pub fn is_voluntary(&self) -> bool {
        matches!(self, Conflict::Retry)
    }
}

/// Non-recoverable engine errors. These are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StmError {
    #[error("Precondition violation: transaction started inside another transaction")]
    NestedTransaction,

    #[error("Global epoch exhausted at {0}; a quiescent reset is required")]
    EpochExhausted(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type StmResult<T> = std::result::Result<T, Conflict>;

pub type Result<T> = std::result::Result<T, StmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_display() {
        let err = Conflict::Stale {
            version: 8,
            snapshot: 4,
        };
        assert_eq!(err.to_string(), "cell version 8 is newer than snapshot 4");
        assert!(!err.is_voluntary());
        assert!(Conflict::Retry.is_voluntary());
    }

    #[test]
    fn test_stm_error_display() {
        let err = StmError::InvalidConfig("starvation_threshold must be > 0".into());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: starvation_threshold must be > 0"
        );
    }
}
