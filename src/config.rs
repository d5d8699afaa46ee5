use crate::core::{Result, StmError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Order in which a commit acquires the locks of its write set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockOrder {
    /// Order of first write. Cheapest; two transactions writing the same
    /// cells in opposite orders can repeatedly abort each other.
    #[default]
    Insertion,

    /// Ascending cell address. Costs a sort per commit, rules out the
    /// opposite-order livelock.
    Address,
}

impl FromStr for LockOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insertion" => Ok(LockOrder::Insertion),
            "address" => Ok(LockOrder::Address),
            other => Err(format!("unknown lock order '{}'", other)),
        }
    }
}

/// Whether reads are validated after or before the write locks are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationOrder {
    /// Lock the write set, then validate reads. Single-lock atomic.
    #[default]
    LockThenValidate,

    /// Validate reads, then lock the write set. Only sound when no value
    /// read by the transaction feeds a value it writes; a concurrent commit
    /// in the gap goes undetected.
    ValidateThenLock,
}

impl FromStr for ValidationOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lock-then-validate" => Ok(ValidationOrder::LockThenValidate),
            "validate-then-lock" => Ok(ValidationOrder::ValidateThenLock),
            other => Err(format!("unknown validation order '{}'", other)),
        }
    }
}

/// Engine configuration
///
/// # Examples
///
/// ```
/// use seqstm::{LockOrder, StmConfig};
/// use std::time::Duration;
///
/// let config = StmConfig::new()
///     .starvation_threshold(4)
///     .park_timeout(Duration::from_millis(2))
///     .lock_order(LockOrder::Address);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StmConfig {
    /// Consecutive conflicts before a writer is considered starving
    pub starvation_threshold: u32,

    /// Attempts after which a starving writer is reported in the log
    pub starvation_warn_attempts: u32,

    /// Upper bound on busy-wait spins between attempts
    pub backoff_spin_limit: u32,

    /// Longest a parked writer sleeps before re-checking the starve indicator
    pub park_timeout: Duration,

    /// Redo log size at which lookups switch from a scan to a hash index
    pub index_threshold: usize,

    pub lock_order: LockOrder,

    pub validation_order: ValidationOrder,
}

impl Default for StmConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl StmConfig {
    pub fn new() -> Self {
        Self {
            starvation_threshold: 16,
            starvation_warn_attempts: 1024,
            backoff_spin_limit: 1024,
            park_timeout: Duration::from_millis(10),
            index_threshold: 8,
            lock_order: LockOrder::Insertion,
            validation_order: ValidationOrder::LockThenValidate,
        }
    }

    /// Defaults overridden by `SEQSTM_*` environment variables.
    ///
    /// Recognized: `SEQSTM_STARVATION_THRESHOLD`, `SEQSTM_BACKOFF_SPIN_LIMIT`,
    /// `SEQSTM_PARK_TIMEOUT_MS`, `SEQSTM_INDEX_THRESHOLD`, `SEQSTM_LOCK_ORDER`,
    /// `SEQSTM_VALIDATION_ORDER`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(v) = lookup("SEQSTM_STARVATION_THRESHOLD") {
            config.starvation_threshold = parse_var("SEQSTM_STARVATION_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("SEQSTM_STARVATION_WARN_ATTEMPTS") {
            config.starvation_warn_attempts = parse_var("SEQSTM_STARVATION_WARN_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("SEQSTM_BACKOFF_SPIN_LIMIT") {
            config.backoff_spin_limit = parse_var("SEQSTM_BACKOFF_SPIN_LIMIT", &v)?;
        }
        if let Some(v) = lookup("SEQSTM_PARK_TIMEOUT_MS") {
            config.park_timeout =
                Duration::from_millis(parse_var("SEQSTM_PARK_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("SEQSTM_INDEX_THRESHOLD") {
            config.index_threshold = parse_var("SEQSTM_INDEX_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("SEQSTM_LOCK_ORDER") {
            config.lock_order = v.parse().map_err(StmError::InvalidConfig)?;
        }
        if let Some(v) = lookup("SEQSTM_VALIDATION_ORDER") {
            config.validation_order = v.parse().map_err(StmError::InvalidConfig)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the starvation threshold
    pub fn starvation_threshold(mut self, attempts: u32) -> Self {
        self.starvation_threshold = attempts;
        self
    }

    pub fn starvation_warn_attempts(mut self, attempts: u32) -> Self {
        self.starvation_warn_attempts = attempts;
        self
    }

    /// Set the backoff spin limit
    pub fn backoff_spin_limit(mut self, spins: u32) -> Self {
        self.backoff_spin_limit = spins;
        self
    }

    /// Set the park timeout
    pub fn park_timeout(mut self, timeout: Duration) -> Self {
        self.park_timeout = timeout;
        self
    }

    pub fn index_threshold(mut self, entries: usize) -> Self {
        self.index_threshold = entries;
        self
    }

    pub fn lock_order(mut self, order: LockOrder) -> Self {
        self.lock_order = order;
        self
    }

    pub fn validation_order(mut self, order: ValidationOrder) -> Self {
        self.validation_order = order;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.starvation_threshold == 0 {
            return Err(StmError::InvalidConfig(
                "starvation_threshold must be > 0".to_string(),
            ));
        }

        if self.park_timeout.is_zero() {
            return Err(StmError::InvalidConfig(
                "park_timeout must be non-zero".to_string(),
            ));
        }

        if self.starvation_warn_attempts < self.starvation_threshold {
            return Err(StmError::InvalidConfig(
                "starvation_warn_attempts cannot be below starvation_threshold".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| StmError::InvalidConfig(format!("{} has invalid value '{}'", key, value)))
}
