use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub commits: AtomicU64,
    pub read_only_commits: AtomicU64,
    pub conflicts: AtomicU64,
    pub retries: AtomicU64,
    pub parks: AtomicU64,
    pub starvation_episodes: AtomicU64,
}

impl Counters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, epoch: u64) -> StmStats {
        StmStats {
            commits: self.commits.load(Ordering::Relaxed),
            read_only_commits: self.read_only_commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
            starvation_episodes: self.starvation_episodes.load(Ordering::Relaxed),
            epoch,
        }
    }
}

/// Point-in-time view of an engine's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StmStats {
    /// Read-write transactions that published a write set
    pub commits: u64,

    /// Transactions that finished without writing
    pub read_only_commits: u64,

    /// Attempts aborted by the engine
    pub conflicts: u64,

    /// Attempts restarted because the body asked to
    pub retries: u64,

    /// Times a writer parked behind a starving thread
    pub parks: u64,

    /// Times a writer crossed the starvation threshold
    pub starvation_episodes: u64,

    /// Global epoch when the snapshot was taken
    pub epoch: u64,
}

impl fmt::Display for StmStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "STM Stats: {} commits, {} read-only, {} conflicts, {} retries, {} parks, {} starving, epoch {}",
            self.commits,
            self.read_only_commits,
            self.conflicts,
            self.retries,
            self.parks,
            self.starvation_episodes,
            self.epoch
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_counters() {
        let counters = Counters::default();
        Counters::bump(&counters.commits);
        Counters::bump(&counters.commits);
        Counters::bump(&counters.parks);

        let stats = counters.snapshot(4);
        assert_eq!(stats.commits, 2);
        assert_eq!(stats.parks, 1);
        assert_eq!(stats.epoch, 4);
        assert!(stats.to_string().starts_with("STM Stats: 2 commits"));
    }
}
