// ============================================================================
// Global Epoch and Per-Cell Version Locks
// ============================================================================
//
// A generalized seqlock: one shared, always-even epoch counter and one
// version word per cell. The low bit of a version word is the write lock,
// the remaining bits hold the epoch at which the cell was last published.
//
// ============================================================================

use super::error::{Conflict, StmError, StmResult};
use std::sync::atomic::{AtomicU64, Ordering};

/// Low bit of a version word.
pub const LOCK_BIT: u64 = 1;

/// Epoch values above this refuse to start new transactions.
///
/// The counter is 64 bits and moves by 2 per commit, so the ceiling is never
/// reached in practice. The 2^32 headroom absorbs commits that were already
/// in flight when the ceiling was crossed.
pub const EPOCH_CEILING: u64 = u64::MAX - (1 << 32) - 1;

#[inline]
pub fn is_locked(word: u64) -> bool {
    word & LOCK_BIT != 0
}

#[inline]
pub fn version_of(word: u64) -> u64 {
    word & !LOCK_BIT
}

/// Process-wide commit counter shared by every cell of one engine.
#[derive(Debug)]
pub struct GlobalEpoch {
    counter: AtomicU64,
}

impl Default for GlobalEpoch {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalEpoch {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Start the counter at an arbitrary even value.
    pub(crate) fn starting_at(epoch: u64) -> Self {
        debug_assert!(!is_locked(epoch), "epoch must be even");
        Self {
            counter: AtomicU64::new(epoch),
        }
    }

    /// Current epoch, used as the snapshot of a new transaction.
    pub fn snapshot(&self) -> Result<u64, StmError> {
        let epoch = self.counter.load(Ordering::Acquire);
        if epoch > EPOCH_CEILING {
            log::error!("global epoch {} passed the ceiling", epoch);
            return Err(StmError::EpochExhausted(epoch));
        }
        Ok(epoch)
    }

    /// Current epoch without the ceiling check, for diagnostics.
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Publish one committed batch and return the epoch it is visible at.
    pub(crate) fn advance(&self) -> u64 {
        self.counter.fetch_add(2, Ordering::AcqRel).wrapping_add(2)
    }
}

/// Combined version and lock word of a single cell.
#[derive(Debug, Default)]
pub struct VersionLock {
    word: AtomicU64,
}

impl VersionLock {
    pub const fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> u64 {
        self.word.load(order)
    }

    /// Check a word against a snapshot: it must be unlocked and no newer than
    /// the snapshot.
    #[inline]
    pub fn check(word: u64, snapshot: u64) -> StmResult<()> {
        if is_locked(word) {
            return Err(Conflict::Locked);
        }
        if word > snapshot {
            return Err(Conflict::Stale {
                version: word,
                snapshot,
            });
        }
        Ok(())
    }

    /// Like [`VersionLock::check`] for a word whose lock bit is ours.
    #[inline]
    pub fn check_owned(word: u64, snapshot: u64) -> StmResult<()> {
        let version = version_of(word);
        if version > snapshot {
            return Err(Conflict::Stale { version, snapshot });
        }
        Ok(())
    }

    /// Set the lock bit. Returns the unlocked word that was replaced.
    #[inline]
    pub(crate) fn try_lock(&self) -> StmResult<u64> {
        let previous = self.word.fetch_or(LOCK_BIT, Ordering::Acquire);
        if is_locked(previous) {
            return Err(Conflict::LockBusy);
        }
        Ok(previous)
    }

    /// Release a lock without publishing, restoring the previous version.
    #[inline]
    pub(crate) fn unlock_to(&self, previous: u64) {
        debug_assert!(!is_locked(previous));
        self.word.store(previous, Ordering::Release);
    }

    /// Release a lock and publish the cell at `epoch`.
    #[inline]
    pub(crate) fn publish(&self, epoch: u64) {
        debug_assert!(!is_locked(epoch));
        self.word.store(epoch, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_advances_by_two() {
        let epoch = GlobalEpoch::new();
        assert_eq!(epoch.snapshot().unwrap(), 0);
        assert_eq!(epoch.advance(), 2);
        assert_eq!(epoch.advance(), 4);
        assert_eq!(epoch.current(), 4);
    }

    #[test]
    fn test_epoch_ceiling() {
        let epoch = GlobalEpoch::starting_at(EPOCH_CEILING + 2);
        assert!(matches!(
            epoch.snapshot(),
            Err(StmError::EpochExhausted(_))
        ));
    }

    #[test]
    fn test_lock_cycle() {
        let lock = VersionLock::new();
        let previous = lock.try_lock().unwrap();
        assert_eq!(previous, 0);
        assert!(is_locked(lock.load(Ordering::Relaxed)));
        assert_eq!(lock.try_lock(), Err(Conflict::LockBusy));

        lock.unlock_to(previous);
        assert_eq!(lock.load(Ordering::Relaxed), 0);

        lock.try_lock().unwrap();
        lock.publish(6);
        assert_eq!(lock.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_check_words() {
        assert!(VersionLock::check(4, 4).is_ok());
        assert_eq!(VersionLock::check(5, 8), Err(Conflict::Locked));
        assert_eq!(
            VersionLock::check(10, 8),
            Err(Conflict::Stale {
                version: 10,
                snapshot: 8
            })
        );
        assert!(VersionLock::check_owned(5, 4).is_ok());
        assert!(VersionLock::check_owned(7, 4).is_err());
    }
}
