// ============================================================================
// Commit Engine
// ============================================================================
//
// Read-write commit protocol:
//
// 1. Lock     - set the lock bit of every redo-log cell; give up on the first
//               cell that is already locked
// 2. Validate - every read-log cell must still be at or below the snapshot
// 3. Write    - copy pending values into their (locked) cells
// 4. Publish  - one fetch-add on the global epoch for the whole batch
// 5. Unlock   - store the new epoch into every written cell
//
// Steps 1 and 2 may fail; every lock taken so far is then released by the
// `LockSet` guard. Steps 3-5 cannot fail.
//
// Locks are taken before reads are validated. Validating first leaves a gap in
// which another commit can change a value this transaction read and then
// overwrites, so the default order must not be reversed. The reverse order is
// available as `ValidationOrder::ValidateThenLock` for callers whose reads do
// not feed their writes.
//
// ============================================================================

use crate::config::{LockOrder, StmConfig, ValidationOrder};
use crate::core::{GlobalEpoch, StmResult, VersionLock};
use crate::transaction::Transaction;
use std::sync::atomic::Ordering;

/// Result of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The write set became visible at this epoch.
    Published(u64),

    /// Nothing was written; the reads were validated.
    Validated,
}

impl CommitOutcome {
    pub fn epoch(&self) -> Option<u64> {
        match self {
            CommitOutcome::Published(epoch) => Some(*epoch),
            CommitOutcome::Validated => None,
        }
    }
}

pub struct CommitEngine<'e> {
    epoch: &'e GlobalEpoch,
    lock_order: LockOrder,
    validation_order: ValidationOrder,
}

impl<'e> CommitEngine<'e> {
    pub fn new(epoch: &'e GlobalEpoch, config: &StmConfig) -> Self {
        Self {
            epoch,
            lock_order: config.lock_order,
            validation_order: config.validation_order,
        }
    }

    /// Run the commit protocol for one attempt.
    ///
    /// # Errors
    /// Returns a [`Conflict`](crate::Conflict) if a lock is busy or a read is
    /// no longer valid. No lock is held and nothing is written in that case.
    pub fn commit(&self, mut tx: Transaction<'_>) -> StmResult<CommitOutcome> {
        if tx.is_read_only() {
            validate_reads(&tx, false)?;
            return Ok(CommitOutcome::Validated);
        }

        if self.lock_order == LockOrder::Address {
            tx.redo_log_mut().sort_by_id();
        }

        let locks = match self.validation_order {
            ValidationOrder::LockThenValidate => {
                let locks = lock_write_set(&tx)?;
                validate_reads(&tx, true)?;
                locks
            }
            ValidationOrder::ValidateThenLock => {
                validate_reads(&tx, false)?;
                lock_write_set(&tx)?
            }
        };

        for entry in tx.redo_log().iter() {
            // SAFETY: every redo-log cell is held in `locks`.
            unsafe { entry.write_back() };
        }

        let epoch = self.epoch.advance();
        locks.publish(epoch);

        Ok(CommitOutcome::Published(epoch))
    }
}

/// Locks held by one commit attempt. Dropping the set without publishing
/// restores every cell to its previous version.
struct LockSet<'a> {
    held: Vec<(&'a VersionLock, u64)>,
}

impl<'a> LockSet<'a> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            held: Vec::with_capacity(capacity),
        }
    }

    fn publish(mut self, epoch: u64) {
        for (lock, _) in self.held.drain(..) {
            lock.publish(epoch);
        }
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        for (lock, previous) in self.held.drain(..) {
            lock.unlock_to(previous);
        }
    }
}

fn lock_write_set<'a>(tx: &Transaction<'a>) -> StmResult<LockSet<'a>> {
    let mut locks = LockSet::with_capacity(tx.write_count());
    for entry in tx.redo_log().iter() {
        let lock = entry.lock_word();
        let previous = lock.try_lock()?;
        locks.held.push((lock, previous));
    }
    Ok(locks)
}

/// Check every read-log cell against the snapshot.
///
/// With `owns_write_locks`, cells in the redo log carry our own lock bit and
/// only their version is compared.
fn validate_reads(tx: &Transaction<'_>, owns_write_locks: bool) -> StmResult<()> {
    let seq = tx.seq();
    for (id, lock) in tx.read_log().iter() {
        let word = lock.load(Ordering::Acquire);
        if owns_write_locks && tx.redo_log().contains(*id) {
            VersionLock::check_owned(word, seq)?;
        } else {
            VersionLock::check(word, seq)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Conflict, TCell};

    fn engine<'e>(epoch: &'e GlobalEpoch, config: &StmConfig) -> CommitEngine<'e> {
        CommitEngine::new(epoch, config)
    }

    #[test]
    fn test_commit_publishes_whole_batch_at_one_epoch() {
        let epoch = GlobalEpoch::new();
        let config = StmConfig::new();
        let a = TCell::new(1u32);
        let b = TCell::new(2u32);

        let mut tx = Transaction::new(epoch.snapshot().unwrap(), 8);
        let va = tx.get(&a).unwrap();
        let vb = tx.get(&b).unwrap();
        tx.set(&a, vb);
        tx.set(&b, va);

        let outcome = engine(&epoch, &config).commit(tx).unwrap();
        assert_eq!(outcome, CommitOutcome::Published(2));
        assert_eq!((a.load_atomic(), b.load_atomic()), (2, 1));
        assert_eq!((a.version(), b.version()), (2, 2));
        assert_eq!(epoch.current(), 2);
    }

    #[test]
    fn test_read_only_commit_does_not_advance_epoch() {
        let epoch = GlobalEpoch::new();
        let config = StmConfig::new();
        let a = TCell::new(1u32);

        let mut tx = Transaction::new(0, 8);
        tx.get(&a).unwrap();

        let outcome = engine(&epoch, &config).commit(tx).unwrap();
        assert_eq!(outcome, CommitOutcome::Validated);
        assert_eq!(outcome.epoch(), None);
        assert_eq!(epoch.current(), 0);
    }

    #[test]
    fn test_busy_lock_releases_earlier_locks() {
        let epoch = GlobalEpoch::new();
        let config = StmConfig::new();
        let a = TCell::new(0u8);
        let b = TCell::new(0u8);

        let held = b.lock_word().try_lock().unwrap();

        let mut tx = Transaction::new(0, 8);
        tx.set(&a, 1);
        tx.set(&b, 1);
        assert_eq!(
            engine(&epoch, &config).commit(tx),
            Err(Conflict::LockBusy)
        );

        assert_eq!(a.version(), 0);
        assert_eq!(a.load_atomic(), 0);
        b.lock_word().unlock_to(held);
        assert_eq!(epoch.current(), 0);
    }

    #[test]
    fn test_stale_read_aborts_and_unlocks() {
        let epoch = GlobalEpoch::new();
        let config = StmConfig::new();
        let src = TCell::new(10i32);
        let dst = TCell::new(0i32);

        let mut tx = Transaction::new(epoch.snapshot().unwrap(), 8);
        let amount = tx.get(&src).unwrap();
        tx.set(&dst, amount);

        // A concurrent commit moves `src` past the snapshot.
        let mut other = Transaction::new(epoch.snapshot().unwrap(), 8);
        other.set(&src, 20);
        engine(&epoch, &config).commit(other).unwrap();

        assert!(matches!(
            engine(&epoch, &config).commit(tx),
            Err(Conflict::Stale { .. })
        ));
        assert_eq!(dst.version(), 0);
        assert_eq!(dst.load_atomic(), 0);
    }

    #[test]
    fn test_read_then_write_same_cell_detects_lost_update() {
        let epoch = GlobalEpoch::new();
        let config = StmConfig::new();
        let counter = TCell::new(0u64);

        let mut first = Transaction::new(epoch.snapshot().unwrap(), 8);
        let seen = first.get(&counter).unwrap();
        first.set(&counter, seen + 1);

        let mut second = Transaction::new(epoch.snapshot().unwrap(), 8);
        let seen = second.get(&counter).unwrap();
        second.set(&counter, seen + 1);

        engine(&epoch, &config).commit(second).unwrap();
        assert!(engine(&epoch, &config).commit(first).is_err());
        assert_eq!(counter.load_atomic(), 1);
        assert_eq!(counter.version(), 2);
    }

    #[test]
    fn test_address_lock_order_commits() {
        let epoch = GlobalEpoch::new();
        let config = StmConfig::new().lock_order(LockOrder::Address);
        let cells: Vec<TCell<usize>> = (0..12).map(|_| TCell::new(0)).collect();

        let mut tx = Transaction::new(0, 4);
        for (i, cell) in cells.iter().enumerate().rev() {
            tx.set(cell, i);
        }
        for cell in &cells {
            tx.get(cell).unwrap();
        }

        engine(&epoch, &config).commit(tx).unwrap();
        for (i, cell) in cells.iter().enumerate() {
            assert_eq!(cell.load_atomic(), i);
            assert_eq!(cell.version(), 2);
        }
    }

    #[test]
    fn test_validate_then_lock_rejects_locked_read() {
        let epoch = GlobalEpoch::new();
        let config = StmConfig::new().validation_order(ValidationOrder::ValidateThenLock);
        let read = TCell::new(1u8);
        let write = TCell::new(0u8);

        let mut tx = Transaction::new(0, 8);
        tx.get(&read).unwrap();
        tx.set(&write, 5);

        let held = read.lock_word().try_lock().unwrap();
        assert_eq!(engine(&epoch, &config).commit(tx), Err(Conflict::Locked));
        assert_eq!(write.version(), 0);
        read.lock_word().unlock_to(held);
    }
}
