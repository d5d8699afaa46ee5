// ============================================================================
// Read Engine
// ============================================================================
//
// Read-only transactions: snapshot the global epoch, run the body against a
// view that only exposes `get`, restart on conflict. No locks are taken and
// no shared state is written, so readers never block writers or each other.
//
// ============================================================================

use crate::core::{Conflict, GlobalEpoch, Result, StmResult};
use crate::stats::Counters;
use crate::transaction::{ReadTransaction, TransactionScope};

pub struct ReadEngine<'e> {
    epoch: &'e GlobalEpoch,
    counters: &'e Counters,
}

impl<'e> ReadEngine<'e> {
    pub(crate) fn new(epoch: &'e GlobalEpoch, counters: &'e Counters) -> Self {
        Self { epoch, counters }
    }

    /// Run `body` until it completes against a consistent snapshot.
    ///
    /// # Errors
    /// Only precondition violations: a nested transaction or an exhausted
    /// epoch. Conflicts are retried internally.
    pub fn run<O, F>(&self, body: F) -> Result<O>
    where
        F: Fn(&ReadTransaction) -> StmResult<O>,
    {
        let _scope = TransactionScope::enter()?;

        loop {
            let tx = ReadTransaction::new(self.epoch.snapshot()?);
            match body(&tx) {
                Ok(output) => {
                    Counters::bump(&self.counters.read_only_commits);
                    return Ok(output);
                }
                Err(Conflict::Retry) => {
                    Counters::bump(&self.counters.retries);
                }
                Err(conflict) => {
                    Counters::bump(&self.counters.conflicts);
                    log::trace!("read-only attempt at {} aborted: {}", tx.seq(), conflict);
                    std::hint::spin_loop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StmError, TCell};
    use std::cell::Cell;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_read_engine_returns_snapshot_value() {
        let epoch = GlobalEpoch::new();
        let counters = Counters::default();
        let cell = TCell::new(11u32);

        let value = ReadEngine::new(&epoch, &counters)
            .run(|tx| tx.get(&cell))
            .unwrap();

        assert_eq!(value, 11);
        assert_eq!(counters.read_only_commits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_read_engine_restarts_on_conflict() {
        let epoch = GlobalEpoch::new();
        let counters = Counters::default();
        let attempts = Cell::new(0);

        let value = ReadEngine::new(&epoch, &counters)
            .run(|_tx| {
                attempts.set(attempts.get() + 1);
                if attempts.get() < 3 {
                    return Err(Conflict::Locked);
                }
                Ok(attempts.get())
            })
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(counters.conflicts.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_read_engine_rejects_nesting() {
        let epoch = GlobalEpoch::new();
        let counters = Counters::default();
        let engine = ReadEngine::new(&epoch, &counters);

        let inner = engine
            .run(|_| Ok(engine.run(|_| Ok(()))))
            .unwrap();
        assert_eq!(inner, Err(StmError::NestedTransaction));
    }
}
