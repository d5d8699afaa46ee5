use super::commit::{CommitEngine, CommitOutcome};
use super::fairness::{Admission, FairnessController};
use super::read::ReadEngine;
use crate::config::StmConfig;
use crate::core::{Conflict, GlobalEpoch, Result, StmResult};
use crate::stats::{Counters, StmStats};
use crate::transaction::{ReadTransaction, Transaction, TransactionScope};
use lazy_static::lazy_static;
use std::sync::Arc;

// Process-wide engine behind the free `read_only` / `read_write` functions
lazy_static! {
    static ref GLOBAL_STM: Stm = Stm::from_env();
}

/// A transactional memory engine: one global epoch, one fairness layer.
///
/// Cells are not bound to an engine, but a cell must only ever be used with
/// one: its version word is meaningful only against that engine's epoch.
pub struct Stm {
    epoch: GlobalEpoch,
    config: StmConfig,
    counters: Arc<Counters>,
    fairness: FairnessController,
}

impl Default for Stm {
    fn default() -> Self {
        Self::build(StmConfig::default())
    }
}

impl Stm {
    /// Create an engine with a validated configuration.
    pub fn new(config: StmConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: StmConfig) -> Self {
        Self::with_epoch(config, GlobalEpoch::new())
    }

    pub(crate) fn with_epoch(config: StmConfig, epoch: GlobalEpoch) -> Self {
        let counters = Arc::new(Counters::default());
        let fairness = FairnessController::new(&config, Arc::clone(&counters));
        Self {
            epoch,
            config,
            counters,
            fairness,
        }
    }

    fn from_env() -> Self {
        match StmConfig::from_env() {
            Ok(config) => Self::build(config),
            Err(err) => {
                log::warn!("ignoring STM environment configuration: {}", err);
                Self::default()
            }
        }
    }

    /// The process-wide engine.
    pub fn global() -> &'static Stm {
        &GLOBAL_STM
    }

    pub fn config(&self) -> &StmConfig {
        &self.config
    }

    /// Current global epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.current()
    }

    pub fn fairness(&self) -> &FairnessController {
        &self.fairness
    }

    pub fn stats(&self) -> StmStats {
        self.counters.snapshot(self.epoch.current())
    }

    /// Run a read-only transaction to completion.
    ///
    /// # Errors
    /// [`StmError::NestedTransaction`](crate::StmError::NestedTransaction) if
    /// called from inside a transaction body, or
    /// [`StmError::EpochExhausted`](crate::StmError::EpochExhausted).
    pub fn try_read_only<O, F>(&self, body: F) -> Result<O>
    where
        F: Fn(&ReadTransaction) -> StmResult<O>,
    {
        ReadEngine::new(&self.epoch, &self.counters).run(body)
    }

    /// Run a read-only transaction to completion.
    ///
    /// # Panics
    /// On a precondition violation (see [`Stm::try_read_only`]).
    pub fn read_only<O, F>(&self, body: F) -> O
    where
        F: Fn(&ReadTransaction) -> StmResult<O>,
    {
        self.try_read_only(body)
            .unwrap_or_else(|err| panic!("read_only: {}", err))
    }

    /// Run a read-write transaction to completion.
    ///
    /// The body is re-run with a fresh snapshot until its writes commit. It
    /// must not have side effects outside its transaction.
    ///
    /// # Errors
    /// Only precondition violations, as for [`Stm::try_read_only`].
    pub fn try_read_write<'env, O, F>(&self, body: F) -> Result<O>
    where
        F: Fn(&mut Transaction<'env>) -> StmResult<O>,
    {
        let _scope = TransactionScope::enter()?;
        let engine = CommitEngine::new(&self.epoch, &self.config);
        let mut attempts = self.fairness.attempts();

        loop {
            let mut tx = Transaction::new(self.epoch.snapshot()?, self.config.index_threshold);

            let output = match body(&mut tx) {
                Ok(output) => output,
                Err(Conflict::Retry) => {
                    Counters::bump(&self.counters.retries);
                    continue;
                }
                Err(conflict) => {
                    self.note_conflict(&tx, conflict);
                    attempts.record_conflict();
                    continue;
                }
            };

            // A completed attempt with no writes never parks and its failed
            // validation is not counted toward starvation.
            if tx.is_read_only() {
                let seq = tx.seq();
                match engine.commit(tx) {
                    Ok(_) => {
                        Counters::bump(&self.counters.read_only_commits);
                        attempts.finish();
                        return Ok(output);
                    }
                    Err(conflict) => {
                        Counters::bump(&self.counters.conflicts);
                        log::trace!("read-only validation at {} failed: {}", seq, conflict);
                        attempts.record_read_conflict();
                        continue;
                    }
                }
            }

            if self.fairness.admit(&attempts) == Admission::Parked {
                continue;
            }

            let seq = tx.seq();
            match engine.commit(tx) {
                Ok(CommitOutcome::Published(epoch)) => {
                    Counters::bump(&self.counters.commits);
                    log::trace!("committed snapshot {} at epoch {}", seq, epoch);
                    attempts.finish();
                    return Ok(output);
                }
                Ok(CommitOutcome::Validated) => {
                    Counters::bump(&self.counters.read_only_commits);
                    attempts.finish();
                    return Ok(output);
                }
                Err(conflict) => {
                    Counters::bump(&self.counters.conflicts);
                    log::trace!("commit of snapshot {} aborted: {}", seq, conflict);
                    attempts.record_conflict();
                }
            }
        }
    }

    /// Run a read-write transaction to completion.
    ///
    /// # Panics
    /// On a precondition violation (see [`Stm::try_read_write`]).
    pub fn read_write<'env, O, F>(&self, body: F) -> O
    where
        F: Fn(&mut Transaction<'env>) -> StmResult<O>,
    {
        self.try_read_write(body)
            .unwrap_or_else(|err| panic!("read_write: {}", err))
    }

    fn note_conflict(&self, tx: &Transaction<'_>, conflict: Conflict) {
        Counters::bump(&self.counters.conflicts);
        log::trace!(
            "attempt at {} aborted after {} reads, {} writes: {}",
            tx.seq(),
            tx.read_count(),
            tx.write_count(),
            conflict
        );
    }
}
