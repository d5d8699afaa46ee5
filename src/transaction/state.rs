// ============================================================================
// Transaction State
// ============================================================================
//
// Per-attempt state of a transaction. A fresh value is built for every retry
// and dropped on both success and failure; nothing in here is shared.
//
// Read-write transactions carry a snapshot epoch, a read log and a redo log.
// Read-only transactions carry only the snapshot.
//
// ============================================================================

use super::log::{ReadLog, RedoLog};
use crate::core::{StmResult, TCell};

/// Read-write transaction handed to `read_write` bodies.
pub struct Transaction<'a> {
    /// Global epoch at the start of the attempt
    seq: u64,

    read_log: ReadLog<'a>,

    redo_log: RedoLog<'a>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(seq: u64, index_threshold: usize) -> Self {
        Self {
            seq,
            read_log: ReadLog::new(),
            redo_log: RedoLog::new(index_threshold),
        }
    }

    /// Snapshot epoch of this attempt.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Read a cell.
    ///
    /// Returns the pending value if this transaction already wrote the cell.
    /// The cell is recorded in the read log either way.
    ///
    /// # Errors
    /// Returns a [`Conflict`](crate::Conflict) if the cell is locked or was
    /// published after this attempt's snapshot.
    pub fn get<T: Copy + Send + 'static>(&mut self, cell: &'a TCell<T>) -> StmResult<T> {
        let value = match self.redo_log.lookup(cell) {
            Some(pending) => pending,
            None => cell.read_snapshot(self.seq)?,
        };
        self.read_log.record(cell.id(), cell.lock_word());
        Ok(value)
    }

    /// Buffer a write. Nothing is visible to other threads until commit.
    pub fn set<T: Copy + Send + 'static>(&mut self, cell: &'a TCell<T>, value: T) {
        self.redo_log.insert(cell, value);
    }

    pub fn read_count(&self) -> usize {
        self.read_log.len()
    }

    pub fn write_count(&self) -> usize {
        self.redo_log.len()
    }

    /// True if the transaction has not written anything.
    pub fn is_read_only(&self) -> bool {
        self.redo_log.is_empty()
    }

    pub(crate) fn read_log(&self) -> &ReadLog<'a> {
        &self.read_log
    }

    pub(crate) fn redo_log(&self) -> &RedoLog<'a> {
        &self.redo_log
    }

    pub(crate) fn redo_log_mut(&mut self) -> &mut RedoLog<'a> {
        &mut self.redo_log
    }
}

/// Read-only view handed to `read_only` bodies.
///
/// Exposes only `get`. Reads take no locks and leave no trace; every read is
/// checked against the snapshot on the spot, so there is nothing to validate
/// at the end.
#[derive(Debug, Clone, Copy)]
pub struct ReadTransaction {
    seq: u64,
}

impl ReadTransaction {
    pub(crate) fn new(seq: u64) -> Self {
        Self { seq }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Read a cell as of this transaction's snapshot.
    pub fn get<T: Copy + Send + 'static>(&self, cell: &TCell<T>) -> StmResult<T> {
        cell.read_snapshot(self.seq)
    }
}
