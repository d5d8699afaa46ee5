// ============================================================================
// Transaction Logs
// ============================================================================
//
// Read log: every cell read during an attempt, re-validated at commit.
// Redo log: pending writes keyed by cell identity, applied at commit.
//
// Payload types differ per cell, so redo entries are type-erased behind
// `PendingWrite` and downcast back through `Any` on lookup.
//
// ============================================================================

use crate::core::{CellId, TCell, VersionLock};
use std::any::Any;
use std::collections::HashMap;

/// Cells read by a transaction, in read order.
#[derive(Default)]
pub struct ReadLog<'a> {
    entries: Vec<(CellId, &'a VersionLock)>,
}

impl<'a> ReadLog<'a> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, id: CellId, lock: &'a VersionLock) {
        // Back-to-back reads of one cell are common in read-modify-write.
        if matches!(self.entries.last(), Some((last, _)) if *last == id) {
            return;
        }
        self.entries.push((id, lock));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &(CellId, &'a VersionLock)> {
        self.entries.iter()
    }
}

/// A buffered write for one cell.
pub(crate) trait PendingWrite<'a> {
    fn id(&self) -> CellId;

    fn lock_word(&self) -> &'a VersionLock;

    fn value(&self) -> &dyn Any;

    fn value_mut(&mut self) -> &mut dyn Any;

    /// Copy the pending value into the cell.
    ///
    /// # Safety
    /// The caller must hold the cell's lock bit.
    unsafe fn write_back(&self);
}

struct Pending<'a, T> {
    cell: &'a TCell<T>,
    value: T,
}

impl<'a, T: Copy + Send + 'static> PendingWrite<'a> for Pending<'a, T> {
    fn id(&self) -> CellId {
        self.cell.id()
    }

    fn lock_word(&self) -> &'a VersionLock {
        self.cell.lock_word()
    }

    fn value(&self) -> &dyn Any {
        &self.value
    }

    fn value_mut(&mut self) -> &mut dyn Any {
        &mut self.value
    }

    unsafe fn write_back(&self) {
        unsafe { self.cell.store_locked(self.value) }
    }
}

/// Pending writes with unique keys.
///
/// Lookups scan linearly until the log grows past `index_threshold`
/// entries, then switch to a hash index.
pub struct RedoLog<'a> {
    entries: Vec<Box<dyn PendingWrite<'a> + 'a>>,
    index: Option<HashMap<CellId, usize>>,
    index_threshold: usize,
}

impl<'a> RedoLog<'a> {
    pub fn new(index_threshold: usize) -> Self {
        Self {
            entries: Vec::new(),
            index: None,
            index_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.position(id).is_some()
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    fn position(&self, id: CellId) -> Option<usize> {
        match &self.index {
            Some(index) => index.get(&id).copied(),
            None => self.entries.iter().position(|entry| entry.id() == id),
        }
    }

    /// Pending value for `cell`, if this transaction wrote it.
    pub fn lookup<T: Copy + Send + 'static>(&self, cell: &TCell<T>) -> Option<T> {
        let position = self.position(cell.id())?;
        self.entries[position].value().downcast_ref::<T>().copied()
    }

    /// Buffer `value` for `cell`, overwriting an earlier pending write.
    pub fn insert<T: Copy + Send + 'static>(&mut self, cell: &'a TCell<T>, value: T) {
        let id = cell.id();
        if let Some(position) = self.position(id) {
            if let Some(slot) = self.entries[position].value_mut().downcast_mut::<T>() {
                *slot = value;
                return;
            }
        }

        self.entries.push(Box::new(Pending { cell, value }));
        let position = self.entries.len() - 1;
        match self.index.as_mut() {
            Some(index) => {
                index.insert(id, position);
            }
            None => self.rebuild_index(),
        }
    }

    fn rebuild_index(&mut self) {
        self.index = if self.entries.len() > self.index_threshold {
            Some(
                self.entries
                    .iter()
                    .enumerate()
                    .map(|(position, entry)| (entry.id(), position))
                    .collect(),
            )
        } else {
            None
        };
    }

    /// Reorder entries by cell identity.
    pub(crate) fn sort_by_id(&mut self) {
        self.entries.sort_by_key(|entry| entry.id());
        self.rebuild_index();
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &(dyn PendingWrite<'a> + 'a)> {
        self.entries.iter().map(|entry| entry.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redo_log_overwrites_pending_value() {
        let cell = TCell::new(1u32);
        let mut log = RedoLog::new(8);

        log.insert(&cell, 2);
        log.insert(&cell, 3);

        assert_eq!(log.len(), 1);
        assert_eq!(log.lookup(&cell), Some(3));
        assert_eq!(cell.load_atomic(), 1);
    }

    #[test]
    fn test_redo_log_switches_to_index() {
        let cells: Vec<TCell<usize>> = (0..20).map(TCell::new).collect();
        let mut log = RedoLog::new(4);

        for (i, cell) in cells.iter().enumerate() {
            log.insert(cell, i * 10);
            assert_eq!(log.is_indexed(), i + 1 > 4);
        }
        log.insert(&cells[3], 333);

        assert_eq!(log.len(), 20);
        assert_eq!(log.lookup(&cells[3]), Some(333));
        assert_eq!(log.lookup(&cells[19]), Some(190));
        assert!(log.contains(cells[0].id()));
    }

    #[test]
    fn test_redo_log_mixed_payload_types() {
        let count = TCell::new(0u64);
        let flag = TCell::new(false);
        let mut log = RedoLog::new(8);

        log.insert(&count, 5);
        log.insert(&flag, true);

        assert_eq!(log.lookup(&count), Some(5));
        assert_eq!(log.lookup(&flag), Some(true));
    }

    #[test]
    fn test_read_log_collapses_repeated_reads() {
        let cell = TCell::new(0i8);
        let other = TCell::new(0i8);
        let mut log = ReadLog::new();

        log.record(cell.id(), cell.lock_word());
        log.record(cell.id(), cell.lock_word());
        log.record(other.id(), other.lock_word());
        log.record(cell.id(), cell.lock_word());

        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_sort_by_id_orders_entries() {
        let cells: Vec<TCell<u8>> = (0..5).map(TCell::new).collect();
        let mut log = RedoLog::new(2);
        for cell in cells.iter().rev() {
            log.insert(cell, 1);
        }

        log.sort_by_id();

        let ids: Vec<CellId> = log.iter().map(|entry| entry.id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert!(log.is_indexed());
        assert_eq!(log.lookup(&cells[2]), Some(1));
    }
}
