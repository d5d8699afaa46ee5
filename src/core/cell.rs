// ============================================================================
// Transactional Cell
// ============================================================================
//
// A TCell pairs a copyable payload with a version/lock word. The payload is
// only written while the lock bit is held; readers never lock and instead
// detect concurrent writers through the version word, seqlock style.
//
// ============================================================================

use super::epoch::{VersionLock, is_locked};
use super::error::{Conflict, StmResult};
use crate::transaction::{ReadTransaction, Transaction};
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{Ordering, fence};

/// Identity of a cell, used as the redo-log key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(usize);

impl CellId {
    pub fn of<T>(cell: &TCell<T>) -> Self {
        CellId(cell as *const TCell<T> as usize)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell@{:#x}", self.0)
    }
}

/// Transactionally managed memory cell.
///
/// The engine never creates or destroys cells; they are owned by the
/// application and borrowed by transactions.
///
/// # Examples
///
/// ```
/// use seqstm::{TCell, read_only, read_write};
///
/// let balance = TCell::new(100u64);
/// read_write(|tx| balance.modify(tx, |b| b - 10));
/// assert_eq!(read_only(|tx| tx.get(&balance)), 90);
/// ```
pub struct TCell<T> {
    value: UnsafeCell<T>,
    version_lock: VersionLock,
}

// Payload access is mediated by the version word: writes happen only under
// the lock bit and reads are discarded unless the word is stable around them.
unsafe impl<T: Copy + Send> Sync for TCell<T> {}

impl<T: Copy + Send + 'static> TCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            version_lock: VersionLock::new(),
        }
    }

    /// Read the cell inside a read-write transaction.
    pub fn get<'a>(&'a self, tx: &mut Transaction<'a>) -> StmResult<T> {
        tx.get(self)
    }

    /// Buffer a write inside a read-write transaction.
    pub fn set<'a>(&'a self, tx: &mut Transaction<'a>, value: T) {
        tx.set(self, value)
    }

    /// Read the cell inside a read-only transaction.
    pub fn read(&self, tx: &ReadTransaction) -> StmResult<T> {
        tx.get(self)
    }

    /// Apply `f` to the current value and buffer the result.
    pub fn modify<'a, F>(&'a self, tx: &mut Transaction<'a>, f: F) -> StmResult<()>
    where
        F: FnOnce(T) -> T,
    {
        let current = tx.get(self)?;
        tx.set(self, f(current));
        Ok(())
    }

    /// Buffer `value` and return the value it replaces.
    pub fn replace<'a>(&'a self, tx: &mut Transaction<'a>, value: T) -> StmResult<T> {
        let previous = tx.get(self)?;
        tx.set(self, value);
        Ok(previous)
    }

    /// Consistent read of this single cell outside any transaction.
    ///
    /// Spins while a writer holds the lock.
    pub fn load_atomic(&self) -> T {
        loop {
            let word = self.version_lock.load(Ordering::Acquire);
            if !is_locked(word) {
                if let Ok(value) = self.read_at(word) {
                    return value;
                }
            }
            std::hint::spin_loop();
        }
    }

    /// Epoch at which the cell was last published. Odd while locked.
    pub fn version(&self) -> u64 {
        self.version_lock.load(Ordering::Relaxed)
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    pub(crate) fn id(&self) -> CellId {
        CellId::of(self)
    }

    pub(crate) fn lock_word(&self) -> &VersionLock {
        &self.version_lock
    }

    /// Read the payload as of `snapshot`.
    ///
    /// Fails if the cell is locked, newer than the snapshot, or changed
    /// while it was being copied out.
    pub(crate) fn read_snapshot(&self, snapshot: u64) -> StmResult<T> {
        let before = self.version_lock.load(Ordering::Acquire);
        VersionLock::check(before, snapshot)?;
        self.read_at(before)
    }

    fn read_at(&self, before: u64) -> StmResult<T> {
        // The copy may race with a writer, so it stays uninitialized until
        // the version word proves it was not torn.
        let raw = unsafe { ptr::read_volatile(self.value.get().cast::<MaybeUninit<T>>()) };
        fence(Ordering::Acquire);
        let after = self.version_lock.load(Ordering::Relaxed);
        if after != before {
            return Err(Conflict::Torn);
        }
        Ok(unsafe { raw.assume_init() })
    }

    /// Overwrite the payload.
    ///
    /// # Safety
    /// The caller must hold this cell's lock bit.
    pub(crate) unsafe fn store_locked(&self, value: T) {
        fence(Ordering::Release);
        unsafe { ptr::write_volatile(self.value.get(), value) };
    }
}

impl<T: Copy + Send + Default + 'static> Default for TCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Copy + Send + fmt::Debug + 'static> fmt::Debug for TCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TCell")
            .field("value", &self.load_atomic())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cell_is_unlocked_at_zero() {
        let cell = TCell::new(7i32);
        assert_eq!(cell.version(), 0);
        assert_eq!(cell.load_atomic(), 7);
    }

    #[test]
    fn test_read_snapshot_rejects_locked_and_newer() {
        let cell = TCell::new(1u32);
        assert_eq!(cell.read_snapshot(0), Ok(1));

        let previous = cell.lock_word().try_lock().unwrap();
        assert_eq!(cell.read_snapshot(10), Err(Conflict::Locked));

        unsafe { cell.store_locked(2) };
        cell.lock_word().publish(12);
        assert_eq!(
            cell.read_snapshot(10),
            Err(Conflict::Stale {
                version: 12,
                snapshot: 10
            })
        );
        assert_eq!(cell.read_snapshot(12), Ok(2));
        assert_eq!(previous, 0);
    }

    #[test]
    fn test_cell_ids_are_distinct() {
        let a = TCell::new(0u8);
        let b = TCell::new(0u8);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), CellId::of(&a));
    }

    #[test]
    fn test_exclusive_access() {
        let mut cell = TCell::new(String::from("x").len());
        *cell.get_mut() += 1;
        assert_eq!(cell.into_inner(), 2);
    }
}
