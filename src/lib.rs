// ============================================================================
// seqstm Library
// ============================================================================
//
// Software transactional memory over independently locked cells that share
// one global version counter: a seqlock generalized to many cells.
//
// ============================================================================

//! Software transactional memory built on a generalized seqlock.
//!
//! Every [`TCell`] carries a version word whose low bit is a write lock. All
//! cells of one engine share a global epoch that advances by two for every
//! committed write set, so a commit becomes visible at exactly one epoch.
//!
//! ```
//! use seqstm::{TCell, read_only, read_write};
//!
//! let checking = TCell::new(100i64);
//! let savings = TCell::new(0i64);
//!
//! read_write(|tx| {
//!     let amount = checking.get(tx)?;
//!     checking.set(tx, 0);
//!     savings.modify(tx, |s| s + amount)
//! });
//!
//! let total = read_only(|tx| Ok(tx.get(&checking)? + tx.get(&savings)?));
//! assert_eq!(total, 100);
//! ```
//!
//! Transaction bodies may run several times and must not have side effects
//! beyond their `set` calls. Starting a transaction inside another one is a
//! precondition violation; compose operations by passing `&mut Transaction`
//! instead.

pub mod config;
pub mod core;
pub mod engine;
pub mod stats;
pub mod transaction;

pub use config::{LockOrder, StmConfig, ValidationOrder};
pub use crate::core::{CellId, Conflict, Result, StmError, StmResult, TCell};
pub use engine::Stm;
pub use stats::StmStats;
pub use transaction::{ReadTransaction, Transaction, in_transaction};

/// Run a read-only transaction on the global engine.
///
/// # Panics
/// If called from inside another transaction.
pub fn read_only<O, F>(body: F) -> O
where
    F: Fn(&ReadTransaction) -> StmResult<O>,
{
    Stm::global().read_only(body)
}

/// Run a read-write transaction on the global engine.
///
/// # Panics
/// If called from inside another transaction.
pub fn read_write<'env, O, F>(body: F) -> O
where
    F: Fn(&mut Transaction<'env>) -> StmResult<O>,
{
    Stm::global().read_write(body)
}

/// Abort the current attempt and restart the transaction.
///
/// # Examples
///
/// ```
/// use seqstm::{retry, read_write, TCell};
/// use std::cell::Cell;
///
/// let flag = TCell::new(false);
/// let tries = Cell::new(0);
/// read_write(|tx| {
///     tries.set(tries.get() + 1);
///     if tries.get() < 3 {
///         return retry();
///     }
///     flag.set(tx, true);
///     Ok(())
/// });
/// assert!(flag.load_atomic());
/// ```
pub fn retry<T>() -> StmResult<T> {
    Err(Conflict::Retry)
}

/// Restart the transaction unless `cond` holds.
pub fn guard(cond: bool) -> StmResult<()> {
    if cond { Ok(()) } else { retry() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_engine_round_trip() {
        let cell = TCell::new(1u32);
        read_write(|tx| cell.modify(tx, |v| v + 1));
        assert_eq!(read_only(|tx| tx.get(&cell)), 2);
        assert!(Stm::global().stats().commits >= 1);
    }

    #[test]
    fn test_guard() {
        assert_eq!(guard(true), Ok(()));
        assert_eq!(guard(false), Err(Conflict::Retry));
    }
}
