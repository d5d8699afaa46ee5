// ============================================================================
// Transaction Module
// ============================================================================
//
// Per-attempt transaction state and its logs:
// - Transaction: snapshot epoch + read log + redo log (read-write bodies)
// - ReadTransaction: snapshot epoch only (read-only bodies)
// - TransactionScope: per-thread guard rejecting nested transactions
//
// ============================================================================

pub mod context;
pub mod log;
pub mod state;

pub use context::in_transaction;
pub(crate) use context::TransactionScope;
pub use log::{ReadLog, RedoLog};
pub use state::{ReadTransaction, Transaction};
