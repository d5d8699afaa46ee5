// Per-thread nesting flag. Transactions do not compose by nesting; composed
// operations take `&mut Transaction` instead.

use crate::core::{Result, StmError};
use std::cell::Cell;

thread_local! {
    static IN_TRANSACTION: Cell<bool> = const { Cell::new(false) };
}

/// True while the current thread is running a transaction body.
pub fn in_transaction() -> bool {
    IN_TRANSACTION.with(|flag| flag.get())
}

/// Marks the current thread as inside a transaction until dropped.
#[derive(Debug)]
pub(crate) struct TransactionScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl TransactionScope {
    pub(crate) fn enter() -> Result<Self> {
        IN_TRANSACTION.with(|flag| {
            if flag.replace(true) {
                return Err(StmError::NestedTransaction);
            }
            Ok(Self {
                _not_send: std::marker::PhantomData,
            })
        })
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        IN_TRANSACTION.with(|flag| flag.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_rejects_nesting() {
        assert!(!in_transaction());
        {
            let _scope = TransactionScope::enter().unwrap();
            assert!(in_transaction());
            assert_eq!(
                TransactionScope::enter().unwrap_err(),
                StmError::NestedTransaction
            );
            // The failed attempt must not clear the outer flag.
            assert!(in_transaction());
        }
        assert!(!in_transaction());
    }
}
