//! Transaction coordinator - groups saves into one commit.
//!
//! The TransactionCoordinator is the main entry point for transactions.
//! It handles:
//! - Transaction creation, at most one per thread
//! - Tracking active transactions
//! - Serializing commits to the store

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::storage::{ChangeNotification, Store};
use crate::transaction::context::{ActiveGuard, Transaction, TxActive};
use crate::transaction::error::{TransactionError, TransactionResult};

/// Transaction coordinator for a store.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
/// Coordinators of the same store share the per-thread bookkeeping, so a
/// second coordinator cannot be used to nest transactions.
#[derive(Clone)]
pub struct TransactionCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    store: Store,
    /// Mutex for serializing commits.
    commit_lock: Mutex<()>,
}

impl TransactionCoordinator {
    /// Create a new coordinator for the given store.
    pub fn new(store: &Store) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store: store.clone(),
                commit_lock: Mutex::new(()),
            }),
        }
    }

    /// Get a reference to the underlying store.
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Begin a transaction on the current thread.
    ///
    /// Fails with [`TransactionError::NestedTransaction`] if the thread
    /// already has one.
    pub fn begin(&self) -> TransactionResult<Transaction<TxActive>> {
        let guard = ActiveGuard::acquire(self.inner.store.transactions())?;
        let tx = Transaction::new(&self.inner.store, guard);
        debug!(tx = %tx.id(), "transaction started");
        Ok(tx)
    }

    /// Check if the current thread has an open transaction.
    pub fn is_active(&self) -> bool {
        self.inner
            .store
            .transactions()
            .lock()
            .contains(&std::thread::current().id())
    }

    /// Get the number of open transactions across all threads.
    pub fn active_count(&self) -> usize {
        self.inner.store.transactions().lock().len()
    }

    /// Commit a transaction with serialization.
    ///
    /// Returns the change notification, `None` if the transaction was empty.
    pub fn commit(&self, tx: Transaction<TxActive>) -> TransactionResult<Option<ChangeNotification>> {
        let _guard = self.inner.commit_lock.lock();
        let committed = tx.commit()?;
        Ok(committed.notification().cloned())
    }

    /// Rollback a transaction.
    pub fn rollback(&self, tx: Transaction<TxActive>) {
        tx.rollback();
    }

    /// Execute a function within a transaction, automatically committing or rolling back.
    ///
    /// If the function returns Ok, the transaction is committed.
    /// If the function returns Err, nothing is committed and models saved as
    /// new inside it keep having no identifier.
    pub fn with_transaction<F, T>(&self, f: F) -> TransactionResult<T>
    where
        F: FnOnce(&Transaction<TxActive>) -> TransactionResult<T>,
    {
        let tx = self.begin()?;

        match f(&tx) {
            Ok(result) => {
                let notification = self.commit(tx)?;
                info!(
                    changes = notification.as_ref().map_or(0, ChangeNotification::len),
                    "transaction block committed"
                );
                Ok(result)
            }
            Err(e) => {
                self.rollback(tx);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("active_count", &self.active_count())
            .finish()
    }
}
