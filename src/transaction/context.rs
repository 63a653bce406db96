//! Transaction context using typestate pattern.
//!
//! The typestate pattern ensures at compile time that transactions
//! are used correctly:
//! - Only active transactions hand out their context to batches
//! - Committed/aborted transactions cannot be reused
//! - The thread's transaction slot is released when the transaction ends

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;
use ulid::Ulid;

use crate::context::{Context, IdentityCache};
use crate::storage::{ChangeNotification, Store};
use crate::transaction::error::{TransactionError, TransactionResult};

/// Marker type for active transactions.
#[derive(Debug)]
pub struct TxActive;

/// Marker type for committed transactions.
#[derive(Debug)]
pub struct TxCommitted;

/// Marker type for aborted transactions.
#[derive(Debug)]
pub struct TxAborted;

/// Holds the current thread's transaction slot until dropped.
#[derive(Debug)]
pub(crate) struct ActiveGuard {
    thread: ThreadId,
    active: Arc<Mutex<HashSet<ThreadId>>>,
}

impl ActiveGuard {
    /// Claim the slot for the current thread.
    pub(crate) fn acquire(active: &Arc<Mutex<HashSet<ThreadId>>>) -> TransactionResult<Self> {
        let thread = thread::current().id();
        if !active.lock().insert(thread) {
            return Err(TransactionError::NestedTransaction);
        }
        Ok(Self {
            thread,
            active: Arc::clone(active),
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.thread);
    }
}

/// A transaction with typestate for lifecycle safety.
///
/// The `State` parameter tracks whether the transaction is:
/// - `TxActive`: Batches can run in it
/// - `TxCommitted`: Successfully committed, no more operations allowed
/// - `TxAborted`: Rolled back, no more operations allowed
///
/// Every batch run in the transaction shares its context and identity cache.
/// Nothing reaches the store before `commit`; models saved as new get their
/// identifiers only then.
pub struct Transaction<State> {
    id: String,
    context: Context,
    started_at: DateTime<Utc>,
    guard: Option<ActiveGuard>,
    notification: Option<ChangeNotification>,
    _state: PhantomData<State>,
}

impl<State> Transaction<State> {
    /// Get the transaction ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the transaction started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn into_state<Next>(self, notification: Option<ChangeNotification>) -> Transaction<Next> {
        Transaction {
            id: self.id,
            context: self.context,
            started_at: self.started_at,
            guard: None,
            notification,
            _state: PhantomData,
        }
    }
}

impl Transaction<TxActive> {
    pub(crate) fn new(store: &Store, guard: ActiveGuard) -> Self {
        Self {
            id: Ulid::new().to_string().to_lowercase(),
            context: Context::with_cache(store, Some(IdentityCache::new())),
            started_at: Utc::now(),
            guard: Some(guard),
            notification: None,
            _state: PhantomData,
        }
    }

    /// The context shared by every batch in this transaction.
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn has_changes(&self) -> bool {
        self.context.has_changes()
    }

    /// Commit the shared context, then assign identifiers to new models.
    ///
    /// On failure nothing is written and the pending changes are dropped with
    /// the transaction.
    pub fn commit(self) -> TransactionResult<Transaction<TxCommitted>> {
        let notification = self.context.commit()?;
        debug!(tx = %self.id, changes = notification.as_ref().map_or(0, |n| n.len()), "transaction committed");
        Ok(self.into_state(notification))
    }

    /// Drop all pending changes.
    pub fn rollback(self) -> Transaction<TxAborted> {
        self.context.rollback();
        debug!(tx = %self.id, "transaction rolled back");
        self.into_state(None)
    }

    pub(crate) fn holds_slot(&self) -> bool {
        self.guard.is_some()
    }
}

impl Transaction<TxCommitted> {
    /// The notification the commit produced, `None` if nothing changed.
    pub fn notification(&self) -> Option<&ChangeNotification> {
        self.notification.as_ref()
    }
}

impl<State> std::fmt::Debug for Transaction<State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &std::any::type_name::<State>())
            .field("started_at", &self.started_at)
            .finish()
    }
}
