//! Transaction error types.

use thiserror::Error;

use crate::batch::BatchError;
use crate::storage::StorageError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A batch run inside the transaction failed.
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// The current thread already has an open transaction.
    #[error("a transaction is already active on this thread")]
    NestedTransaction,

    /// The transaction body gave up.
    #[error("transaction aborted: {0}")]
    Aborted(String),
}

impl TransactionError {
    /// Check if this error rejected the transaction before it started.
    pub fn is_nested(&self) -> bool {
        matches!(self, TransactionError::NestedTransaction)
    }

    /// Create an abort error from a reason.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted(reason.into())
    }
}
