//! Error types for engine operations.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by a store engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The store reported a transaction-level failure.
    #[error("store failure: {message}")]
    Store {
        /// Description of the failure as reported by the store.
        message: String,
    },

    /// The handle refers to a transaction that is no longer open.
    #[error("transaction handle {id} is closed")]
    HandleClosed {
        /// The stale handle's ID.
        id: u64,
    },

    /// An operation was attempted on an aborted transaction.
    #[error("transaction {id} was aborted")]
    Aborted {
        /// The aborted handle's ID.
        id: u64,
    },

    /// A write was attempted through a read-only transaction.
    #[error("write to table {table} in read-only transaction")]
    ReadOnlyWrite {
        /// The table the write targeted.
        table: String,
    },
}

impl EngineError {
    /// Creates a store failure error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}
