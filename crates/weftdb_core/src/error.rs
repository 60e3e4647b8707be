//! Error types for the composition engine.

use crate::types::ScopeToken;
use thiserror::Error;

/// Result type for composition-engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while composing or running transactions.
///
/// The structural variants (`NoActiveTransaction`, `TransactionNotFound`,
/// `UnbalancedNestedTransactions`, `TransactionsNotCollecting`,
/// `DiscoverySuspended`) are programmer errors in how bodies are composed;
/// they are never retried and propagate to the caller unchanged.
/// `TransactionFailure` is the translated form of an engine-reported
/// failure and carries the failing context's recorded message.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The store engine reported an error.
    #[error("engine error: {0}")]
    Engine(#[from] weftdb_engine::EngineError),

    /// An engine transaction failed; carries the context's terminal error.
    #[error("transaction failed: {message}")]
    TransactionFailure {
        /// The failing context's recorded message.
        message: String,
    },

    /// A nested body was invoked outside any transaction.
    #[error("nested transaction outside an active transaction")]
    NoActiveTransaction,

    /// Replay could not find the context discovered for a scope.
    ///
    /// Indicates a token mismatch between the discovery and replay
    /// invocations of the same body.
    #[error("no discovered transaction for {token}")]
    TransactionNotFound {
        /// The token that had no discovered context.
        token: ScopeToken,
    },

    /// The discovery stack was not empty after a collection pass.
    #[error("unbalanced nested transactions after discovery")]
    UnbalancedNestedTransactions,

    /// A body invocation arrived with invalid call sequencing.
    #[error("transaction call while neither collecting nor executing")]
    TransactionsNotCollecting,

    /// A body suspended while its structure was being discovered.
    ///
    /// Discovery must run a body to completion without yielding; leaf
    /// operations complete immediately during discovery, so a suspension
    /// means the body awaited something outside the engine.
    #[error("transaction body suspended during discovery")]
    DiscoverySuspended,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a transaction failure error.
    pub fn transaction_failure(message: impl Into<String>) -> Self {
        Self::TransactionFailure {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for composition errors that indicate misuse rather
    /// than a failure reported by the store.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::NoActiveTransaction
                | Self::TransactionNotFound { .. }
                | Self::UnbalancedNestedTransactions
                | Self::TransactionsNotCollecting
                | Self::DiscoverySuspended
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_classification() {
        assert!(CoreError::NoActiveTransaction.is_structural());
        assert!(CoreError::UnbalancedNestedTransactions.is_structural());
        assert!(!CoreError::transaction_failure("boom").is_structural());
    }

    #[test]
    fn messages_carry_detail() {
        let err = CoreError::transaction_failure("constraint violated");
        assert_eq!(err.to_string(), "transaction failed: constraint violated");
    }
}
