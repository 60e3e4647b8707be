//! Core type definitions for the composition engine.

use std::fmt;
use uuid::Uuid;

/// Identity of a transaction body across its discovery and replay calls.
///
/// The driver walks every transaction body twice: once to learn its
/// structure, once to run it against a real engine transaction. A scope
/// token is how the second walk finds the context created by the first.
/// Callers mint one token per logical scope, outside the body, and pass
/// the same token on every invocation for that scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeToken(Uuid);

impl ScopeToken {
    /// Mints a fresh scope token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ScopeToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope:{}", self.0)
    }
}

/// How a transaction body composes with its ambient context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionKind {
    /// A new scope with its own engine transaction.
    TopLevel,
    /// A child sharing its enclosing scope's engine transaction.
    Nested,
    /// A group whose top-level children run concurrently.
    Parallel,
}

impl fmt::Display for CompositionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopLevel => write!(f, "top-level"),
            Self::Nested => write!(f, "nested"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// Execution mode of a session's composition driver.
///
/// Governs how a body invocation is interpreted. A session idles at
/// `Collecting`; a top-level call moves it through discovery into one of
/// the executing modes and back to `Collecting` when the call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Discovering structure for a sequential tree (also the idle mode).
    Collecting,
    /// Replaying a sequential tree inside real engine transactions.
    Executing,
    /// Discovering structure for a parallel group.
    ParallelCollecting,
    /// Running the replay tasks of a parallel group.
    ParallelExecuting,
}

impl TransactionMode {
    /// Returns true while structure is being discovered.
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        matches!(self, Self::Collecting | Self::ParallelCollecting)
    }

    /// Returns true while a discovered tree is being replayed.
    #[must_use]
    pub fn is_executing(&self) -> bool {
        matches!(self, Self::Executing | Self::ParallelExecuting)
    }

    /// Returns true for the parallel variants.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::ParallelCollecting | Self::ParallelExecuting)
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collecting => write!(f, "collecting"),
            Self::Executing => write!(f, "executing"),
            Self::ParallelCollecting => write!(f, "parallel-collecting"),
            Self::ParallelExecuting => write!(f, "parallel-executing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_tokens_are_unique() {
        assert_ne!(ScopeToken::new(), ScopeToken::new());
    }

    #[test]
    fn scope_token_is_copyable_identity() {
        let token = ScopeToken::new();
        let copy = token;
        assert_eq!(token, copy);
    }

    #[test]
    fn mode_predicates() {
        assert!(TransactionMode::Collecting.is_collecting());
        assert!(TransactionMode::ParallelCollecting.is_collecting());
        assert!(TransactionMode::Executing.is_executing());
        assert!(TransactionMode::ParallelExecuting.is_executing());
        assert!(TransactionMode::ParallelCollecting.is_parallel());
        assert!(!TransactionMode::Executing.is_parallel());
    }

    #[test]
    fn mode_display() {
        assert_eq!(format!("{}", TransactionMode::ParallelExecuting), "parallel-executing");
        assert_eq!(format!("{}", CompositionKind::TopLevel), "top-level");
    }
}
