//! The store engine trait.

use crate::error::EngineResult;
use crate::handle::EngineTransactionHandle;
use async_trait::async_trait;
use std::fmt;

/// Access mode of a store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Reads only; writes through the handle are rejected.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "readonly"),
            Self::ReadWrite => write!(f, "readwrite"),
        }
    }
}

/// The externally-owned transactional store.
///
/// The engine owns transaction lifetimes: a transaction begun with
/// [`begin`](Self::begin) commits on its own once every clone of its handle
/// has been dropped. Callers never commit explicitly; the only terminal
/// action available to them is [`abort`](Self::abort).
///
/// Engines run on a single connection with cooperative scheduling, so the
/// trait is object-safe and its futures need not be `Send`.
#[async_trait(?Send)]
pub trait StoreEngine {
    /// Opens a transaction covering the named tables.
    ///
    /// The returned handle is valid until its last clone is dropped
    /// (auto-commit) or the transaction is aborted.
    async fn begin(
        &self,
        tables: &[String],
        mode: AccessMode,
    ) -> EngineResult<EngineTransactionHandle>;

    /// Requests rollback of an open transaction. Best-effort and idempotent.
    fn abort(&self, handle: &EngineTransactionHandle) -> EngineResult<()>;

    /// Returns the most recently begun transaction that is still open.
    ///
    /// Exposed so leaf operations can self-attach without the composition
    /// driver mediating every call.
    fn current(&self) -> Option<EngineTransactionHandle>;

    /// Reads the value stored under `key` in `table`.
    async fn get(
        &self,
        handle: &EngineTransactionHandle,
        table: &str,
        key: &[u8],
    ) -> EngineResult<Option<Vec<u8>>>;

    /// Inserts or replaces the value stored under `key` in `table`.
    async fn put(
        &self,
        handle: &EngineTransactionHandle,
        table: &str,
        key: &[u8],
        value: Vec<u8>,
    ) -> EngineResult<()>;

    /// Deletes the value stored under `key` in `table`.
    async fn delete(
        &self,
        handle: &EngineTransactionHandle,
        table: &str,
        key: &[u8],
    ) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode_display() {
        assert_eq!(format!("{}", AccessMode::ReadOnly), "readonly");
        assert_eq!(format!("{}", AccessMode::ReadWrite), "readwrite");
    }
}
