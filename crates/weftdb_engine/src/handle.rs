//! Engine transaction handles.

use crate::engine::AccessMode;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A handle to an open store transaction.
///
/// Handles are cheap to clone; all clones refer to the same underlying
/// transaction. The transaction stays open while at least one clone is
/// alive and auto-commits once the last clone is dropped, unless it was
/// aborted first. Engines observe liveness through weak references, so a
/// handle must not be stashed beyond its originating scope.
#[derive(Clone)]
pub struct EngineTransactionHandle {
    inner: Arc<HandleCore>,
}

/// Shared state of one store transaction.
pub(crate) struct HandleCore {
    pub(crate) id: u64,
    pub(crate) tables: Vec<String>,
    pub(crate) mode: AccessMode,
    pub(crate) aborted: AtomicBool,
}

impl EngineTransactionHandle {
    pub(crate) fn new(id: u64, tables: Vec<String>, mode: AccessMode) -> Self {
        Self {
            inner: Arc::new(HandleCore {
                id,
                tables,
                mode,
                aborted: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_core(inner: Arc<HandleCore>) -> Self {
        Self { inner }
    }

    pub(crate) fn core(&self) -> &Arc<HandleCore> {
        &self.inner
    }

    /// Returns the transaction's ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the tables this transaction covers.
    #[must_use]
    pub fn tables(&self) -> &[String] {
        &self.inner.tables
    }

    /// Returns the transaction's access mode.
    #[must_use]
    pub fn mode(&self) -> AccessMode {
        self.inner.mode
    }

    /// Returns true if the transaction was aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_aborted(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for EngineTransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineTransactionHandle")
            .field("id", &self.id())
            .field("mode", &self.mode())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
