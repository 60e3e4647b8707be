//! Transaction contexts.

use crate::error::{CoreError, CoreResult};
use crate::table::Table;
use futures::future::LocalBoxFuture;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use weftdb_engine::{AccessMode, EngineTransactionHandle, StoreEngine};

/// A transaction body.
///
/// Bodies receive the context they run under and perform leaf operations
/// against it, possibly re-entering the session driver for nested or
/// parallel sub-scopes. The driver invokes a body up to twice — once
/// during discovery and once during replay — so bodies are `Fn`, and each
/// invocation must produce a fresh future.
pub type TransactionBody =
    Arc<dyn Fn(Arc<TransactionContext>) -> LocalBoxFuture<'static, CoreResult<()>>>;

/// One logical transaction, top-level or nested.
///
/// A context is created during discovery, carrying no engine state, and
/// acquires its engine transaction exactly once, during replay. Nested
/// bodies share their enclosing top-level context; parallel siblings each
/// get their own.
pub struct TransactionContext {
    engine: Arc<dyn StoreEngine>,
    access: AccessMode,
    /// True while this context's body is being walked only for structure.
    discovering: AtomicBool,
    /// Latched once replay has opened the engine transaction.
    opened: AtomicBool,
    /// Tables enlisted by leaf operations during discovery.
    tables: Mutex<BTreeSet<String>>,
    /// The real engine transaction; present only during replay.
    handle: Mutex<Option<EngineTransactionHandle>>,
    /// Set once on abort, never cleared.
    terminal_error: Mutex<Option<String>>,
}

impl TransactionContext {
    pub(crate) fn new(engine: Arc<dyn StoreEngine>, access: AccessMode) -> Arc<Self> {
        Arc::new(Self {
            engine,
            access,
            discovering: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            tables: Mutex::new(BTreeSet::new()),
            handle: Mutex::new(None),
            terminal_error: Mutex::new(None),
        })
    }

    /// Returns true while this context is in its discovery phase.
    #[must_use]
    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    pub(crate) fn start_discovery(&self) {
        self.discovering.store(true, Ordering::SeqCst);
    }

    pub(crate) fn end_discovery(&self) {
        self.discovering.store(false, Ordering::SeqCst);
    }

    /// Records that a leaf operation touches `table`.
    ///
    /// Replay passes the collected set to the engine when it opens the
    /// real transaction, so the transaction covers every table the body
    /// will reach.
    pub(crate) fn enlist_table(&self, table: &str) {
        self.tables.lock().insert(table.to_string());
    }

    /// Returns the tables enlisted during discovery.
    #[must_use]
    pub fn tables(&self) -> Vec<String> {
        self.tables.lock().iter().cloned().collect()
    }

    /// Returns this context's open engine transaction, if replay has
    /// opened one.
    #[must_use]
    pub fn engine_handle(&self) -> Option<EngineTransactionHandle> {
        self.handle.lock().clone()
    }

    /// Returns the recorded abort message, if this context was aborted.
    #[must_use]
    pub fn terminal_error(&self) -> Option<String> {
        self.terminal_error.lock().clone()
    }

    pub(crate) fn engine(&self) -> &Arc<dyn StoreEngine> {
        &self.engine
    }

    /// Returns a table bound to this context.
    ///
    /// Leaf operations on the returned table always attach to this
    /// context, never to the session's ambient one. Parallel branch
    /// bodies must use this form.
    #[must_use]
    pub fn table(self: &Arc<Self>, name: impl Into<String>) -> Table {
        Table::scoped(name.into(), Arc::clone(self))
    }

    /// Aborts this context.
    ///
    /// Idempotent: the first recorded reason wins. If an engine
    /// transaction is open, rollback is requested from the engine.
    pub fn abort(&self, reason: impl Into<String>) {
        {
            let mut terminal = self.terminal_error.lock();
            if terminal.is_none() {
                let reason = reason.into();
                tracing::debug!(%reason, "transaction aborted");
                *terminal = Some(reason);
            }
        }
        let handle = self.handle.lock().clone();
        if let Some(handle) = handle {
            if let Err(err) = self.engine.abort(&handle) {
                tracing::warn!(%err, id = handle.id(), "engine rollback request failed");
            }
        }
    }

    /// Runs `body` inside a real engine transaction.
    ///
    /// Opens the engine transaction covering the tables enlisted during
    /// discovery, invokes the body with this context active, and releases
    /// the handle when the body returns so the engine can finalize. On
    /// failure the context records a terminal error and the engine is
    /// asked to roll back; the error is returned for the driver to
    /// translate.
    pub(crate) async fn replay(self: &Arc<Self>, body: &TransactionBody) -> CoreResult<()> {
        // The engine transaction is opened at most once per context.
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(CoreError::invalid_operation(
                "context already opened its engine transaction",
            ));
        }

        let tables = self.tables();
        let handle = match self.engine.begin(&tables, self.access).await {
            Ok(handle) => handle,
            Err(err) => {
                self.abort(err.to_string());
                return Err(err.into());
            }
        };
        *self.handle.lock() = Some(handle);

        let result = body(Arc::clone(self)).await;
        if let Err(err) = &result {
            self.abort(err.to_string());
        }
        // Releasing the handle lets the engine finalize the scope.
        self.handle.lock().take();
        result
    }

    /// Returns this context's replay as a deferred unit of work.
    ///
    /// Used for parallel branches: the task is enqueued during discovery
    /// and driven to completion by the group's join.
    pub(crate) fn replay_task(
        self: &Arc<Self>,
        body: TransactionBody,
    ) -> LocalBoxFuture<'static, CoreResult<()>> {
        let context = Arc::clone(self);
        Box::pin(async move { context.replay(&body).await })
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("discovering", &self.is_discovering())
            .field("open", &self.engine_handle().is_some())
            .field("terminal_error", &self.terminal_error())
            .finish_non_exhaustive()
    }
}
