//! Per-session registry of transaction state.

use crate::context::TransactionContext;
use crate::error::CoreResult;
use crate::types::{ScopeToken, TransactionMode};
use futures::future::LocalBoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Connection-wide mutable state of the composition driver.
///
/// All fields are exclusively owned by the driver; leaf operations only
/// ever read `active` through the session. The stack and index are
/// transient — built and torn down within a single top-level call — and
/// `active`/`mode` return to their idle values when that call finishes,
/// on success and on abort alike.
pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    mode: TransactionMode,
    /// The context whose scope execution is currently inside.
    active: Option<Arc<TransactionContext>>,
    /// Contexts currently being discovered, nested LIFO.
    discovery_stack: Vec<Arc<TransactionContext>>,
    /// Scope token -> context discovered for it this pass.
    body_index: HashMap<ScopeToken, Arc<TransactionContext>>,
    /// Deferred replay tasks for parallel siblings.
    parallel_tasks: Vec<LocalBoxFuture<'static, CoreResult<()>>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                mode: TransactionMode::Collecting,
                active: None,
                discovery_stack: Vec::new(),
                body_index: HashMap::new(),
                parallel_tasks: Vec::new(),
            }),
        }
    }

    pub(crate) fn mode(&self) -> TransactionMode {
        self.inner.lock().mode
    }

    pub(crate) fn set_mode(&self, mode: TransactionMode) {
        self.inner.lock().mode = mode;
    }

    pub(crate) fn active(&self) -> Option<Arc<TransactionContext>> {
        self.inner.lock().active.clone()
    }

    /// Swaps the active context, returning the previous one.
    pub(crate) fn replace_active(
        &self,
        context: Option<Arc<TransactionContext>>,
    ) -> Option<Arc<TransactionContext>> {
        std::mem::replace(&mut self.inner.lock().active, context)
    }

    /// Starts a fresh top-level collection pass.
    ///
    /// Discards the previous pass's index and any stale parallel tasks,
    /// then enters the requested collecting mode.
    pub(crate) fn begin_pass(&self, parallel: bool) {
        let mut inner = self.inner.lock();
        inner.body_index.clear();
        inner.parallel_tasks.clear();
        inner.mode = if parallel {
            TransactionMode::ParallelCollecting
        } else {
            TransactionMode::Collecting
        };
    }

    /// Pushes a context being discovered and makes it active.
    pub(crate) fn push_discovery(&self, token: ScopeToken, context: Arc<TransactionContext>) {
        let mut inner = self.inner.lock();
        inner.discovery_stack.push(Arc::clone(&context));
        inner.body_index.insert(token, Arc::clone(&context));
        inner.active = Some(context);
    }

    /// Pops the top discovered context and restores the previous one as
    /// active. Returns the remaining stack depth.
    pub(crate) fn pop_discovery(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.discovery_stack.pop();
        inner.active = inner.discovery_stack.last().cloned();
        inner.discovery_stack.len()
    }

    pub(crate) fn discovery_depth(&self) -> usize {
        self.inner.lock().discovery_stack.len()
    }

    /// Registers `token` as an alias of an existing context.
    ///
    /// Used for nested bodies, which share their parent's context.
    pub(crate) fn register(&self, token: ScopeToken, context: Arc<TransactionContext>) {
        self.inner.lock().body_index.insert(token, context);
    }

    pub(crate) fn lookup(&self, token: ScopeToken) -> Option<Arc<TransactionContext>> {
        self.inner.lock().body_index.get(&token).cloned()
    }

    pub(crate) fn enqueue_parallel(&self, task: LocalBoxFuture<'static, CoreResult<()>>) {
        self.inner.lock().parallel_tasks.push(task);
    }

    pub(crate) fn take_parallel_tasks(&self) -> Vec<LocalBoxFuture<'static, CoreResult<()>>> {
        std::mem::take(&mut self.inner.lock().parallel_tasks)
    }

    /// Returns the registry to its idle state after a failure.
    ///
    /// The body index is left in place; it is discarded at the start of
    /// the next pass.
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.discovery_stack.clear();
        inner.parallel_tasks.clear();
        inner.active = None;
        inner.mode = TransactionMode::Collecting;
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Registry")
            .field("mode", &inner.mode)
            .field("active", &inner.active.is_some())
            .field("discovery_depth", &inner.discovery_stack.len())
            .field("indexed", &inner.body_index.len())
            .field("parallel_tasks", &inner.parallel_tasks.len())
            .finish()
    }
}
