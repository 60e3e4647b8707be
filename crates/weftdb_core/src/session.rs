//! The session and its composition driver.
//!
//! A [`Session`] owns all connection-wide transaction state and implements
//! the collect-then-replay protocol: every transaction tree is first walked
//! in a dry discovery pass that records its structure, then walked again
//! live against real engine transactions. The two passes are what let
//! ordinary async code compose nested and parallel sub-transactions over a
//! store that only understands one flat callback-scoped transaction at a
//! time.

use crate::config::SessionConfig;
use crate::context::{TransactionBody, TransactionContext};
use crate::error::{CoreError, CoreResult};
use crate::registry::Registry;
use crate::table::Table;
use crate::types::{CompositionKind, ScopeToken, TransactionMode};
use futures::future::join_all;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use weftdb_engine::StoreEngine;

/// One connection to a store engine.
///
/// Sessions are explicitly passed, never global; independent sessions
/// compose transactions independently. A session is single-threaded
/// cooperative: at most one context is active at any instant, and
/// parallelism only ever means interleaved asynchronous progress on the
/// same connection.
pub struct Session {
    engine: Arc<dyn StoreEngine>,
    config: SessionConfig,
    registry: Registry,
}

impl Session {
    /// Creates a session with default configuration.
    #[must_use]
    pub fn new(engine: Arc<dyn StoreEngine>) -> Self {
        Self::with_config(engine, SessionConfig::default())
    }

    /// Creates a session with the given configuration.
    #[must_use]
    pub fn with_config(engine: Arc<dyn StoreEngine>, config: SessionConfig) -> Self {
        Self {
            engine,
            config,
            registry: Registry::new(),
        }
    }

    /// Returns the session's configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the driver's current execution mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.registry.mode()
    }

    /// Returns the currently active transaction context.
    ///
    /// This is the attachment point for leaf operations: a read or write
    /// issued with no explicit context joins the active context's engine
    /// transaction, or runs as an implicit single-operation transaction
    /// when none is active.
    #[must_use]
    pub fn active_context(&self) -> Option<Arc<TransactionContext>> {
        self.registry.active()
    }

    pub(crate) fn engine(&self) -> Arc<dyn StoreEngine> {
        Arc::clone(&self.engine)
    }

    /// Returns a table whose operations attach to the session's active
    /// context at call time.
    #[must_use]
    pub fn table(self: &Arc<Self>, name: impl Into<String>) -> Table {
        Table::ambient(name.into(), Arc::clone(self))
    }

    /// Runs a transaction body under the given scope token and
    /// composition kind.
    ///
    /// The body may be invoked twice — once for discovery, once for
    /// replay — and must pass the same `token` on both invocations of any
    /// nested `run` calls it makes, which it achieves by minting tokens
    /// outside the body and capturing them.
    pub async fn run<F, Fut>(
        &self,
        token: ScopeToken,
        kind: CompositionKind,
        body: F,
    ) -> CoreResult<()>
    where
        F: Fn(Arc<TransactionContext>) -> Fut + 'static,
        Fut: Future<Output = CoreResult<()>> + 'static,
    {
        let body: TransactionBody = Arc::new(move |context| body(context).boxed_local());
        self.run_body(token, kind, body).await
    }

    /// Runs an already-boxed transaction body. See [`Session::run`].
    pub async fn run_body(
        &self,
        token: ScopeToken,
        kind: CompositionKind,
        body: TransactionBody,
    ) -> CoreResult<()> {
        // Failure cleanup happens once, at the outermost driver entry;
        // inner entries just propagate.
        let outermost =
            self.registry.discovery_depth() == 0 && !self.registry.mode().is_executing();
        match self.dispatch(token, kind, body).await {
            Ok(()) => Ok(()),
            Err(err) if outermost => Err(self.resolve_failure(token, err)),
            Err(err) => Err(err),
        }
    }

    async fn dispatch(
        &self,
        token: ScopeToken,
        kind: CompositionKind,
        body: TransactionBody,
    ) -> CoreResult<()> {
        let mode = self.registry.mode();
        if mode.is_executing() {
            return self.replay_call(token, kind, body, mode).await;
        }
        if self.registry.discovery_depth() == 0 {
            self.collect_root(token, kind, body).await
        } else {
            self.collect_nested(token, kind, body)
        }
    }

    /// A body invocation arriving mid-replay.
    ///
    /// A `TopLevel` body here is a sibling transaction discovered earlier
    /// in this pass; it is looked up and replayed in its own engine
    /// transaction. A `Nested` body shares the scope replay has already
    /// opened, so it is invoked directly.
    async fn replay_call(
        &self,
        token: ScopeToken,
        kind: CompositionKind,
        body: TransactionBody,
        mode: TransactionMode,
    ) -> CoreResult<()> {
        match kind {
            CompositionKind::TopLevel if mode == TransactionMode::Executing => {
                let context = self
                    .registry
                    .lookup(token)
                    .ok_or(CoreError::TransactionNotFound { token })?;
                let previous = self.registry.replace_active(Some(Arc::clone(&context)));
                let result = context.replay(&body).await;
                self.registry.replace_active(previous);
                result
            }
            CompositionKind::Nested => {
                let active = self
                    .registry
                    .active()
                    .ok_or(CoreError::NoActiveTransaction)?;
                body(active).await
            }
            _ => Err(CoreError::TransactionsNotCollecting),
        }
    }

    /// Starts a fresh top-level pass: discover the whole tree, then
    /// replay it.
    async fn collect_root(
        &self,
        token: ScopeToken,
        kind: CompositionKind,
        body: TransactionBody,
    ) -> CoreResult<()> {
        if kind == CompositionKind::Nested {
            return Err(CoreError::NoActiveTransaction);
        }
        let parallel = kind == CompositionKind::Parallel;
        self.registry.begin_pass(parallel);
        tracing::debug!(
            %token,
            %kind,
            session = self.config.label.as_deref().unwrap_or(""),
            "collection pass started"
        );

        let context = TransactionContext::new(self.engine(), self.config.access_mode);
        self.registry.push_discovery(token, Arc::clone(&context));
        context.start_discovery();
        let outcome = Self::discover(&body, &context);
        context.end_discovery();
        let depth = self.registry.pop_discovery();
        outcome?;
        if depth != 0 {
            return Err(CoreError::UnbalancedNestedTransactions);
        }

        if parallel {
            self.registry.set_mode(TransactionMode::ParallelExecuting);
            self.registry.replace_active(None);
            let tasks = self.registry.take_parallel_tasks();
            tracing::debug!(branches = tasks.len(), "joining parallel branches");
            let results = join_all(tasks).await;
            self.registry.set_mode(TransactionMode::Collecting);
            results.into_iter().collect::<CoreResult<Vec<()>>>()?;
            Ok(())
        } else {
            self.registry.set_mode(TransactionMode::Executing);
            let root = self
                .registry
                .lookup(token)
                .ok_or(CoreError::TransactionNotFound { token })?;
            self.registry.replace_active(Some(Arc::clone(&root)));
            let result = root.replay(&body).await;
            self.registry.replace_active(None);
            self.registry.set_mode(TransactionMode::Collecting);
            result
        }
    }

    /// A body invocation arriving inside an ongoing discovery pass.
    ///
    /// `TopLevel` denotes a sibling transaction: it gets its own context,
    /// and under a parallel pass its replay is enqueued as a deferred
    /// task. `Nested` shares the currently discovered context. Parallel
    /// groups must be roots, so `Parallel` here is a sequencing error.
    fn collect_nested(
        &self,
        token: ScopeToken,
        kind: CompositionKind,
        body: TransactionBody,
    ) -> CoreResult<()> {
        let active = self
            .registry
            .active()
            .ok_or(CoreError::TransactionsNotCollecting)?;
        if !active.is_discovering() {
            return Err(CoreError::TransactionsNotCollecting);
        }

        match kind {
            CompositionKind::TopLevel => {
                let context = TransactionContext::new(self.engine(), self.config.access_mode);
                self.registry.push_discovery(token, Arc::clone(&context));
                context.start_discovery();
                let outcome = Self::discover(&body, &context);
                context.end_discovery();
                if outcome.is_ok()
                    && self.registry.mode() == TransactionMode::ParallelCollecting
                {
                    self.registry
                        .enqueue_parallel(context.replay_task(Arc::clone(&body)));
                }
                self.registry.pop_discovery();
                outcome
            }
            CompositionKind::Nested => {
                self.registry.register(token, Arc::clone(&active));
                Self::discover(&body, &active)
            }
            CompositionKind::Parallel => Err(CoreError::TransactionsNotCollecting),
        }
    }

    /// Walks a body synchronously for structure only.
    ///
    /// Discovery must not suspend: leaf operations complete immediately
    /// while a context is discovering, so the body's future is polled
    /// exactly once and must finish there.
    fn discover(body: &TransactionBody, context: &Arc<TransactionContext>) -> CoreResult<()> {
        body(Arc::clone(context))
            .now_or_never()
            .ok_or(CoreError::DiscoverySuspended)?
    }

    /// Terminal failure handling for a top-level call.
    ///
    /// Aborts the failing context (preferring the one discovered for this
    /// body), returns the registry to idle, and translates engine-reported
    /// failures into [`CoreError::TransactionFailure`] carrying the
    /// context's recorded message. Structural errors pass through
    /// unchanged.
    fn resolve_failure(&self, token: ScopeToken, err: CoreError) -> CoreError {
        let context = self
            .registry
            .lookup(token)
            .or_else(|| self.registry.active());
        if let Some(context) = &context {
            context.abort(err.to_string());
        }
        self.registry.reset();
        tracing::debug!(%token, %err, "transaction call failed; session reset");

        match err {
            CoreError::Engine(engine_err) => {
                let message = context
                    .and_then(|c| c.terminal_error())
                    .unwrap_or_else(|| engine_err.to_string());
                CoreError::TransactionFailure { message }
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use weftdb_engine::MemoryEngine;

    fn create_session() -> (Arc<Session>, Arc<MemoryEngine>) {
        let engine = Arc::new(MemoryEngine::new());
        let session = Arc::new(Session::new(
            Arc::clone(&engine) as Arc<dyn StoreEngine>
        ));
        (session, engine)
    }

    #[tokio::test]
    async fn plain_top_level_body_opens_one_transaction() {
        let (session, engine) = create_session();
        let token = ScopeToken::new();

        session
            .run(token, CompositionKind::TopLevel, |tx| {
                let table = tx.table("items");
                async move { table.put(b"k", vec![1]).await }
            })
            .await
            .unwrap();

        let stats = engine.stats();
        assert_eq!(stats.begun, 1);
        assert_eq!(stats.committed, 1);
        assert_eq!(engine.stored("items", b"k"), Some(vec![1]));
    }

    #[tokio::test]
    async fn session_idles_after_success() {
        let (session, _engine) = create_session();
        session
            .run(ScopeToken::new(), CompositionKind::TopLevel, |_| async {
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(session.mode(), TransactionMode::Collecting);
        assert!(session.active_context().is_none());
    }

    #[tokio::test]
    async fn nested_without_top_level_fails_before_engine() {
        let (session, engine) = create_session();
        let result = session
            .run(ScopeToken::new(), CompositionKind::Nested, |_| async {
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CoreError::NoActiveTransaction)));
        assert_eq!(engine.stats().begun, 0);
    }

    #[tokio::test]
    async fn nested_bodies_share_parent_context() {
        let (session, engine) = create_session();
        let root = ScopeToken::new();
        let child_a = ScopeToken::new();
        let child_b = ScopeToken::new();
        let handles: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));

        session
            .run(root, CompositionKind::TopLevel, {
                let session = Arc::clone(&session);
                let handles = Rc::clone(&handles);
                move |_| {
                    let session = Arc::clone(&session);
                    let handles = Rc::clone(&handles);
                    async move {
                        for child in [child_a, child_b] {
                            session
                                .run(child, CompositionKind::Nested, {
                                    let handles = Rc::clone(&handles);
                                    move |tx| {
                                        let handles = Rc::clone(&handles);
                                        async move {
                                            if let Some(handle) = tx.engine_handle() {
                                                handles.borrow_mut().push(handle.id());
                                            }
                                            tx.table("items").put(b"k", vec![0]).await
                                        }
                                    }
                                })
                                .await?;
                        }
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        // Both nested invocations observed the same engine transaction,
        // and only one was ever opened.
        let seen = handles.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
        assert_eq!(engine.stats().begun, 1);
    }

    #[tokio::test]
    async fn unknown_token_at_replay_is_not_found() {
        let (session, _engine) = create_session();
        let root = ScopeToken::new();

        // The inner body mints a fresh token on every walk, so the token
        // seen at replay was never discovered.
        let result = session
            .run(root, CompositionKind::TopLevel, {
                let session = Arc::clone(&session);
                move |_| {
                    let session = Arc::clone(&session);
                    async move {
                        session
                            .run(ScopeToken::new(), CompositionKind::TopLevel, |_| async {
                                Ok(())
                            })
                            .await
                    }
                }
            })
            .await;

        assert!(matches!(result, Err(CoreError::TransactionNotFound { .. })));
    }

    #[tokio::test]
    async fn suspending_during_discovery_fails() {
        let (session, engine) = create_session();
        let result = session
            .run(ScopeToken::new(), CompositionKind::TopLevel, |_| async {
                tokio::task::yield_now().await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CoreError::DiscoverySuspended)));
        assert_eq!(engine.stats().begun, 0);
    }

    #[tokio::test]
    async fn parallel_group_inside_pass_is_rejected() {
        let (session, _engine) = create_session();
        let root = ScopeToken::new();
        let inner = ScopeToken::new();

        let result = session
            .run(root, CompositionKind::TopLevel, {
                let session = Arc::clone(&session);
                move |_| {
                    let session = Arc::clone(&session);
                    async move {
                        session
                            .run(inner, CompositionKind::Parallel, |_| async { Ok(()) })
                            .await
                    }
                }
            })
            .await;

        assert!(matches!(result, Err(CoreError::TransactionsNotCollecting)));
    }

    #[tokio::test]
    async fn engine_failure_is_translated_and_resets() {
        let (session, engine) = create_session();
        engine.fail_next_begin("forced abort");

        let result = session
            .run(ScopeToken::new(), CompositionKind::TopLevel, |_| async {
                Ok(())
            })
            .await;

        match result {
            Err(CoreError::TransactionFailure { message }) => {
                assert_eq!(message, "store failure: forced abort");
            }
            other => panic!("expected TransactionFailure, got {other:?}"),
        }
        assert_eq!(session.mode(), TransactionMode::Collecting);
        assert!(session.active_context().is_none());
    }

    #[tokio::test]
    async fn failed_call_leaves_clean_slate_for_next() {
        let (session, engine) = create_session();
        engine.fail_next_begin("transient");

        let token = ScopeToken::new();
        let body = |tx: Arc<TransactionContext>| {
            let table = tx.table("items");
            async move { table.put(b"k", vec![7]).await }
        };

        assert!(session
            .run(token, CompositionKind::TopLevel, body.clone())
            .await
            .is_err());

        // A fresh pass reconstructs everything it needs.
        let retry = ScopeToken::new();
        session
            .run(retry, CompositionKind::TopLevel, body)
            .await
            .unwrap();
        assert_eq!(engine.stored("items", b"k"), Some(vec![7]));
    }
}
