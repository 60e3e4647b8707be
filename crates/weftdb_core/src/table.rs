//! Leaf table operations.
//!
//! Tables are the point where application reads and writes meet the
//! engine. A table does not hold a transaction itself; it resolves one at
//! every call. During discovery a table operation only enlists its table
//! name on the discovering context and completes immediately — that dry
//! completion is what lets discovery walk a whole body without touching
//! the engine.

use crate::context::TransactionContext;
use crate::error::{CoreError, CoreResult};
use crate::session::Session;
use std::sync::Arc;
use weftdb_engine::{AccessMode, EngineTransactionHandle, StoreEngine};

/// A named table in the store.
///
/// Obtained from [`Session::table`] (ambient binding: operations attach
/// to whatever context is active when they run) or
/// [`TransactionContext::table`] (scoped binding: operations always
/// attach to that context). With no active context, ambient operations
/// run as implicit single-operation transactions.
pub struct Table {
    name: String,
    binding: Binding,
}

enum Binding {
    Ambient(Arc<Session>),
    Scoped(Arc<TransactionContext>),
}

impl Table {
    pub(crate) fn ambient(name: String, session: Arc<Session>) -> Self {
        Self {
            name,
            binding: Binding::Ambient(session),
        }
    }

    pub(crate) fn scoped(name: String, context: Arc<TransactionContext>) -> Self {
        Self {
            name,
            binding: Binding::Scoped(context),
        }
    }

    /// Returns the table's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self) -> Option<Arc<TransactionContext>> {
        match &self.binding {
            Binding::Scoped(context) => Some(Arc::clone(context)),
            Binding::Ambient(session) => session.active_context(),
        }
    }

    fn engine(&self) -> Arc<dyn StoreEngine> {
        match &self.binding {
            Binding::Scoped(context) => Arc::clone(context.engine()),
            Binding::Ambient(session) => session.engine(),
        }
    }

    fn open_handle(&self, context: &TransactionContext) -> CoreResult<EngineTransactionHandle> {
        context.engine_handle().ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "no open engine transaction for table {}",
                self.name
            ))
        })
    }

    /// Reads the value stored under `key`.
    ///
    /// Yields `None` during discovery; reads in discovery exist only to
    /// enlist their table.
    pub async fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        match self.resolve() {
            Some(context) => {
                if context.is_discovering() {
                    context.enlist_table(&self.name);
                    return Ok(None);
                }
                let handle = self.open_handle(&context)?;
                Ok(self.engine().get(&handle, &self.name, key).await?)
            }
            None => {
                let engine = self.engine();
                let handle = engine
                    .begin(&[self.name.clone()], AccessMode::ReadOnly)
                    .await?;
                Ok(engine.get(&handle, &self.name, key).await?)
            }
        }
    }

    /// Inserts or replaces the value stored under `key`.
    pub async fn put(&self, key: &[u8], value: Vec<u8>) -> CoreResult<()> {
        match self.resolve() {
            Some(context) => {
                if context.is_discovering() {
                    context.enlist_table(&self.name);
                    return Ok(());
                }
                let handle = self.open_handle(&context)?;
                Ok(self.engine().put(&handle, &self.name, key, value).await?)
            }
            None => {
                let engine = self.engine();
                let handle = engine
                    .begin(&[self.name.clone()], AccessMode::ReadWrite)
                    .await?;
                Ok(engine.put(&handle, &self.name, key, value).await?)
            }
        }
    }

    /// Deletes the value stored under `key`.
    pub async fn delete(&self, key: &[u8]) -> CoreResult<()> {
        match self.resolve() {
            Some(context) => {
                if context.is_discovering() {
                    context.enlist_table(&self.name);
                    return Ok(());
                }
                let handle = self.open_handle(&context)?;
                Ok(self.engine().delete(&handle, &self.name, key).await?)
            }
            None => {
                let engine = self.engine();
                let handle = engine
                    .begin(&[self.name.clone()], AccessMode::ReadWrite)
                    .await?;
                Ok(engine.delete(&handle, &self.name, key).await?)
            }
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let binding = match &self.binding {
            Binding::Ambient(_) => "ambient",
            Binding::Scoped(_) => "scoped",
        };
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("binding", &binding)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weftdb_engine::MemoryEngine;

    fn create_session() -> (Arc<Session>, Arc<MemoryEngine>) {
        let engine = Arc::new(MemoryEngine::new());
        let session = Arc::new(Session::new(
            Arc::clone(&engine) as Arc<dyn StoreEngine>
        ));
        (session, engine)
    }

    #[tokio::test]
    async fn ambient_ops_outside_transaction_are_single_op() {
        let (session, engine) = create_session();
        let items = session.table("items");

        items.put(b"k", vec![1]).await.unwrap();
        assert_eq!(items.get(b"k").await.unwrap(), Some(vec![1]));
        items.delete(b"k").await.unwrap();
        assert_eq!(items.get(b"k").await.unwrap(), None);

        // One implicit transaction per operation.
        let stats = engine.stats();
        assert_eq!(stats.begun, 4);
        assert_eq!(stats.committed, 4);
    }

    #[tokio::test]
    async fn implicit_reads_are_read_only() {
        let (session, engine) = create_session();
        session.table("items").get(b"k").await.unwrap();

        // The engine would have rejected a write on this handle; all we
        // can observe from outside is that the transaction finalized.
        assert_eq!(engine.stats().committed, 1);
    }

    #[tokio::test]
    async fn discovering_context_enlists_without_engine_calls() {
        let (_, engine) = create_session();
        let context = TransactionContext::new(
            Arc::clone(&engine) as Arc<dyn StoreEngine>,
            AccessMode::ReadWrite,
        );
        context.start_discovery();

        let table = context.table("orders");
        assert_eq!(table.get(b"k").await.unwrap(), None);
        table.put(b"k", vec![1]).await.unwrap();
        table.delete(b"k").await.unwrap();

        assert_eq!(context.tables(), vec!["orders".to_string()]);
        assert_eq!(engine.stats().begun, 0);
    }

    #[tokio::test]
    async fn scoped_op_without_open_transaction_fails() {
        let (_, engine) = create_session();
        let context = TransactionContext::new(
            Arc::clone(&engine) as Arc<dyn StoreEngine>,
            AccessMode::ReadWrite,
        );

        // Not discovering, no handle: the context is not usable yet.
        let result = context.table("items").get(b"k").await;
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }
}
