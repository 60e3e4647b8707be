//! In-memory store engine for testing.

use crate::engine::{AccessMode, StoreEngine};
use crate::error::{EngineError, EngineResult};
use crate::handle::{EngineTransactionHandle, HandleCore};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Counters describing engine activity.
///
/// Useful for asserting transaction lifecycle properties in tests:
/// how many transactions were begun, how many finalized either way, and
/// the high-water mark of simultaneously open transactions.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Transactions begun.
    pub begun: u64,
    /// Transactions that auto-committed.
    pub committed: u64,
    /// Transactions that were aborted.
    pub aborted: u64,
    /// Maximum number of transactions open at the same instant.
    pub max_open: u64,
}

/// A buffered, not-yet-committed write.
#[derive(Debug, Clone)]
enum PendingWrite {
    Put(Vec<u8>),
    Delete,
}

/// Bookkeeping for one open transaction.
struct HandleSlot {
    id: u64,
    core: Weak<HandleCore>,
    pending: HashMap<(String, Vec<u8>), PendingWrite>,
    finalized: bool,
}

/// An in-memory store engine.
///
/// Emulates the host store's scoping rule: a transaction's writes are
/// buffered against its handle and applied to the shared store once the
/// last clone of the handle is gone, unless the transaction was aborted
/// first. Liveness is observed through weak references and settled on the
/// next engine call, mirroring a host that finalizes when control returns
/// to its event loop.
///
/// Failure injection (`fail_next_begin`, `fail_table`) lets tests drive
/// the abort paths deterministically.
pub struct MemoryEngine {
    store: RwLock<BTreeMap<(String, Vec<u8>), Vec<u8>>>,
    slots: Mutex<Vec<HandleSlot>>,
    stats: Mutex<EngineStats>,
    next_id: AtomicU64,
    fail_next_begin: Mutex<Option<String>>,
    fail_tables: Mutex<HashMap<String, String>>,
}

impl MemoryEngine {
    /// Creates a new empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: RwLock::new(BTreeMap::new()),
            slots: Mutex::new(Vec::new()),
            stats: Mutex::new(EngineStats::default()),
            next_id: AtomicU64::new(1),
            fail_next_begin: Mutex::new(None),
            fail_tables: Mutex::new(HashMap::new()),
        }
    }

    /// Makes the next `begin` call fail with the given message.
    pub fn fail_next_begin(&self, message: impl Into<String>) {
        *self.fail_next_begin.lock() = Some(message.into());
    }

    /// Makes every read/write on `table` fail with the given message.
    pub fn fail_table(&self, table: impl Into<String>, message: impl Into<String>) {
        self.fail_tables.lock().insert(table.into(), message.into());
    }

    /// Returns a snapshot of the engine's counters.
    ///
    /// Settles any transactions whose scope has drained first, so the
    /// committed count is current.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.reap();
        self.stats.lock().clone()
    }

    /// Returns the committed value under `key` in `table`, if any.
    #[must_use]
    pub fn stored(&self, table: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.reap();
        self.store
            .read()
            .get(&(table.to_string(), key.to_vec()))
            .cloned()
    }

    /// Returns the number of transactions currently open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.reap();
        self.slots.lock().len()
    }

    /// Settles transactions whose last handle clone has been dropped.
    ///
    /// A drained, non-aborted transaction auto-commits: its buffered
    /// writes are applied to the shared store.
    fn reap(&self) {
        let mut slots = self.slots.lock();
        let mut store = self.store.write();
        let mut stats = self.stats.lock();

        for slot in slots.iter_mut() {
            if slot.finalized {
                continue;
            }
            if slot.core.upgrade().is_some() {
                continue;
            }
            // Last clone gone with no abort recorded: auto-commit.
            slot.finalized = true;
            stats.committed += 1;
            for ((table, key), write) in slot.pending.drain() {
                match write {
                    PendingWrite::Put(value) => {
                        store.insert((table, key), value);
                    }
                    PendingWrite::Delete => {
                        store.remove(&(table, key));
                    }
                }
            }
        }
        slots.retain(|slot| !slot.finalized);
    }

    /// Checks table-level failure injection.
    fn check_table(&self, table: &str) -> EngineResult<()> {
        if let Some(message) = self.fail_tables.lock().get(table) {
            return Err(EngineError::store(message.clone()));
        }
        Ok(())
    }

    /// Verifies the handle refers to a live, non-aborted transaction and
    /// that `table` is within its coverage.
    fn check_handle(&self, handle: &EngineTransactionHandle, table: &str) -> EngineResult<()> {
        if handle.is_aborted() {
            return Err(EngineError::Aborted { id: handle.id() });
        }
        let slots = self.slots.lock();
        let known = slots
            .iter()
            .any(|slot| slot.id == handle.id() && !slot.finalized);
        if !known {
            return Err(EngineError::HandleClosed { id: handle.id() });
        }
        if !handle.tables().iter().any(|t| t == table) {
            return Err(EngineError::store(format!(
                "table {table} not covered by transaction {}",
                handle.id()
            )));
        }
        Ok(())
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl StoreEngine for MemoryEngine {
    async fn begin(
        &self,
        tables: &[String],
        mode: AccessMode,
    ) -> EngineResult<EngineTransactionHandle> {
        // Suspension point: real engines cross into the host here.
        tokio::task::yield_now().await;
        self.reap();

        if let Some(message) = self.fail_next_begin.lock().take() {
            return Err(EngineError::store(message));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = EngineTransactionHandle::new(id, tables.to_vec(), mode);

        let mut slots = self.slots.lock();
        slots.push(HandleSlot {
            id,
            core: Arc::downgrade(handle.core()),
            pending: HashMap::new(),
            finalized: false,
        });
        let open = slots.len() as u64;
        drop(slots);

        let mut stats = self.stats.lock();
        stats.begun += 1;
        stats.max_open = stats.max_open.max(open);
        tracing::debug!(id, %mode, ?tables, "engine transaction begun");

        Ok(handle)
    }

    fn abort(&self, handle: &EngineTransactionHandle) -> EngineResult<()> {
        let mut slots = self.slots.lock();
        let Some(slot) = slots
            .iter_mut()
            .find(|slot| slot.id == handle.id() && !slot.finalized)
        else {
            // Already settled; abort is best-effort and idempotent.
            return Ok(());
        };
        handle.mark_aborted();
        slot.finalized = true;
        slot.pending.clear();
        drop(slots);

        self.stats.lock().aborted += 1;
        tracing::debug!(id = handle.id(), "engine transaction aborted");
        Ok(())
    }

    fn current(&self) -> Option<EngineTransactionHandle> {
        self.reap();
        let slots = self.slots.lock();
        slots.iter().rev().find_map(|slot| {
            let core = slot.core.upgrade()?;
            if core.aborted.load(Ordering::SeqCst) {
                None
            } else {
                Some(EngineTransactionHandle::from_core(core))
            }
        })
    }

    async fn get(
        &self,
        handle: &EngineTransactionHandle,
        table: &str,
        key: &[u8],
    ) -> EngineResult<Option<Vec<u8>>> {
        tokio::task::yield_now().await;
        self.check_handle(handle, table)?;
        self.check_table(table)?;

        let slots = self.slots.lock();
        let slot = slots
            .iter()
            .find(|slot| slot.id == handle.id())
            .ok_or(EngineError::HandleClosed { id: handle.id() })?;

        // Reads observe this transaction's own buffered writes.
        if let Some(write) = slot.pending.get(&(table.to_string(), key.to_vec())) {
            return Ok(match write {
                PendingWrite::Put(value) => Some(value.clone()),
                PendingWrite::Delete => None,
            });
        }

        Ok(self
            .store
            .read()
            .get(&(table.to_string(), key.to_vec()))
            .cloned())
    }

    async fn put(
        &self,
        handle: &EngineTransactionHandle,
        table: &str,
        key: &[u8],
        value: Vec<u8>,
    ) -> EngineResult<()> {
        tokio::task::yield_now().await;
        self.check_handle(handle, table)?;
        self.check_table(table)?;
        if handle.mode() != AccessMode::ReadWrite {
            return Err(EngineError::ReadOnlyWrite {
                table: table.to_string(),
            });
        }

        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|slot| slot.id == handle.id())
            .ok_or(EngineError::HandleClosed { id: handle.id() })?;
        slot.pending
            .insert((table.to_string(), key.to_vec()), PendingWrite::Put(value));
        Ok(())
    }

    async fn delete(
        &self,
        handle: &EngineTransactionHandle,
        table: &str,
        key: &[u8],
    ) -> EngineResult<()> {
        tokio::task::yield_now().await;
        self.check_handle(handle, table)?;
        self.check_table(table)?;
        if handle.mode() != AccessMode::ReadWrite {
            return Err(EngineError::ReadOnlyWrite {
                table: table.to_string(),
            });
        }

        let mut slots = self.slots.lock();
        let slot = slots
            .iter_mut()
            .find(|slot| slot.id == handle.id())
            .ok_or(EngineError::HandleClosed { id: handle.id() })?;
        slot.pending
            .insert((table.to_string(), key.to_vec()), PendingWrite::Delete);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("open", &self.slots.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn begin_opens_transaction() {
        let engine = MemoryEngine::new();
        let handle = engine
            .begin(&tables(&["items"]), AccessMode::ReadWrite)
            .await
            .unwrap();

        assert_eq!(engine.open_count(), 1);
        assert_eq!(engine.stats().begun, 1);
        drop(handle);
    }

    #[tokio::test]
    async fn drop_auto_commits() {
        let engine = MemoryEngine::new();
        let handle = engine
            .begin(&tables(&["items"]), AccessMode::ReadWrite)
            .await
            .unwrap();
        engine.put(&handle, "items", b"k", vec![1, 2]).await.unwrap();

        // Still buffered while the handle is live.
        assert_eq!(engine.stored("items", b"k"), None);

        drop(handle);
        assert_eq!(engine.stored("items", b"k"), Some(vec![1, 2]));
        assert_eq!(engine.stats().committed, 1);
    }

    #[tokio::test]
    async fn abort_discards_writes() {
        let engine = MemoryEngine::new();
        let handle = engine
            .begin(&tables(&["items"]), AccessMode::ReadWrite)
            .await
            .unwrap();
        engine.put(&handle, "items", b"k", vec![1]).await.unwrap();

        engine.abort(&handle).unwrap();
        drop(handle);

        assert_eq!(engine.stored("items", b"k"), None);
        let stats = engine.stats();
        assert_eq!(stats.aborted, 1);
        assert_eq!(stats.committed, 0);
    }

    #[tokio::test]
    async fn abort_is_idempotent() {
        let engine = MemoryEngine::new();
        let handle = engine
            .begin(&tables(&["items"]), AccessMode::ReadWrite)
            .await
            .unwrap();

        engine.abort(&handle).unwrap();
        engine.abort(&handle).unwrap();
        assert_eq!(engine.stats().aborted, 1);
    }

    #[tokio::test]
    async fn reads_observe_own_writes() {
        let engine = MemoryEngine::new();
        let handle = engine
            .begin(&tables(&["items"]), AccessMode::ReadWrite)
            .await
            .unwrap();

        engine.put(&handle, "items", b"k", vec![9]).await.unwrap();
        assert_eq!(
            engine.get(&handle, "items", b"k").await.unwrap(),
            Some(vec![9])
        );

        engine.delete(&handle, "items", b"k").await.unwrap();
        assert_eq!(engine.get(&handle, "items", b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_only_rejects_writes() {
        let engine = MemoryEngine::new();
        let handle = engine
            .begin(&tables(&["items"]), AccessMode::ReadOnly)
            .await
            .unwrap();

        let result = engine.put(&handle, "items", b"k", vec![1]).await;
        assert!(matches!(result, Err(EngineError::ReadOnlyWrite { .. })));
    }

    #[tokio::test]
    async fn uncovered_table_rejected() {
        let engine = MemoryEngine::new();
        let handle = engine
            .begin(&tables(&["items"]), AccessMode::ReadWrite)
            .await
            .unwrap();

        let result = engine.get(&handle, "other", b"k").await;
        assert!(matches!(result, Err(EngineError::Store { .. })));
    }

    #[tokio::test]
    async fn stale_handle_rejected() {
        let engine = MemoryEngine::new();
        let handle = engine
            .begin(&tables(&["items"]), AccessMode::ReadWrite)
            .await
            .unwrap();
        let clone = handle.clone();
        drop(handle);
        drop(clone);

        // Re-create a handle with the same shape but no live slot.
        let stale = EngineTransactionHandle::new(999, tables(&["items"]), AccessMode::ReadWrite);
        let result = engine.get(&stale, "items", b"k").await;
        assert!(matches!(result, Err(EngineError::HandleClosed { .. })));
    }

    #[tokio::test]
    async fn current_returns_latest_open() {
        let engine = MemoryEngine::new();
        assert!(engine.current().is_none());

        let first = engine
            .begin(&tables(&["a"]), AccessMode::ReadWrite)
            .await
            .unwrap();
        let second = engine
            .begin(&tables(&["b"]), AccessMode::ReadWrite)
            .await
            .unwrap();

        assert_eq!(engine.current().unwrap().id(), second.id());
        drop(second);
        assert_eq!(engine.current().unwrap().id(), first.id());
        drop(first);
        assert!(engine.current().is_none());
    }

    #[tokio::test]
    async fn fail_next_begin_injection() {
        let engine = MemoryEngine::new();
        engine.fail_next_begin("quota exceeded");

        let result = engine.begin(&tables(&["items"]), AccessMode::ReadWrite).await;
        assert!(matches!(result, Err(EngineError::Store { .. })));

        // Only the next begin fails.
        assert!(engine
            .begin(&tables(&["items"]), AccessMode::ReadWrite)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn fail_table_injection() {
        let engine = MemoryEngine::new();
        engine.fail_table("audit", "disk full");

        let handle = engine
            .begin(&tables(&["audit"]), AccessMode::ReadWrite)
            .await
            .unwrap();
        let result = engine.put(&handle, "audit", b"k", vec![1]).await;
        assert!(matches!(result, Err(EngineError::Store { .. })));
    }

    #[tokio::test]
    async fn max_open_watermark() {
        let engine = MemoryEngine::new();
        let a = engine
            .begin(&tables(&["a"]), AccessMode::ReadWrite)
            .await
            .unwrap();
        let b = engine
            .begin(&tables(&["b"]), AccessMode::ReadWrite)
            .await
            .unwrap();
        drop(a);
        drop(b);

        assert_eq!(engine.stats().max_open, 2);
    }
}
