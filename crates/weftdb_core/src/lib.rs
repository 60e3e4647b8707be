//! # WeftDB Core
//!
//! Collect-then-replay transaction composition engine.
//!
//! WeftDB sits between ordinary async application code and an
//! externally-owned store whose transactions are callback-scoped and
//! auto-committing. Application code composes nested and parallel
//! sub-transactions as regular function calls; the store only understands
//! one flat transaction per scope. The engine reconciles the two with a
//! two-phase protocol:
//!
//! 1. **Discovery** — the transaction body is walked once in a dry mode
//!    that records its structure (which scopes exist, how they nest,
//!    which tables they touch) without touching the engine.
//! 2. **Replay** — the body is walked again live, with real engine
//!    transactions opened per discovered top-level scope.
//!
//! Nested bodies share their enclosing scope's engine transaction;
//! parallel siblings each get their own and are joined before the group
//! returns.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use weftdb_core::{CompositionKind, ScopeToken, Session};
//! use weftdb_engine::{MemoryEngine, StoreEngine};
//!
//! let engine: Arc<dyn StoreEngine> = Arc::new(MemoryEngine::new());
//! let session = Arc::new(Session::new(engine));
//!
//! let scope = ScopeToken::new();
//! session
//!     .run(scope, CompositionKind::TopLevel, |tx| {
//!         let items = tx.table("items");
//!         async move { items.put(b"id-1", b"first".to_vec()).await }
//!     })
//!     .await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod error;
mod registry;
mod session;
mod table;
mod types;

pub use config::SessionConfig;
pub use context::{TransactionBody, TransactionContext};
pub use error::{CoreError, CoreResult};
pub use session::Session;
pub use table::Table;
pub use types::{CompositionKind, ScopeToken, TransactionMode};

pub use weftdb_engine::{
    AccessMode, EngineError, EngineResult, EngineTransactionHandle, MemoryEngine, StoreEngine,
};
