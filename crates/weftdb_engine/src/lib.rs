//! # WeftDB Engine
//!
//! Store engine boundary for WeftDB.
//!
//! This crate defines the narrow call boundary through which WeftDB drives
//! an externally-owned transactional store. Engines are **auto-committing**:
//! a transaction opened with [`StoreEngine::begin`] finalizes on its own as
//! soon as its originating scope drains; the only explicit control an engine
//! offers afterwards is [`StoreEngine::abort`].
//!
//! ## Design Principles
//!
//! - Engines are opaque keyed byte stores (get, put, delete per table)
//! - No knowledge of composition semantics, discovery, or replay
//! - Handles are valid only while their originating scope is live
//!
//! ## Available Engines
//!
//! - [`MemoryEngine`] - For testing and ephemeral storage

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod handle;
mod memory;

pub use engine::{AccessMode, StoreEngine};
pub use error::{EngineError, EngineResult};
pub use handle::EngineTransactionHandle;
pub use memory::{EngineStats, MemoryEngine};
