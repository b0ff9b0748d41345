//! Coord Memory - shared state for hook scripts, agents and session tooling
//!
//! A namespaced key/value store that every coordinating process reads and
//! writes through one handle. Data lives in a single SQLite file under
//! write-ahead journaling; when that file cannot be used the store keeps
//! serving from memory instead of failing its callers.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ CoordinationMemory  sessions · workflows · metrics · agents │
//! │                     knowledge · learning · perf · cache     │
//! ├────────────────────────────────────────────────────────────┤
//! │ MemoryStore         validation · retry · fallback · health  │
//! ├──────────────────────────────┬─────────────────────────────┤
//! │ SqliteBackend (WAL file)     │ VolatileBackend (in-memory) │
//! └──────────────────────────────┴─────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use coord_memory::{CoordinationMemory, MemoryStore, StoreConfig, StoreOptions};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let config = StoreConfig::default().with_force_volatile(true);
//! let store = Arc::new(MemoryStore::open(&config));
//!
//! store
//!     .store("tasks", "task:42", json!({"state": "claimed"}), StoreOptions::default())
//!     .unwrap();
//! let entry = store.retrieve("tasks", "task:42").unwrap().unwrap();
//! assert_eq!(entry.value["state"], "claimed");
//!
//! let memory = CoordinationMemory::new(store.clone());
//! memory.track_performance("build", 120.0, true, Default::default()).unwrap();
//! ```
//!
//! # Failure model
//!
//! - Lock contention is retried with bounded exponential backoff.
//! - A fatal SQLite error switches the process to the volatile backend for
//!   good; the failed call is re-issued there and [`MemoryStore::health`]
//!   records why.
//! - Expired entries are never returned, whether or not a sweep has run.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod async_store;
pub mod clock;
pub mod config;
pub mod coordination;
pub mod entry;
pub mod error;
pub mod health;
pub mod namespaces;
pub mod retry;
pub mod storage;
pub mod store;
pub mod sweeper;
pub mod transfer;

pub use async_store::AsyncMemoryStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RetryConfig, StoreConfig, SyncMode};
pub use coordination::CoordinationMemory;
pub use entry::{Entry, KeyPattern, ListOptions, Metadata, StoreOptions, DEFAULT_NAMESPACE};
pub use error::{Result, StoreError};
pub use health::{BackendHealth, BackendMode, FallbackReason};
pub use retry::RetryPolicy;
pub use storage::{
    BackendKind, MemoryBackend, Replacement, SqliteBackend, UpdateFn, VolatileBackend, WriteRequest,
};
pub use store::{MemoryStore, StoreStats};
pub use sweeper::TtlSweeper;
pub use transfer::{ExportDocument, ExportMap, ImportSummary};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
