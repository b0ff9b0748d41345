//! Storage backends
//!
//! Two implementations of one contract:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    MemoryBackend                     │
//! ├──────────────────────────┬───────────────────────────┤
//! │      SqliteBackend       │      VolatileBackend      │
//! │  single file, WAL, busy  │  namespaced map behind a  │
//! │  timeout, page cache     │  RwLock, no durability    │
//! └──────────────────────────┴───────────────────────────┘
//! ```
//!
//! Both treat entries past `expires_at` as absent on every read, list entries
//! in insertion order, and evaluate search patterns with [`KeyPattern`]. The
//! only observable difference is durability.

pub mod sqlite_store;
pub mod volatile_store;

pub use sqlite_store::SqliteBackend;
pub use volatile_store::VolatileBackend;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entry::{Entry, KeyPattern, ListOptions, Metadata};
use crate::error::Result;

/// Which implementation is serving requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Sqlite,
    Volatile,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Volatile => write!(f, "volatile"),
        }
    }
}

/// A fully resolved write, produced by the facade
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    pub namespace: &'a str,
    pub key: &'a str,
    pub value: &'a serde_json::Value,
    pub metadata: &'a Metadata,
    pub expires_at: Option<DateTime<Utc>>,
}

/// New contents for an entry, produced inside [`MemoryBackend::update`]
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub value: serde_json::Value,
    pub metadata: Metadata,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Replacement {
    /// Borrow as a write to `(namespace, key)`
    pub fn as_request<'a>(&'a self, namespace: &'a str, key: &'a str) -> WriteRequest<'a> {
        WriteRequest {
            namespace,
            key,
            value: &self.value,
            metadata: &self.metadata,
            expires_at: self.expires_at,
        }
    }
}

/// Callback of [`MemoryBackend::update`]: sees the live entry, if any, and
/// returns its replacement or `None` to leave it untouched
pub type UpdateFn<'a> = dyn FnMut(Option<&Entry>) -> Result<Option<Replacement>> + 'a;

/// The backend contract.
///
/// Inputs arrive validated (non-empty namespace and key); backends own
/// timestamps and expiry filtering. Implementations must be safe to share
/// across threads.
pub trait MemoryBackend: Send + Sync + fmt::Debug {
    /// Implementation identity, for health reporting and logs
    fn kind(&self) -> BackendKind;

    /// Prepare the backend. Idempotent.
    fn initialize(&self) -> Result<()>;

    /// Insert or fully replace the entry at `(namespace, key)`
    fn store(&self, request: WriteRequest<'_>) -> Result<Entry>;

    /// Read the live entry at `(namespace, key)` and write what `apply`
    /// returns, with no other writer in between. An error from `apply`
    /// abandons the update. Returns the entry as it stands afterwards.
    ///
    /// `apply` runs while the backend's write lock is held and must not call
    /// back into the backend.
    fn update(&self, namespace: &str, key: &str, apply: &mut UpdateFn<'_>)
        -> Result<Option<Entry>>;

    /// Fetch a live entry
    fn retrieve(&self, namespace: &str, key: &str) -> Result<Option<Entry>>;

    /// Remove an entry; returns whether a live entry was removed
    fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Live entries of a namespace in insertion order
    fn list(&self, namespace: &str, options: ListOptions) -> Result<Vec<Entry>>;

    /// Live entries whose key matches `pattern`, in insertion order
    fn search(&self, namespace: &str, pattern: &KeyPattern, options: ListOptions)
        -> Result<Vec<Entry>>;

    /// Physically remove expired entries; returns how many were removed
    fn cleanup_expired(&self) -> Result<usize>;

    /// Namespaces holding live entries, with their live entry counts
    fn namespaces(&self) -> Result<Vec<(String, usize)>>;
}

/// Whether a backend-assigned expiry has passed
pub(crate) fn expired(expires_at_ms: Option<i64>, now_ms: i64) -> bool {
    expires_at_ms.map_or(false, |exp| exp <= now_ms)
}
