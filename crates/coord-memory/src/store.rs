//! MemoryStore — the resilient store facade
//!
//! One handle, constructed once at process start and shared by reference
//! (usually as `Arc<MemoryStore>`) with every consumer.
//!
//! ```text
//!   caller ──► MemoryStore ──► RetryPolicy ──► SqliteBackend
//!                  │                              │ BackendFatal
//!                  │◄─────────── demote ──────────┘
//!                  └──────────────────────────► VolatileBackend
//! ```
//!
//! Initialization never fails: if the persistent backend cannot be opened the
//! facade binds to the volatile backend and records why. At runtime, lock
//! contention is retried with bounded backoff; a fatal backend error switches
//! the facade to the volatile backend permanently (no re-promotion within the
//! process) and the failed operation is re-issued there.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{duration_ms, Clock, SystemClock};
use crate::config::StoreConfig;
use crate::entry::{
    resolve_namespace, validate_key, Entry, KeyPattern, ListOptions, Metadata, StoreOptions,
};
use crate::error::{target, Result, StoreError};
use crate::health::{BackendHealth, BackendMode, FallbackReason};
use crate::retry::RetryPolicy;
use crate::storage::{
    BackendKind, MemoryBackend, Replacement, SqliteBackend, VolatileBackend, WriteRequest,
};

/// Resilient store facade over a persistent and a volatile backend
#[derive(Debug)]
pub struct MemoryStore {
    primary: Option<Box<dyn MemoryBackend>>,
    fallback: Box<dyn MemoryBackend>,
    health: RwLock<BackendHealth>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    sweep_interval: Option<Duration>,
}

/// Summary returned by [`MemoryStore::stats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub backend: BackendKind,
    pub mode: BackendMode,
    pub total_entries: usize,
    pub namespaces: BTreeMap<String, usize>,
}

impl MemoryStore {
    /// Open the store described by `config` on the wall clock
    pub fn open(config: &StoreConfig) -> Self {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Open the store with an explicit time source
    pub fn open_with_clock(config: &StoreConfig, clock: Arc<dyn Clock>) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        let fallback: Box<dyn MemoryBackend> = Box::new(VolatileBackend::new(clock.clone()));

        let store = if config.force_volatile {
            tracing::info!("coordination memory running in volatile mode by configuration");
            Self::assemble(None, fallback, Some(FallbackReason::Disabled), retry, clock)
        } else {
            match SqliteBackend::open(config, clock.clone()) {
                Ok(sqlite) => {
                    tracing::info!(
                        path = %sqlite.path().display(),
                        "coordination memory using sqlite backend"
                    );
                    Self::assemble(Some(Box::new(sqlite)), fallback, None, retry, clock)
                }
                Err(err) => Self::init_failed(err, fallback, retry, clock),
            }
        };

        Self {
            sweep_interval: config.sweep_interval(),
            ..store
        }
    }

    /// Volatile-only store, useful for tests and ephemeral tools
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::open_with_clock(&StoreConfig::default().with_force_volatile(true), clock)
    }

    /// Bind explicit backend implementations.
    ///
    /// `primary.initialize()` is attempted first; on failure the facade binds
    /// to `fallback` exactly as it does for the built-in backends.
    pub fn with_backends(
        primary: Box<dyn MemoryBackend>,
        fallback: Box<dyn MemoryBackend>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        match primary.initialize() {
            Ok(()) => Self::assemble(Some(primary), fallback, None, retry, clock),
            Err(err) => Self::init_failed(err, fallback, retry, clock),
        }
    }

    fn init_failed(
        err: StoreError,
        fallback: Box<dyn MemoryBackend>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        tracing::warn!(
            "persistent backend unavailable, falling back to in-memory storage: {}",
            err
        );
        let reason = FallbackReason::UnavailableAtInit {
            message: err.to_string(),
        };
        Self::assemble(None, fallback, Some(reason), retry, clock)
    }

    fn assemble(
        primary: Option<Box<dyn MemoryBackend>>,
        fallback: Box<dyn MemoryBackend>,
        reason: Option<FallbackReason>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if let Err(err) = fallback.initialize() {
            tracing::warn!("fallback backend failed to initialize: {}", err);
        }
        let now = clock.now();
        let health = match (&primary, reason) {
            (Some(primary), None) => BackendHealth::primary(primary.kind(), now),
            (_, reason) => BackendHealth::fallback(
                fallback.kind(),
                reason.unwrap_or(FallbackReason::Disabled),
                now,
            ),
        };
        Self {
            primary,
            fallback,
            health: RwLock::new(health),
            retry,
            clock,
            sweep_interval: None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Health
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether writes currently land in the volatile backend
    pub fn is_using_fallback(&self) -> bool {
        self.health.read().is_fallback()
    }

    /// Current backend health state
    pub fn health(&self) -> BackendHealth {
        self.health.read().clone()
    }

    /// Implementation currently serving requests
    pub fn active_backend(&self) -> BackendKind {
        self.health.read().backend
    }

    /// Shared time source
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time according to the store's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Configured period of the background TTL sweep
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Core operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or fully replace `(namespace, key)`. An empty namespace means
    /// [`crate::entry::DEFAULT_NAMESPACE`].
    pub fn store(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
        options: StoreOptions,
    ) -> Result<Entry> {
        let expires_at = self.expiry(options.ttl)?;
        self.write(namespace, key, &value, &options.metadata, expires_at)
    }

    /// Serialize `value` and store it
    pub fn store_value<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        options: StoreOptions,
    ) -> Result<Entry> {
        let value = serde_json::to_value(value)
            .map_err(|e| StoreError::serialization(target(namespace, Some(key)), e))?;
        self.store(namespace, key, value, options)
    }

    /// Write with an absolute expiry; used by `store` and by imports
    pub(crate) fn write(
        &self,
        namespace: &str,
        key: &str,
        value: &serde_json::Value,
        metadata: &Metadata,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Entry> {
        let namespace = resolve_namespace(namespace)?;
        validate_key(key)?;
        let request = WriteRequest {
            namespace,
            key,
            value,
            metadata,
            expires_at,
        };
        self.execute("store", |backend| backend.store(request))
    }

    /// Read-modify-write `(namespace, key)` atomically.
    ///
    /// `apply` receives the live entry, if any, and returns the new value
    /// with its options, or `None` to leave the entry as it is. No other
    /// write to the backing store can land between the read and the write,
    /// including writes from other processes sharing the file. An error from
    /// `apply` abandons the update and is returned unchanged.
    ///
    /// `apply` may run more than once when lock contention is retried, and
    /// must not call back into the store.
    pub fn update<F>(&self, namespace: &str, key: &str, mut apply: F) -> Result<Option<Entry>>
    where
        F: FnMut(Option<&Entry>) -> Result<Option<(serde_json::Value, StoreOptions)>>,
    {
        let namespace = resolve_namespace(namespace)?;
        validate_key(key)?;
        let mut replace = |current: Option<&Entry>| -> Result<Option<Replacement>> {
            let Some((value, options)) = apply(current)? else {
                return Ok(None);
            };
            Ok(Some(Replacement {
                value,
                expires_at: self.expiry(options.ttl)?,
                metadata: options.metadata,
            }))
        };
        self.execute("update", |backend| backend.update(namespace, key, &mut replace))
    }

    /// Typed [`MemoryStore::update`]: the live value is decoded before
    /// `apply` sees it and the result is encoded on the way back
    pub fn update_value<T, F>(&self, namespace: &str, key: &str, mut apply: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(Option<T>) -> Result<Option<(T, StoreOptions)>>,
    {
        let updated = self.update(namespace, key, |current| {
            let current = current.map(Entry::value_as::<T>).transpose()?;
            match apply(current)? {
                Some((value, options)) => {
                    let value = serde_json::to_value(&value)
                        .map_err(|e| StoreError::serialization(target(namespace, Some(key)), e))?;
                    Ok(Some((value, options)))
                }
                None => Ok(None),
            }
        })?;
        updated.map(|entry| entry.value_as()).transpose()
    }

    /// Fetch a live entry; `Ok(None)` means absent
    pub fn retrieve(&self, namespace: &str, key: &str) -> Result<Option<Entry>> {
        let namespace = resolve_namespace(namespace)?;
        validate_key(key)?;
        self.execute("retrieve", |backend| backend.retrieve(namespace, key))
    }

    /// Fetch and decode a live entry's value
    pub fn retrieve_value<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>> {
        self.retrieve(namespace, key)?
            .map(|entry| entry.value_as())
            .transpose()
    }

    /// Remove an entry; returns whether a live entry existed
    pub fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let namespace = resolve_namespace(namespace)?;
        validate_key(key)?;
        self.execute("delete", |backend| backend.delete(namespace, key))
    }

    /// Live entries of a namespace, in insertion order
    pub fn list(&self, namespace: &str, options: ListOptions) -> Result<Vec<Entry>> {
        let namespace = resolve_namespace(namespace)?;
        self.execute("list", |backend| backend.list(namespace, options))
    }

    /// Live entries whose key matches `pattern` (see [`KeyPattern::parse`])
    pub fn search(
        &self,
        namespace: &str,
        pattern: &str,
        options: ListOptions,
    ) -> Result<Vec<Entry>> {
        self.search_pattern(namespace, &KeyPattern::parse(pattern), options)
    }

    /// Live entries whose key matches a prepared pattern
    pub fn search_pattern(
        &self,
        namespace: &str,
        pattern: &KeyPattern,
        options: ListOptions,
    ) -> Result<Vec<Entry>> {
        let namespace = resolve_namespace(namespace)?;
        self.execute("search", |backend| backend.search(namespace, pattern, options))
    }

    /// Physically remove expired entries from the active backend
    pub fn cleanup(&self) -> Result<usize> {
        let removed = self.execute("cleanup", |backend| backend.cleanup_expired())?;
        if removed > 0 {
            tracing::debug!(removed, "ttl sweep removed expired entries");
        }
        Ok(removed)
    }

    /// Namespaces with live entries and their counts
    pub fn namespaces(&self) -> Result<Vec<(String, usize)>> {
        self.execute("namespaces", |backend| backend.namespaces())
    }

    /// Backend identity and entry counts
    pub fn stats(&self) -> Result<StoreStats> {
        let namespaces: BTreeMap<String, usize> = self.namespaces()?.into_iter().collect();
        let health = self.health();
        Ok(StoreStats {
            backend: health.backend,
            mode: health.mode,
            total_entries: namespaces.values().sum(),
            namespaces,
        })
    }

    /// Absolute expiry for a relative TTL, at millisecond precision.
    ///
    /// Zero is rejected; a sub-millisecond TTL rounds up to one millisecond.
    fn expiry(&self, ttl: Option<Duration>) -> Result<Option<DateTime<Utc>>> {
        let Some(ttl) = ttl else {
            return Ok(None);
        };
        if ttl.is_zero() {
            return Err(StoreError::validation("ttl", "must be greater than zero"));
        }
        chrono::Duration::try_milliseconds(duration_ms(ttl).max(1))
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
            .map(Some)
            .ok_or_else(|| {
                StoreError::validation("ttl", format!("{:?} is beyond the supported range", ttl))
            })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Routing
    // ─────────────────────────────────────────────────────────────────────────

    fn execute<T, F>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut(&dyn MemoryBackend) -> Result<T>,
    {
        if let Some(primary) = self.active_primary() {
            match self.retry.run(operation, || op(primary)) {
                Err(err) if err.is_fatal() => self.demote(operation, &err),
                result => return result,
            }
        }
        op(self.fallback.as_ref())
    }

    fn active_primary(&self) -> Option<&dyn MemoryBackend> {
        if self.health.read().mode == BackendMode::Primary {
            self.primary.as_deref()
        } else {
            None
        }
    }

    /// One-way switch to the volatile backend
    fn demote(&self, operation: &'static str, err: &StoreError) {
        let mut health = self.health.write();
        if health.is_fallback() {
            return;
        }
        *health = BackendHealth::fallback(
            self.fallback.kind(),
            FallbackReason::FailedAtRuntime {
                operation: operation.to_string(),
                message: err.to_string(),
            },
            self.clock.now(),
        );
        tracing::warn!(
            operation,
            "persistent backend failed, using in-memory storage until restart: {}",
            err
        );
    }
}
