//! Shared helpers for the integration suites

#![allow(dead_code)]

use coord_memory::{
    BackendKind, Entry, KeyPattern, ListOptions, ManualClock, MemoryBackend, MemoryStore,
    Result, RetryConfig, StoreConfig, StoreError, UpdateFn, VolatileBackend, WriteRequest,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Fast retries so contention tests do not sleep for long
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter: false,
    }
}

pub fn sqlite_config(path: &Path) -> StoreConfig {
    StoreConfig::default()
        .with_db_path(path)
        .with_lock_timeout_ms(2000)
        .with_retry(fast_retry())
}

/// SQLite-backed store in a fresh temp directory
pub fn sqlite_store() -> (TempDir, Arc<ManualClock>, MemoryStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::starting_now());
    let config = sqlite_config(&dir.path().join("memory.db"));
    let store = MemoryStore::open_with_clock(&config, clock.clone());
    assert!(!store.is_using_fallback(), "sqlite should open in a temp dir");
    (dir, clock, store)
}

/// Volatile backend that can be told to fail like SQLite does
#[derive(Debug)]
pub struct FaultyBackend {
    inner: VolatileBackend,
    /// Calls that will report lock contention before succeeding
    busy_remaining: AtomicU32,
    /// Once set, every call fails fatally
    broken: AtomicBool,
    pub calls: AtomicU32,
}

impl FaultyBackend {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            inner: VolatileBackend::new(clock),
            busy_remaining: AtomicU32::new(0),
            broken: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn busy_for(&self, calls: u32) {
        self.busy_remaining.store(calls, Ordering::SeqCst);
    }

    pub fn break_now(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::BackendFatal {
                operation,
                target: "faulty".to_string(),
                message: "disk I/O error".to_string(),
            });
        }
        let busy = self
            .busy_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if busy {
            return Err(StoreError::LockTimeout {
                operation,
                target: "faulty".to_string(),
                message: "database is locked".to_string(),
            });
        }
        Ok(())
    }
}

/// Shares one [`FaultyBackend`] between the test and the store
#[derive(Debug, Clone)]
pub struct SharedFaulty(pub Arc<FaultyBackend>);

impl MemoryBackend for SharedFaulty {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn initialize(&self) -> Result<()> {
        self.0.check("initialize")
    }

    fn store(&self, request: WriteRequest<'_>) -> Result<Entry> {
        self.0.check("store")?;
        self.0.inner.store(request)
    }

    fn update(
        &self,
        namespace: &str,
        key: &str,
        apply: &mut UpdateFn<'_>,
    ) -> Result<Option<Entry>> {
        self.0.check("update")?;
        self.0.inner.update(namespace, key, apply)
    }

    fn retrieve(&self, namespace: &str, key: &str) -> Result<Option<Entry>> {
        self.0.check("retrieve")?;
        self.0.inner.retrieve(namespace, key)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        self.0.check("delete")?;
        self.0.inner.delete(namespace, key)
    }

    fn list(&self, namespace: &str, options: ListOptions) -> Result<Vec<Entry>> {
        self.0.check("list")?;
        self.0.inner.list(namespace, options)
    }

    fn search(
        &self,
        namespace: &str,
        pattern: &KeyPattern,
        options: ListOptions,
    ) -> Result<Vec<Entry>> {
        self.0.check("search")?;
        self.0.inner.search(namespace, pattern, options)
    }

    fn cleanup_expired(&self) -> Result<usize> {
        self.0.check("cleanup")?;
        self.0.inner.cleanup_expired()
    }

    fn namespaces(&self) -> Result<Vec<(String, usize)>> {
        self.0.check("namespaces")?;
        self.0.inner.namespaces()
    }
}
