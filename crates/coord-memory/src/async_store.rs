//! Async handle for tokio callers
//!
//! The store is synchronous; every call here runs on tokio's blocking pool.
//! An optional deadline abandons the wait, not the work: a backend call that
//! outlives the deadline still completes in the background.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::entry::{Entry, ListOptions, StoreOptions};
use crate::error::{Result, StoreError};
use crate::health::BackendHealth;
use crate::store::{MemoryStore, StoreStats};

/// Cloneable async front end over a shared [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct AsyncMemoryStore {
    inner: Arc<MemoryStore>,
    deadline: Option<Duration>,
}

impl AsyncMemoryStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            deadline: None,
        }
    }

    /// Give up waiting on any operation after `deadline`
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The shared synchronous store
    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    pub fn is_using_fallback(&self) -> bool {
        self.inner.is_using_fallback()
    }

    pub fn health(&self) -> BackendHealth {
        self.inner.health()
    }

    pub async fn store(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
        options: StoreOptions,
    ) -> Result<Entry> {
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.run("store", move |store| store.store(&namespace, &key, value, options))
            .await
    }

    pub async fn store_value<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        options: StoreOptions,
    ) -> Result<Entry> {
        let value = serde_json::to_value(value).map_err(|e| {
            StoreError::serialization(crate::error::target(namespace, Some(key)), e)
        })?;
        self.store(namespace, key, value, options).await
    }

    pub async fn retrieve(&self, namespace: &str, key: &str) -> Result<Option<Entry>> {
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.run("retrieve", move |store| store.retrieve(&namespace, &key))
            .await
    }

    pub async fn retrieve_value<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>> {
        self.retrieve(namespace, key)
            .await?
            .map(|entry| entry.value_as())
            .transpose()
    }

    pub async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.run("delete", move |store| store.delete(&namespace, &key))
            .await
    }

    pub async fn list(&self, namespace: &str, options: ListOptions) -> Result<Vec<Entry>> {
        let namespace = namespace.to_string();
        self.run("list", move |store| store.list(&namespace, options))
            .await
    }

    pub async fn search(
        &self,
        namespace: &str,
        pattern: &str,
        options: ListOptions,
    ) -> Result<Vec<Entry>> {
        let (namespace, pattern) = (namespace.to_string(), pattern.to_string());
        self.run("search", move |store| store.search(&namespace, &pattern, options))
            .await
    }

    pub async fn cleanup(&self) -> Result<usize> {
        self.run("cleanup", |store| store.cleanup()).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.run("stats", |store| store.stats()).await
    }

    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&MemoryStore) -> Result<T> + Send + 'static,
    {
        let store = self.inner.clone();
        let task = tokio::task::spawn_blocking(move || f(&store));

        let joined = match self.deadline {
            Some(after) => tokio::time::timeout(after, task)
                .await
                .map_err(|_| StoreError::Timeout { operation, after })?,
            None => task.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(StoreError::Interrupted {
                operation,
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn handle() -> AsyncMemoryStore {
        AsyncMemoryStore::new(Arc::new(MemoryStore::in_memory(Arc::new(
            ManualClock::starting_now(),
        ))))
    }

    #[tokio::test]
    async fn test_async_round_trip() {
        let store = handle();
        store
            .store("sessions", "session:1", json!({"step": 2}), StoreOptions::default())
            .await
            .unwrap();

        let entry = store.retrieve("sessions", "session:1").await.unwrap().unwrap();
        assert_eq!(entry.value["step"], 2);
        assert_eq!(store.list("sessions", ListOptions::default()).await.unwrap().len(), 1);
        let found = store.search("sessions", "session:*", ListOptions::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(store.delete("sessions", "session:1").await.unwrap());
        assert!(store.retrieve("sessions", "session:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_tasks_share_one_store() {
        let store = handle();
        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .store_value(
                        "metrics",
                        &format!("metric:cpu:{}", i),
                        &i,
                        StoreOptions::default(),
                    )
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.stats().await.unwrap().total_entries, 16);
    }

    #[tokio::test]
    async fn test_deadline_returns_timeout() {
        let store = handle().with_deadline(Duration::from_millis(10));
        let err = store
            .run("slow", |_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { operation: "slow", .. }));
    }
}
