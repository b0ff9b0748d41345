//! Periodic TTL sweep
//!
//! Expired entries are already invisible to every read; the sweeper only
//! reclaims their space. It runs `cleanup()` on a dedicated thread every
//! `interval` and stops when dropped.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::store::MemoryStore;

/// Handle to the background sweep thread
#[derive(Debug)]
pub struct TtlSweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl TtlSweeper {
    /// Start sweeping `store` every `interval`
    pub fn spawn(store: Arc<MemoryStore>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(StoreError::validation("sweep_interval", "must be greater than zero"));
        }
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("coord-memory-sweeper".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = store.cleanup() {
                            tracing::warn!("ttl sweep failed: {}", e);
                        }
                    }
                    // Stop requested or handle dropped
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        tracing::debug!(interval_secs = interval.as_secs_f64(), "ttl sweeper started");
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
            interval,
        })
    }

    /// Start a sweeper if the store was configured with a sweep interval
    pub fn from_store(store: &Arc<MemoryStore>) -> Result<Option<Self>> {
        store
            .sweep_interval()
            .map(|interval| Self::spawn(store.clone(), interval))
            .transpose()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the thread and wait for an in-flight sweep to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("ttl sweeper thread panicked");
            }
        }
    }
}

impl Drop for TtlSweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use crate::entry::{Entry, KeyPattern, ListOptions};
    use crate::retry::RetryPolicy;
    use crate::storage::{BackendKind, MemoryBackend, UpdateFn, VolatileBackend, WriteRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that only counts sweeps
    #[derive(Debug, Default)]
    struct CountingBackend {
        sweeps: Arc<AtomicUsize>,
    }

    impl MemoryBackend for CountingBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Volatile
        }
        fn initialize(&self) -> Result<()> {
            Ok(())
        }
        fn store(&self, _request: WriteRequest<'_>) -> Result<Entry> {
            Err(StoreError::validation("key", "read-only test backend"))
        }
        fn update(
            &self,
            _namespace: &str,
            _key: &str,
            _apply: &mut UpdateFn<'_>,
        ) -> Result<Option<Entry>> {
            Err(StoreError::validation("key", "read-only test backend"))
        }
        fn retrieve(&self, _namespace: &str, _key: &str) -> Result<Option<Entry>> {
            Ok(None)
        }
        fn delete(&self, _namespace: &str, _key: &str) -> Result<bool> {
            Ok(false)
        }
        fn list(&self, _namespace: &str, _options: ListOptions) -> Result<Vec<Entry>> {
            Ok(Vec::new())
        }
        fn search(
            &self,
            _namespace: &str,
            _pattern: &KeyPattern,
            _options: ListOptions,
        ) -> Result<Vec<Entry>> {
            Ok(Vec::new())
        }
        fn cleanup_expired(&self) -> Result<usize> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
        fn namespaces(&self) -> Result<Vec<(String, usize)>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_sweeper_calls_cleanup_periodically() {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::starting_now());
        let sweeps = Arc::new(AtomicUsize::new(0));
        let primary = CountingBackend { sweeps: sweeps.clone() };
        let store = Arc::new(MemoryStore::with_backends(
            Box::new(primary),
            Box::new(VolatileBackend::new(clock.clone())),
            RetryPolicy::none(),
            clock,
        ));

        let sweeper = TtlSweeper::spawn(store, Duration::from_millis(5)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sweeps.load(Ordering::SeqCst) < 3 {
            assert!(std::time::Instant::now() < deadline, "sweeper never ran");
            std::thread::sleep(Duration::from_millis(5));
        }
        sweeper.stop();

        let after_stop = sweeps.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(sweeps.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_sweeper_from_config() {
        let clock = Arc::new(ManualClock::starting_now());
        let plain = Arc::new(MemoryStore::in_memory(clock.clone()));
        assert!(TtlSweeper::from_store(&plain).unwrap().is_none());

        let config = StoreConfig::default()
            .with_force_volatile(true)
            .with_sweep_interval_secs(60);
        let swept = Arc::new(MemoryStore::open_with_clock(&config, clock));
        let sweeper = TtlSweeper::from_store(&swept).unwrap().unwrap();
        assert_eq!(sweeper.interval(), Duration::from_secs(60));
        // Dropping must not wait for the next tick
        drop(sweeper);

        assert!(TtlSweeper::spawn(plain, Duration::ZERO).is_err());
    }
}
