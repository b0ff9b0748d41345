//! VolatileBackend — in-process namespaced map
//!
//! Same contract as [`super::SqliteBackend`] without durability: state lives
//! only as long as the process. Mutual exclusion is an in-process `RwLock`;
//! expiry is evaluated on every read and physically applied by
//! [`MemoryBackend::cleanup_expired`].

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{BackendKind, MemoryBackend, UpdateFn, WriteRequest};
use crate::clock::Clock;
use crate::entry::{Entry, KeyPattern, ListOptions};
use crate::error::Result;

/// In-memory fallback backend
#[derive(Debug)]
pub struct VolatileBackend {
    state: RwLock<VolatileState>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct VolatileState {
    namespaces: HashMap<String, HashMap<String, Slot>>,
    /// Insertion sequence, so listings come back in insertion order
    next_seq: u64,
}

#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    entry: Entry,
}

impl VolatileState {
    fn live(&self, namespace: &str, key: &str, now: DateTime<Utc>) -> Option<&Entry> {
        self.namespaces
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .map(|slot| &slot.entry)
            .filter(|entry| !entry.is_expired_at(now))
    }

    /// Insert or replace, keeping position and `created_at` of a live entry
    fn put(&mut self, request: WriteRequest<'_>, now: DateTime<Utc>) -> Entry {
        let entries = self
            .namespaces
            .entry(request.namespace.to_string())
            .or_default();

        let (seq, created_at) = match entries.get(request.key) {
            Some(slot) if !slot.entry.is_expired_at(now) => (slot.seq, slot.entry.created_at),
            _ => {
                self.next_seq += 1;
                (self.next_seq, now)
            }
        };

        let entry = Entry {
            namespace: request.namespace.to_string(),
            key: request.key.to_string(),
            value: request.value.clone(),
            metadata: request.metadata.clone(),
            created_at,
            updated_at: now,
            expires_at: request.expires_at,
        };
        entries.insert(
            request.key.to_string(),
            Slot {
                seq,
                entry: entry.clone(),
            },
        );
        entry
    }
}

impl VolatileBackend {
    /// Create an empty backend
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(VolatileState::default()),
            clock,
        }
    }

    fn collect_live<F>(&self, namespace: &str, options: ListOptions, mut keep: F) -> Vec<Entry>
    where
        F: FnMut(&str) -> bool,
    {
        let now = self.clock.now();
        let state = self.state.read();
        let Some(entries) = state.namespaces.get(namespace) else {
            return Vec::new();
        };

        let mut live: Vec<&Slot> = entries
            .values()
            .filter(|slot| !slot.entry.is_expired_at(now) && keep(&slot.entry.key))
            .collect();
        live.sort_by_key(|slot| slot.seq);

        live.into_iter()
            .take(options.limit.unwrap_or(usize::MAX))
            .map(|slot| slot.entry.clone())
            .collect()
    }
}

impl MemoryBackend for VolatileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Volatile
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn store(&self, request: WriteRequest<'_>) -> Result<Entry> {
        let now = self.clock.now();
        let mut state = self.state.write();
        Ok(state.put(request, now))
    }

    fn update(
        &self,
        namespace: &str,
        key: &str,
        apply: &mut UpdateFn<'_>,
    ) -> Result<Option<Entry>> {
        let now = self.clock.now();
        let mut state = self.state.write();
        let current = state.live(namespace, key, now).cloned();

        match apply(current.as_ref())? {
            Some(replacement) => Ok(Some(state.put(replacement.as_request(namespace, key), now))),
            None => Ok(current),
        }
    }

    fn retrieve(&self, namespace: &str, key: &str) -> Result<Option<Entry>> {
        let now = self.clock.now();
        let state = self.state.read();
        Ok(state.live(namespace, key, now).cloned())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state.write();
        let Some(entries) = state.namespaces.get_mut(namespace) else {
            return Ok(false);
        };
        let removed = entries.remove(key);
        if entries.is_empty() {
            state.namespaces.remove(namespace);
        }
        Ok(removed.map_or(false, |slot| !slot.entry.is_expired_at(now)))
    }

    fn list(&self, namespace: &str, options: ListOptions) -> Result<Vec<Entry>> {
        Ok(self.collect_live(namespace, options, |_| true))
    }

    fn search(
        &self,
        namespace: &str,
        pattern: &KeyPattern,
        options: ListOptions,
    ) -> Result<Vec<Entry>> {
        Ok(self.collect_live(namespace, options, |key| pattern.matches(key)))
    }

    fn cleanup_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut state = self.state.write();
        let mut removed = 0;
        for entries in state.namespaces.values_mut() {
            let before = entries.len();
            entries.retain(|_, slot| !slot.entry.is_expired_at(now));
            removed += before - entries.len();
        }
        state.namespaces.retain(|_, entries| !entries.is_empty());
        Ok(removed)
    }

    fn namespaces(&self) -> Result<Vec<(String, usize)>> {
        let now = self.clock.now();
        let state = self.state.read();
        let mut counts: Vec<(String, usize)> = state
            .namespaces
            .iter()
            .map(|(ns, entries)| {
                let live = entries
                    .values()
                    .filter(|slot| !slot.entry.is_expired_at(now))
                    .count();
                (ns.clone(), live)
            })
            .filter(|(_, live)| *live > 0)
            .collect();
        counts.sort();
        Ok(counts)
    }
}
