//! Short-lived coordination cache for hand-off values between callers

use std::time::Duration;

use super::{require_id, CoordinationMemory};
use crate::entry::{Entry, StoreOptions};
use crate::error::Result;
use crate::namespaces::COORDINATION;

/// TTL used when the caller does not pick one
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

fn key(cache_key: &str) -> String {
    format!("coord:{}", cache_key)
}

impl CoordinationMemory {
    pub fn cache_coordination(
        &self,
        cache_key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<Entry> {
        require_id("key", cache_key)?;
        self.store.store(
            COORDINATION,
            &key(cache_key),
            value,
            StoreOptions::with_ttl(ttl.unwrap_or(DEFAULT_CACHE_TTL)),
        )
    }

    pub fn get_cached_coordination(&self, cache_key: &str) -> Result<Option<serde_json::Value>> {
        require_id("key", cache_key)?;
        Ok(self
            .store
            .retrieve(COORDINATION, &key(cache_key))?
            .map(|entry| entry.value))
    }

    /// Drop a cached value before it expires
    pub fn invalidate_coordination(&self, cache_key: &str) -> Result<bool> {
        require_id("key", cache_key)?;
        self.store.delete(COORDINATION, &key(cache_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::test_support::memory;
    use serde_json::json;

    #[test]
    fn test_default_ttl() {
        let (clock, memory) = memory();
        memory.cache_coordination("lead", json!("agent-3"), None).unwrap();

        clock.advance(DEFAULT_CACHE_TTL - Duration::from_secs(1));
        assert_eq!(memory.get_cached_coordination("lead").unwrap(), Some(json!("agent-3")));
        clock.advance(Duration::from_secs(1));
        assert_eq!(memory.get_cached_coordination("lead").unwrap(), None);
    }

    #[test]
    fn test_custom_ttl_and_invalidate() {
        let (clock, memory) = memory();
        memory
            .cache_coordination("plan", json!({"steps": 3}), Some(Duration::from_secs(3600)))
            .unwrap();
        clock.advance(Duration::from_secs(600));
        assert!(memory.get_cached_coordination("plan").unwrap().is_some());

        assert!(memory.invalidate_coordination("plan").unwrap());
        assert!(memory.get_cached_coordination("plan").unwrap().is_none());
        assert!(!memory.invalidate_coordination("plan").unwrap());
    }
}
