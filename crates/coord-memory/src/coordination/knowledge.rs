//! Knowledge base, grouped by domain. Entries never expire.

use serde::{Deserialize, Serialize};

use super::{require_id, require_segment, CoordinationMemory};
use crate::entry::{Entry, KeyPattern, ListOptions, Metadata, StoreOptions};
use crate::error::Result;
use crate::namespaces::KNOWLEDGE;

/// A knowledge entry as returned by search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub domain: String,
    pub key: String,
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

fn key(domain: &str, key: &str) -> String {
    format!("knowledge:{}:{}", domain, key)
}

impl CoordinationMemory {
    pub fn store_knowledge(
        &self,
        domain: &str,
        item_key: &str,
        content: serde_json::Value,
        metadata: Metadata,
    ) -> Result<Entry> {
        require_segment("domain", domain)?;
        require_id("key", item_key)?;
        let options = StoreOptions::default().metadata(metadata).meta("domain", domain);
        self.store.store(KNOWLEDGE, &key(domain, item_key), content, options)
    }

    pub fn retrieve_knowledge(
        &self,
        domain: &str,
        item_key: &str,
    ) -> Result<Option<serde_json::Value>> {
        require_segment("domain", domain)?;
        require_id("key", item_key)?;
        Ok(self
            .store
            .retrieve(KNOWLEDGE, &key(domain, item_key))?
            .map(|entry| entry.value))
    }

    /// Items of `domain` whose key contains `query`; an empty query lists the domain
    pub fn search_knowledge(
        &self,
        domain: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<KnowledgeItem>> {
        require_segment("domain", domain)?;
        let prefix = format!("knowledge:{}:", domain);
        let pattern = KeyPattern::prefix_containing(&prefix, query);

        Ok(self
            .store
            .search_pattern(KNOWLEDGE, &pattern, ListOptions { limit })?
            .into_iter()
            .filter_map(|entry| {
                let item_key = entry.key.strip_prefix(&prefix)?.to_string();
                Some(KnowledgeItem {
                    domain: domain.to_string(),
                    key: item_key,
                    content: entry.value,
                    metadata: entry.metadata,
                })
            })
            .collect())
    }
}
