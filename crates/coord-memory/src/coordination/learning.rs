//! Learning records per agent, kept for a week and read newest first

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{require_segment, CoordinationMemory};
use crate::entry::{KeyPattern, ListOptions, Metadata, StoreOptions};
use crate::error::Result;
use crate::namespaces::LEARNING;

/// Lifetime of a learning record
pub const LEARNING_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningRecord {
    pub agent_id: String,
    pub learning: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub context: Metadata,
}

impl CoordinationMemory {
    pub fn record_learning(
        &self,
        agent_id: &str,
        learning: serde_json::Value,
        context: Metadata,
    ) -> Result<LearningRecord> {
        require_segment("agent_id", agent_id)?;
        let now = self.store.now();
        let key = format!("learning:{}:{}", agent_id, self.sample_suffix(now.timestamp_millis()));
        let record = LearningRecord {
            agent_id: agent_id.to_string(),
            learning,
            recorded_at: now,
            context,
        };
        self.store.store_value(
            LEARNING,
            &key,
            &record,
            StoreOptions::with_ttl(LEARNING_TTL).meta("agentId", agent_id),
        )?;
        Ok(record)
    }

    /// Most recent learnings of `agent_id`, newest first
    pub fn get_learnings(
        &self,
        agent_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<LearningRecord>> {
        require_segment("agent_id", agent_id)?;
        let pattern = KeyPattern::prefix(&format!("learning:{}:", agent_id));
        let mut records = self
            .store
            .search_pattern(LEARNING, &pattern, ListOptions::default())?
            .into_iter()
            .map(|entry| entry.value_as::<LearningRecord>())
            .collect::<Result<Vec<_>>>()?;

        // Insertion order reversed, then by timestamp for writers in other processes
        records.reverse();
        records.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        records.truncate(limit.unwrap_or(usize::MAX));
        Ok(records)
    }
}
