//! Agent registry
//!
//! Liveness is derived at read time and never stored: an agent is active when
//! its status is live and its last heartbeat is within [`HEARTBEAT_WINDOW`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::{require_id, CoordinationMemory};
use crate::clock::duration_ms;
use crate::entry::{Entry, ListOptions, Metadata, StoreOptions};
use crate::error::{Result, StoreError};
use crate::namespaces::AGENTS;

/// How recent a heartbeat must be for an agent to count as active
pub const HEARTBEAT_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Busy,
    Idle,
    #[default]
    Offline,
    Terminated,
}

impl AgentStatus {
    /// Statuses of an agent that is still working a session
    pub fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Busy | Self::Idle)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Busy => "busy",
            Self::Idle => "idle",
            Self::Offline => "offline",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Registry record. Every field has a default so records written by other
/// callers with only some fields still decode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentRecord {
    pub agent_id: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    pub registered_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl AgentRecord {
    /// Live status and a heartbeat inside the window ending at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::milliseconds(duration_ms(HEARTBEAT_WINDOW));
        self.status.is_live()
            && self
                .last_heartbeat
                .map_or(false, |beat| now - beat <= window)
    }
}

fn key(agent_id: &str) -> String {
    format!("agent:{}", agent_id)
}

impl CoordinationMemory {
    /// Register (or re-register) an agent as active
    pub fn register_agent(
        &self,
        agent_id: &str,
        agent_type: &str,
        capabilities: Vec<String>,
    ) -> Result<AgentRecord> {
        require_id("agent_id", agent_id)?;
        let now = self.store.now();
        let record = AgentRecord {
            agent_id: agent_id.to_string(),
            agent_type: agent_type.to_string(),
            status: AgentStatus::Active,
            capabilities,
            metadata: Metadata::new(),
            registered_at: Some(now),
            last_heartbeat: Some(now),
        };
        self.put_agent(&record)?;
        Ok(record)
    }

    /// Set an agent's status; also counts as a heartbeat.
    ///
    /// Unknown agents are created with just an id and the new status.
    pub fn update_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<AgentRecord> {
        require_id("agent_id", agent_id)?;
        let now = self.store.now();
        let record = self
            .store
            .update_value(AGENTS, &key(agent_id), |current: Option<AgentRecord>| {
                let mut record = current.unwrap_or_else(|| AgentRecord {
                    registered_at: Some(now),
                    ..AgentRecord::default()
                });
                record.agent_id = agent_id.to_string();
                record.status = status;
                record.last_heartbeat = Some(now);
                Ok(Some((record, agent_options(agent_id))))
            })?;
        record.ok_or_else(|| {
            StoreError::validation("agent_id", format!("agent {} was not written", agent_id))
        })
    }

    /// Refresh an agent's heartbeat; `None` if it was never registered.
    ///
    /// The status is left as stored, even when a status change races the
    /// heartbeat.
    pub fn heartbeat(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        require_id("agent_id", agent_id)?;
        let now = self.store.now();
        self.store
            .update_value(AGENTS, &key(agent_id), |current: Option<AgentRecord>| {
                Ok(current.map(|mut record| {
                    record.agent_id = agent_id.to_string();
                    record.last_heartbeat = Some(now);
                    (record, agent_options(agent_id))
                }))
            })
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        require_id("agent_id", agent_id)?;
        self.store
            .retrieve(AGENTS, &key(agent_id))?
            .map(|entry| decode_agent(&entry))
            .transpose()
    }

    /// Every registered agent, in registration order
    pub fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        self.store
            .search(AGENTS, "agent:*", ListOptions::default())?
            .iter()
            .map(decode_agent)
            .collect()
    }

    /// Agents with a live status and a recent heartbeat, evaluated now
    pub fn get_active_agents(&self) -> Result<Vec<AgentRecord>> {
        let now = self.store.now();
        Ok(self
            .list_agents()?
            .into_iter()
            .filter(|agent| agent.is_active_at(now))
            .collect())
    }

    fn put_agent(&self, record: &AgentRecord) -> Result<Entry> {
        self.store
            .store_value(AGENTS, &key(&record.agent_id), record, agent_options(&record.agent_id))
    }
}

fn agent_options(agent_id: &str) -> StoreOptions {
    StoreOptions::default().meta("agentId", agent_id)
}

/// Decode a record, filling the id from the key when the payload omits it
fn decode_agent(entry: &Entry) -> Result<AgentRecord> {
    let mut record: AgentRecord = entry.value_as()?;
    if record.agent_id.is_empty() {
        record.agent_id = entry
            .key
            .strip_prefix("agent:")
            .unwrap_or(&entry.key)
            .to_string();
    }
    Ok(record)
}
