//! Session state
//!
//! Sessions persist until explicitly ended; there is no TTL.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{require_id, CoordinationMemory};
use crate::entry::{ListOptions, StoreOptions};
use crate::error::{target, Result, StoreError};
use crate::namespaces::SESSIONS;

/// Stored session envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub state: serde_json::Value,
    pub saved_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Decode the saved state
    pub fn state_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.state.clone()).map_err(|e| {
            StoreError::serialization(target(SESSIONS, Some(&key(&self.session_id))), e)
        })
    }
}

fn key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// Fresh random session id
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl CoordinationMemory {
    /// Save (or replace) the state of a session
    pub fn save_session_state<T: Serialize + ?Sized>(
        &self,
        session_id: &str,
        state: &T,
    ) -> Result<SessionRecord> {
        require_id("session_id", session_id)?;
        let key = key(session_id);
        let record = SessionRecord {
            session_id: session_id.to_string(),
            state: serde_json::to_value(state)
                .map_err(|e| StoreError::serialization(target(SESSIONS, Some(&key)), e))?,
            saved_at: self.store.now(),
        };
        self.store.store_value(
            SESSIONS,
            &key,
            &record,
            StoreOptions::default().meta("sessionId", session_id),
        )?;
        Ok(record)
    }

    /// Load a previously saved session
    pub fn resume_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        require_id("session_id", session_id)?;
        self.store.retrieve_value(SESSIONS, &key(session_id))
    }

    /// End a session; returns whether it existed
    pub fn end_session(&self, session_id: &str) -> Result<bool> {
        require_id("session_id", session_id)?;
        self.store.delete(SESSIONS, &key(session_id))
    }

    /// Ids of all saved sessions, oldest first
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .search(SESSIONS, "session:*", ListOptions::default())?
            .into_iter()
            .filter_map(|entry| entry.key.strip_prefix("session:").map(str::to_string))
            .collect())
    }
}
