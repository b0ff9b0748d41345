//! Workflow tracking
//!
//! ```text
//!   pending ──► running ──► completed
//!                   └─────► failed
//! ```
//!
//! Terminal states never transition further. Progress is the latest value
//! reported by the caller; monotonicity is not enforced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{require_id, CoordinationMemory};
use crate::entry::StoreOptions;
use crate::error::{Result, StoreError};
use crate::namespaces::WORKFLOWS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a workflow in `self` may be updated to `next`
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Running) | (Running, Completed) | (Running, Failed)
            )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    /// Percentage in `0..=100`
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub data: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn key(workflow_id: &str) -> String {
    format!("workflow:{}", workflow_id)
}

fn check_progress(progress: f64) -> Result<f64> {
    if !progress.is_finite() || !(0.0..=100.0).contains(&progress) {
        return Err(StoreError::validation(
            "progress",
            format!("{} is not a percentage", progress),
        ));
    }
    Ok(progress)
}

/// Next state of a workflow, or why the update is not allowed
fn advance(
    workflow_id: &str,
    prev: Option<WorkflowRecord>,
    status: WorkflowStatus,
    progress: Option<f64>,
    data: Option<serde_json::Value>,
    now: DateTime<Utc>,
) -> Result<WorkflowRecord> {
    let Some(prev) = prev else {
        if status.is_terminal() {
            return Err(StoreError::validation(
                "status",
                format!("workflow {} must start as pending or running", workflow_id),
            ));
        }
        return Ok(WorkflowRecord {
            workflow_id: workflow_id.to_string(),
            status,
            progress: progress.unwrap_or(0.0),
            data: data.unwrap_or(serde_json::Value::Null),
            started_at: now,
            updated_at: now,
            completed_at: None,
        });
    };

    if !prev.status.can_transition_to(status) {
        return Err(StoreError::validation(
            "status",
            format!(
                "workflow {} cannot move from {} to {}",
                workflow_id, prev.status, status
            ),
        ));
    }
    let completed_at = match prev.completed_at {
        Some(at) => Some(at),
        None if status.is_terminal() => Some(now),
        None => None,
    };
    Ok(WorkflowRecord {
        status,
        progress: progress.unwrap_or(prev.progress),
        data: data.unwrap_or(prev.data),
        updated_at: now,
        completed_at,
        ..prev
    })
}

impl CoordinationMemory {
    /// Create or advance a workflow.
    ///
    /// A new workflow may start as `pending` or `running`. `progress` and
    /// `data` keep their previous values when `None`. The transition check
    /// and the write happen atomically, so concurrent updates cannot move a
    /// workflow out of a terminal state.
    pub fn track_workflow(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        progress: Option<f64>,
        data: Option<serde_json::Value>,
    ) -> Result<WorkflowRecord> {
        require_id("workflow_id", workflow_id)?;
        let progress = progress.map(check_progress).transpose()?;
        let now = self.store.now();

        let record = self.store.update_value(WORKFLOWS, &key(workflow_id), |prev| {
            let record = advance(workflow_id, prev, status, progress, data.clone(), now)?;
            let options = StoreOptions::default().meta("status", status.to_string());
            Ok(Some((record, options)))
        })?;
        record.ok_or_else(|| {
            let reason = format!("workflow {} was not written", workflow_id);
            StoreError::validation("workflow_id", reason)
        })
    }

    pub fn get_workflow_status(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        require_id("workflow_id", workflow_id)?;
        self.store.retrieve_value(WORKFLOWS, &key(workflow_id))
    }
}
