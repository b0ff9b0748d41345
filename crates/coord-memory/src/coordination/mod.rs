//! Coordination helpers
//!
//! Domain operations for sessions, workflows, metrics, the agent registry,
//! the knowledge base, learning records, performance statistics and the
//! coordination cache. They own no storage logic: each one maps a domain
//! concept onto a namespace, a key convention and a TTL, then calls the
//! [`MemoryStore`] facade.
//!
//! | helper       | namespace      | key                          | TTL  |
//! |--------------|----------------|------------------------------|------|
//! | session      | `sessions`     | `session:<id>`               | none |
//! | workflow     | `workflows`    | `workflow:<id>`              | none |
//! | metric       | `metrics`      | `metric:<name>:<ms>-<seq>`   | 24h  |
//! | agent        | `agents`       | `agent:<id>`                 | none |
//! | knowledge    | `knowledge`    | `knowledge:<domain>:<key>`   | none |
//! | learning     | `learning`     | `learning:<agent>:<ms>-<seq>`| 7d   |
//! | perf sample  | `performance`  | `perf:<op>:<ms>-<seq>`       | 24h  |
//! | perf stats   | `performance`  | `stats:<op>`                 | none |
//! | cache        | `coordination` | `coord:<key>`                | 300s |

pub mod agents;
pub mod cache;
pub mod knowledge;
pub mod learning;
pub mod metrics;
pub mod performance;
pub mod session;
pub mod workflow;

pub use agents::{AgentRecord, AgentStatus, HEARTBEAT_WINDOW};
pub use cache::DEFAULT_CACHE_TTL;
pub use knowledge::KnowledgeItem;
pub use learning::{LearningRecord, LEARNING_TTL};
pub use metrics::{MetricSample, METRIC_TTL};
pub use performance::{PerformanceSample, PerformanceStats, SAMPLE_TTL};
pub use session::{new_session_id, SessionRecord};
pub use workflow::{WorkflowRecord, WorkflowStatus};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::store::MemoryStore;

/// Disambiguates samples written in the same millisecond by this process
static SAMPLE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Domain front end over a shared store handle
#[derive(Debug)]
pub struct CoordinationMemory {
    store: Arc<MemoryStore>,
}

impl CoordinationMemory {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// The underlying facade
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Whether writes are landing in the volatile backend
    pub fn is_using_fallback(&self) -> bool {
        self.store.is_using_fallback()
    }

    /// `<ms>-<seq>` suffix for time-series keys
    fn sample_suffix(&self, at_ms: i64) -> String {
        let seq = SAMPLE_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", at_ms, seq)
    }
}

/// Identifiers that are embedded as whole keys
fn require_id(field: &'static str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(StoreError::validation(field, "must not be empty"));
    }
    Ok(())
}

/// Identifiers that are followed by another key segment, so a prefix search
/// over one never matches another
fn require_segment(field: &'static str, segment: &str) -> Result<()> {
    require_id(field, segment)?;
    if segment.contains(':') || segment.contains('*') {
        return Err(StoreError::validation(field, "must not contain ':' or '*'"));
    }
    Ok(())
}
