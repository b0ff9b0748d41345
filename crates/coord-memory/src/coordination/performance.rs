//! Performance tracking
//!
//! Each call writes a time-stamped sample (24h TTL) and folds it into a
//! running aggregate at `stats:<operation>`. The fold is one atomic
//! read-modify-write on the store, so concurrent callers in this or any
//! other process sharing the file never lose an update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{require_segment, CoordinationMemory};
use crate::entry::{KeyPattern, ListOptions, Metadata, StoreOptions};
use crate::error::{Result, StoreError};
use crate::namespaces::PERFORMANCE;

/// Lifetime of an individual sample
pub const SAMPLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    pub operation: String,
    /// Milliseconds
    pub duration: f64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// Running aggregate; durations are milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub count: u64,
    pub success_count: u64,
    pub total_duration: f64,
    pub avg_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub success_rate: f64,
    pub last_updated: DateTime<Utc>,
}

impl PerformanceStats {
    fn first(duration: f64, success: bool, at: DateTime<Utc>) -> Self {
        let success_count = u64::from(success);
        Self {
            count: 1,
            success_count,
            total_duration: duration,
            avg_duration: duration,
            min_duration: duration,
            max_duration: duration,
            success_rate: success_count as f64,
            last_updated: at,
        }
    }

    fn fold(mut self, duration: f64, success: bool, at: DateTime<Utc>) -> Self {
        self.count += 1;
        self.success_count += u64::from(success);
        self.total_duration += duration;
        self.avg_duration = self.total_duration / self.count as f64;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.success_rate = self.success_count as f64 / self.count as f64;
        self.last_updated = at;
        self
    }
}

fn stats_key(operation: &str) -> String {
    format!("stats:{}", operation)
}

impl CoordinationMemory {
    /// Record one run of `operation` taking `duration_ms` milliseconds
    pub fn track_performance(
        &self,
        operation: &str,
        duration_ms: f64,
        success: bool,
        metadata: Metadata,
    ) -> Result<PerformanceStats> {
        require_segment("operation", operation)?;
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(StoreError::validation(
                "duration",
                "must be a finite, non-negative number of milliseconds",
            ));
        }

        let now = self.store.now();
        let suffix = self.sample_suffix(now.timestamp_millis());
        let sample_key = format!("perf:{}:{}", operation, suffix);
        let sample = PerformanceSample {
            operation: operation.to_string(),
            duration: duration_ms,
            success,
            timestamp: now,
            metadata,
        };
        self.store.store_value(
            PERFORMANCE,
            &sample_key,
            &sample,
            StoreOptions::with_ttl(SAMPLE_TTL).meta("operation", operation),
        )?;

        let stats = self.store.update_value(
            PERFORMANCE,
            &stats_key(operation),
            |prev: Option<PerformanceStats>| {
                let stats = match prev {
                    Some(prev) => prev.fold(duration_ms, success, now),
                    None => PerformanceStats::first(duration_ms, success, now),
                };
                Ok(Some((stats, StoreOptions::default().meta("operation", operation))))
            },
        )?;
        stats.ok_or_else(|| {
            StoreError::validation("operation", format!("stats for {} were not written", operation))
        })
    }

    pub fn get_performance_stats(&self, operation: &str) -> Result<Option<PerformanceStats>> {
        require_segment("operation", operation)?;
        self.store.retrieve_value(PERFORMANCE, &stats_key(operation))
    }

    /// Aggregates for every tracked operation
    pub fn all_performance_stats(&self) -> Result<BTreeMap<String, PerformanceStats>> {
        self.store
            .search_pattern(PERFORMANCE, &KeyPattern::prefix("stats:"), ListOptions::default())?
            .into_iter()
            .map(|entry| {
                let operation = entry.key.strip_prefix("stats:").unwrap_or(&entry.key);
                let operation = operation.to_string();
                entry.value_as().map(|stats| (operation, stats))
            })
            .collect()
    }

    /// Recent raw samples of `operation`, oldest first
    pub fn performance_samples(&self, operation: &str) -> Result<Vec<PerformanceSample>> {
        require_segment("operation", operation)?;
        self.store
            .search_pattern(
                PERFORMANCE,
                &KeyPattern::prefix(&format!("perf:{}:", operation)),
                ListOptions::default(),
            )?
            .into_iter()
            .map(|entry| entry.value_as())
            .collect()
    }
}
