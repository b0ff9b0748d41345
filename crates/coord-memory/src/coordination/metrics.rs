//! Metric samples
//!
//! One entry per observation with a fixed 24-hour TTL. Windows are applied
//! client-side on the sample timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{require_segment, CoordinationMemory};
use crate::clock::duration_ms;
use crate::entry::{KeyPattern, ListOptions, Metadata, StoreOptions};
use crate::error::{Result, StoreError};
use crate::namespaces::METRICS;

/// Lifetime of a metric sample
pub const METRIC_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub tags: Metadata,
}

impl CoordinationMemory {
    /// Record one observation of `name`
    pub fn record_metric(&self, name: &str, value: f64, tags: Metadata) -> Result<MetricSample> {
        require_segment("name", name)?;
        if !value.is_finite() {
            return Err(StoreError::validation("value", "must be a finite number"));
        }

        let now = self.store.now();
        let key = format!("metric:{}:{}", name, self.sample_suffix(now.timestamp_millis()));
        let sample = MetricSample {
            name: name.to_string(),
            value,
            timestamp: now,
            tags,
        };
        self.store.store_value(
            METRICS,
            &key,
            &sample,
            StoreOptions::with_ttl(METRIC_TTL).meta("metric", name),
        )?;
        Ok(sample)
    }

    /// Samples of `name` recorded within the last `window`, oldest first.
    /// A window reaching past the calendar range (e.g. `Duration::MAX`)
    /// returns every retained sample.
    pub fn get_metrics(&self, name: &str, window: Duration) -> Result<Vec<MetricSample>> {
        require_segment("name", name)?;
        let since = chrono::Duration::try_milliseconds(duration_ms(window))
            .and_then(|window| self.store.now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let pattern = KeyPattern::prefix(&format!("metric:{}:", name));
        let mut samples = self
            .store
            .search_pattern(METRICS, &pattern, ListOptions::default())?
            .into_iter()
            .map(|entry| entry.value_as::<MetricSample>())
            .collect::<Result<Vec<_>>>()?;
        samples.retain(|sample| sample.timestamp >= since);
        samples.sort_by_key(|sample| sample.timestamp);
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::test_support::memory;

    #[test]
    fn test_window_and_isolation() {
        let (clock, memory) = memory();
        memory.record_metric("cpu", 10.0, Metadata::new()).unwrap();
        clock.advance(Duration::from_secs(600));
        memory.record_metric("cpu", 20.0, Metadata::new()).unwrap();
        memory.record_metric("cpu", 30.0, Metadata::new()).unwrap();
        memory.record_metric("cpu_total", 99.0, Metadata::new()).unwrap();

        let recent = memory.get_metrics("cpu", Duration::from_secs(60)).unwrap();
        assert_eq!(recent.iter().map(|s| s.value).collect::<Vec<_>>(), vec![20.0, 30.0]);

        let all = memory.get_metrics("cpu", Duration::from_secs(3600)).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].value, 10.0);
    }

    #[test]
    fn test_samples_expire_after_a_day() {
        let (clock, memory) = memory();
        memory.record_metric("latency", 1.5, Metadata::new()).unwrap();
        clock.advance(METRIC_TTL);
        assert!(memory.get_metrics("latency", METRIC_TTL * 2).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_input() {
        let (_clock, memory) = memory();
        assert!(memory.record_metric("a:b", 1.0, Metadata::new()).is_err());
        assert!(memory.record_metric("cpu", f64::INFINITY, Metadata::new()).is_err());
    }

    #[test]
    fn test_unbounded_window_returns_every_sample() {
        let (clock, memory) = memory();
        memory.record_metric("cpu", 1.0, Metadata::new()).unwrap();
        clock.advance(Duration::from_secs(3600));
        memory.record_metric("cpu", 2.0, Metadata::new()).unwrap();

        for window in [Duration::MAX, Duration::from_secs(u64::MAX)] {
            let all = memory.get_metrics("cpu", window).unwrap();
            assert_eq!(all.iter().map(|s| s.value).collect::<Vec<_>>(), vec![1.0, 2.0]);
        }
    }
}
