//! Entry record model
//!
//! An [`Entry`] is the atomic unit of storage: a structured JSON value filed
//! under `(namespace, key)`, an optional metadata side-channel, store-assigned
//! timestamps and an optional expiry. Payloads are `serde_json::Value`, a
//! tagged sum over scalars, arrays and maps, so anything that reaches a
//! backend has already been proven serializable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Namespace used when the caller does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Longest accepted key, in bytes
pub const MAX_KEY_LEN: usize = 1024;

/// Longest accepted namespace, in bytes
pub const MAX_NAMESPACE_LEN: usize = 128;

/// Metadata attached at write time; never interpreted by the store
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub namespace: String,
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    /// An entry is logically absent once its expiry has passed
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |exp| exp <= now)
    }

    /// Decode the payload into a typed value
    pub fn value_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            StoreError::serialization(crate::error::target(&self.namespace, Some(&self.key)), e)
        })
    }

    /// Remaining lifetime relative to `now`; `None` when the entry never expires
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|exp| (exp - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Options for a `store` call
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub metadata: Metadata,
    pub ttl: Option<Duration>,
}

impl StoreOptions {
    /// Options with a time-to-live
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    /// Set the metadata map
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add a single metadata field
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the time-to-live
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Options for `list` and `search`
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Maximum number of entries; `None` returns everything
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

/// Key matching rule shared by both backends.
///
/// A pattern without `*` is a substring match. `*` matches any run of
/// characters, so `task:*` is a prefix match and `*:done` a suffix match.
/// All other characters are literal and matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    segments: Vec<String>,
    anchored_start: bool,
    anchored_end: bool,
}

impl KeyPattern {
    /// Parse a caller-supplied pattern
    pub fn parse(pattern: &str) -> Self {
        if !pattern.contains('*') {
            return Self::contains(pattern);
        }
        Self {
            segments: pattern
                .split('*')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            anchored_start: !pattern.starts_with('*'),
            anchored_end: !pattern.ends_with('*'),
        }
    }

    /// Keys containing `needle`
    pub fn contains(needle: &str) -> Self {
        Self {
            segments: non_empty(needle),
            anchored_start: false,
            anchored_end: false,
        }
    }

    /// Keys starting with `prefix`
    pub fn prefix(prefix: &str) -> Self {
        Self {
            segments: non_empty(prefix),
            anchored_start: !prefix.is_empty(),
            anchored_end: false,
        }
    }

    /// Keys starting with `prefix` that contain `needle` somewhere after it
    pub fn prefix_containing(prefix: &str, needle: &str) -> Self {
        let mut pattern = Self::prefix(prefix);
        pattern.segments.extend(non_empty(needle));
        pattern
    }

    /// Whether `key` satisfies the pattern
    pub fn matches(&self, key: &str) -> bool {
        let last = self.segments.len().saturating_sub(1);
        let mut rest = key;

        for (i, segment) in self.segments.iter().enumerate() {
            if i == 0 && self.anchored_start {
                match rest.strip_prefix(segment.as_str()) {
                    Some(tail) => rest = tail,
                    None => return false,
                }
                if i == last && self.anchored_end {
                    return rest.is_empty();
                }
                continue;
            }
            if i == last && self.anchored_end {
                return rest.ends_with(segment.as_str());
            }
            match rest.find(segment.as_str()) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
        true
    }

    /// Equivalent SQLite `GLOB` expression with metacharacters escaped
    pub fn to_sql_glob(&self) -> String {
        let mut glob = String::new();
        if !self.anchored_start || self.segments.is_empty() {
            glob.push('*');
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                glob.push('*');
            }
            for ch in segment.chars() {
                match ch {
                    '*' | '?' | '[' => {
                        glob.push('[');
                        glob.push(ch);
                        glob.push(']');
                    }
                    _ => glob.push(ch),
                }
            }
        }
        if !self.anchored_end && !glob.ends_with('*') {
            glob.push('*');
        }
        glob
    }
}

fn non_empty(s: &str) -> Vec<String> {
    if s.is_empty() {
        Vec::new()
    } else {
        vec![s.to_string()]
    }
}

/// Map an omitted (empty) namespace to [`DEFAULT_NAMESPACE`] and validate it
pub fn resolve_namespace(namespace: &str) -> Result<&str> {
    let namespace = namespace.trim();
    if namespace.is_empty() {
        return Ok(DEFAULT_NAMESPACE);
    }
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(StoreError::validation(
            "namespace",
            format!("longer than {} bytes", MAX_NAMESPACE_LEN),
        ));
    }
    if namespace.chars().any(char::is_control) {
        return Err(StoreError::validation(
            "namespace",
            "contains control characters",
        ));
    }
    Ok(namespace)
}

/// Keys must be non-empty, bounded and free of NUL bytes
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::validation("key", "must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StoreError::validation(
            "key",
            format!("longer than {} bytes", MAX_KEY_LEN),
        ));
    }
    if key.contains('\0') {
        return Err(StoreError::validation("key", "contains a NUL byte"));
    }
    Ok(())
}
