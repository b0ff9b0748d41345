//! Backend health state
//!
//! Created when the facade initializes, mutated only by the facade, read by
//! callers that want to adapt (e.g. treat writes as best-effort once data no
//! longer survives a crash). Process-local; never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::BackendKind;

/// Which backend the facade is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Persistent backend
    Primary,
    /// Volatile backend, for the rest of the process lifetime
    Fallback,
}

/// Why the facade is running on the volatile backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    /// Configured to run in memory only
    Disabled,
    /// The persistent backend could not be initialized
    UnavailableAtInit { message: String },
    /// The persistent backend failed fatally while serving a request
    FailedAtRuntime { operation: String, message: String },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "persistent backend disabled by configuration"),
            Self::UnavailableAtInit { message } => {
                write!(f, "persistent backend unavailable at init: {}", message)
            }
            Self::FailedAtRuntime { operation, message } => {
                write!(f, "persistent backend failed during {}: {}", operation, message)
            }
        }
    }
}

/// Snapshot of the facade's binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub mode: BackendMode,
    pub backend: BackendKind,
    pub reason: Option<FallbackReason>,
    /// When the current mode was entered
    pub since: DateTime<Utc>,
}

impl BackendHealth {
    pub(crate) fn primary(backend: BackendKind, since: DateTime<Utc>) -> Self {
        Self {
            mode: BackendMode::Primary,
            backend,
            reason: None,
            since,
        }
    }

    pub(crate) fn fallback(
        backend: BackendKind,
        reason: FallbackReason,
        since: DateTime<Utc>,
    ) -> Self {
        Self {
            mode: BackendMode::Fallback,
            backend,
            reason: Some(reason),
            since,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.mode == BackendMode::Fallback
    }
}
