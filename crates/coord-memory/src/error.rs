//! Error types for the coordination memory store
//!
//! All failures surface as a single [`StoreError`]. The variants follow the
//! store's failure classes: validation and serialization problems are the
//! caller's to fix, lock timeouts are transient and retried by the facade,
//! and fatal backend errors trigger the permanent switch to the volatile
//! backend. "Not found" is never an error; lookups return `Option`.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Main error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed key, namespace, value or domain input. Never retried.
    #[error("Validation error on {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Transient write-lock contention on the persistent backend.
    #[error("Lock timeout during {operation} on {target}: {message}")]
    LockTimeout {
        operation: &'static str,
        target: String,
        message: String,
    },

    /// Unrecoverable persistent backend failure (corruption, I/O).
    #[error("Backend failure during {operation} on {target}: {message}")]
    BackendFatal {
        operation: &'static str,
        target: String,
        message: String,
    },

    /// A value or metadata payload could not be encoded or decoded.
    #[error("Serialization error on {target}: {source}")]
    Serialization {
        target: String,
        #[source]
        source: serde_json::Error,
    },

    /// A caller-imposed deadline elapsed before the backend answered.
    #[error("Operation {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The blocking worker running an operation was cancelled
    #[error("Operation {operation} was interrupted: {message}")]
    Interrupted {
        operation: &'static str,
        message: String,
    },

    /// Invalid configuration file or environment override
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO errors outside the backends (config files, backups)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Build a validation error for `field`
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Build a serialization error for `target`
    pub fn serialization(target: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            target: target.into(),
            source,
        }
    }

    /// Only lock contention is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Fatal errors demote the facade to the volatile backend
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BackendFatal { .. })
    }

    /// Errors the caller caused through bad input
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Serialization { .. })
    }
}

/// Render the `namespace[/key]` target carried by backend errors
pub(crate) fn target(namespace: &str, key: Option<&str>) -> String {
    match key {
        Some(key) => format!("{}/{}", namespace, key),
        None => namespace.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let busy = StoreError::LockTimeout {
            operation: "store",
            target: target("agents", Some("agent:1")),
            message: "database is locked".to_string(),
        };
        assert!(busy.is_retryable());
        assert!(!busy.is_fatal());
        assert!(busy.to_string().contains("agents/agent:1"));

        let fatal = StoreError::BackendFatal {
            operation: "list",
            target: target("metrics", None),
            message: "file is not a database".to_string(),
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_retryable());

        let bad = StoreError::validation("key", "must not be empty");
        assert!(bad.is_input_error());
        assert!(bad.to_string().contains("key"));
    }
}
