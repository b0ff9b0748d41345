//! Well-known namespaces
//!
//! Each caller family gets its own namespace so structurally similar keys
//! never collide.

pub use crate::entry::DEFAULT_NAMESPACE as DEFAULT;

pub const SESSIONS: &str = "sessions";
pub const WORKFLOWS: &str = "workflows";
pub const METRICS: &str = "metrics";
pub const AGENTS: &str = "agents";
pub const KNOWLEDGE: &str = "knowledge";
pub const LEARNING: &str = "learning";
pub const PERFORMANCE: &str = "performance";
pub const COORDINATION: &str = "coordination";

/// Namespaces always included in a full export
pub const EXPORTED: [&str; 9] = [
    DEFAULT,
    SESSIONS,
    WORKFLOWS,
    METRICS,
    AGENTS,
    KNOWLEDGE,
    LEARNING,
    PERFORMANCE,
    COORDINATION,
];
