//! Unified error handling for the cluster-cli crate
//!
//! Every operation reports through a single [`Error`] enum. Precondition
//! failures (missing master, ambiguous address, conflicting topology,
//! unknown services) are local and never retried; only transport errors and
//! wait timeouts are worth trying again.
//!
//! A declined confirmation is not an error, see
//! [`crate::cluster::Outcome::Aborted`].

use std::time::Duration;
use thiserror::Error;

pub use crate::consul::error::ConsulError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A mandatory input is missing (e.g. master of a new service)
    Configuration,
    /// Several store keys match one address
    Ambiguity,
    /// The requested assignment or target is not acceptable
    Conflict,
    /// A service expected in the store is absent
    NotFound,
    /// A fired event was not observed in time
    Timeout,
    /// Store content or agent response could not be decoded
    Decode,
    /// Talking to the agent failed
    Transport,
}

impl ErrorCategory {
    /// Short label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Ambiguity => "ambiguity",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::Decode => "decode",
            Self::Transport => "transport",
        }
    }
}

/// Unified error type for the cluster-cli crate
#[derive(Error, Debug)]
pub enum Error {
    /// Missing mandatory input
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// More than one key matches the searched prefix
    #[error("Ambiguous address '{prefix}', matching keys: {}", keys.join(", "))]
    Ambiguous { prefix: String, keys: Vec<String> },

    /// Invalid topology, unknown node or forbidden target
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Service not found in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Completion predicate not satisfied within the wait budget
    #[error("Event {event_id} not completed after {}s", timeout.as_secs())]
    Timeout { event_id: String, timeout: Duration },

    /// Stored record could not be decoded
    #[error("Invalid record at '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Consul transport errors
    #[error("Consul error: {0}")]
    Consul(#[from] ConsulError),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Ambiguous { .. } => ErrorCategory::Ambiguity,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Decode { .. } | Self::Json(_) => ErrorCategory::Decode,
            Self::Consul(ConsulError::Decode(_)) => ErrorCategory::Decode,
            Self::Consul(_) => ErrorCategory::Transport,
        }
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Consul(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
