//! Error types for the Consul transport
//!
//! These cover the round trip to the agent only. Decisions taken on top of
//! the returned data report through [`crate::error::Error`].

use thiserror::Error;

/// Errors that can occur while talking to the Consul HTTP API
#[derive(Error, Debug)]
pub enum ConsulError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status code returned by the agent
    #[error("Consul returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid agent URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ConsulError {
    /// Whether retrying the same request may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::InvalidUrl(_) => false,
        }
    }
}
