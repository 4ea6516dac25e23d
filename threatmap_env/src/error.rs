//! Error types for the environment abstraction.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the backend or loading assets.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Transport failed (DNS, connection reset, TLS, ...)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Backend answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The requested resource does not exist (icon, asset)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Push stream or channel closed
    #[error("Stream closed")]
    Closed,

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates a decode error.
    pub fn decode(msg: impl std::fmt::Display) -> Self {
        Self::DecodeError(msg.to_string())
    }

    /// Returns true if retrying later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkError(_) | Self::Timeout(_) | Self::Closed => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::DecodeError(_) | Self::NotFound(_) => false,
        }
    }

    /// Maps a reqwest failure; `timeout` is the limit the request ran with.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return Self::Timeout(timeout.as_millis() as u64);
        }
        if let Some(status) = err.status() {
            return Self::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        if err.is_decode() {
            return Self::DecodeError(err.to_string());
        }
        Self::NetworkError(err.to_string())
    }
}
