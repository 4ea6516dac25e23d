//! Error types for the threat map core.

use thiserror::Error;
use threatmap_env::EnvError;

/// Errors surfaced by the core.
///
/// Malformed feed entries and icon failures never show up here: those are
/// counted or replaced by fallbacks and rendering continues.
#[derive(Debug, Error)]
pub enum MapError {
    /// Border GeoJSON could not be interpreted
    #[error("Border parse error: {0}")]
    BorderParse(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend or transport failure
    #[error(transparent)]
    Env(#[from] EnvError),
}

impl MapError {
    pub fn border(msg: impl Into<String>) -> Self {
        Self::BorderParse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_error_passthrough() {
        let err: MapError = EnvError::Timeout(10_000).into();
        assert_eq!(err.to_string(), "Timeout after 10000ms");
    }
}
