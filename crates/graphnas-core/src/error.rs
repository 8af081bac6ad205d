//! Error types for graphnas-core.

use thiserror::Error;

/// Errors raised while decoding architectures or loading configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// Unrecognized symbolic choice (activation, aggregator, attention type, task).
    #[error("unknown {kind}: {value:?}")]
    Configuration { kind: &'static str, value: String },

    /// Architecture encoding is malformed.
    #[error("wrong input: {0}")]
    Structural(String),

    /// Config file could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn configuration(kind: &'static str, value: impl Into<String>) -> Self {
        Self::Configuration {
            kind,
            value: value.into(),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
