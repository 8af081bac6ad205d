//! Error types for graphnas-nn.

use graphnas_core::TaskKind;
use thiserror::Error;

/// GraphNAS execution error.
#[derive(Debug, Error)]
pub enum Error {
    /// Architecture or configuration rejected before any parameters exist.
    #[error(transparent)]
    Core(#[from] graphnas_core::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// A reduce strategy or task head needs a field the graph does not carry.
    #[error("wrong data: missing field `{field}`")]
    MissingField { field: &'static str },

    /// `loss` / `metric` called without the arguments the task context needs.
    #[error("missing argument(s) for {task}: {}", .fields.join(", "))]
    MissingArgument {
        task: TaskKind,
        fields: Vec<&'static str>,
    },

    /// Graph handle is inconsistent (edges out of range, overlapping masks, ...).
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// Snapshot blob does not fit the model it is loaded into.
    #[error("snapshot mismatch: {0}")]
    Snapshot(String),

    /// Training error.
    #[error("training error: {0}")]
    Training(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
