//! Run configuration.
//!
//! Everything the search loop hands to the execution core besides the
//! architecture itself: which task is being solved, model-wide toggles, and the
//! training schedule. All structs deserialize from JSON and fill missing
//! fields from their defaults.
//!
//! ```rust,ignore
//! let config = RunConfig::from_json_str(r#"{
//!     "task": { "task_name": "NodeClassification", "num_feat": 1433, "num_label": 7 },
//!     "train": { "epochs": 300 }
//! }"#)?;
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The task a model instance is built for. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    NodeClassification,
    GraphClassification,
    #[serde(rename = "CO_problem")]
    CoProblem,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeClassification => "NodeClassification",
            Self::GraphClassification => "GraphClassification",
            Self::CoProblem => "CO_problem",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "NodeClassification" => Ok(Self::NodeClassification),
            "GraphClassification" => Ok(Self::GraphClassification),
            "CO_problem" => Ok(Self::CoProblem),
            other => Err(Error::configuration("task", other)),
        }
    }
}

/// Placement hint for parameters and activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceHint {
    #[default]
    Cpu,
    Cuda(usize),
}

/// What the task looks like from the model's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task_name: TaskKind,
    /// Input feature dimension.
    pub num_feat: usize,
    /// Label cardinality; the last layer must emit this many channels.
    pub num_label: usize,
    #[serde(default)]
    pub device: DeviceHint,
}

impl TaskConfig {
    pub fn new(task_name: TaskKind, num_feat: usize, num_label: usize) -> Self {
        Self {
            task_name,
            num_feat,
            num_label,
            device: DeviceHint::Cpu,
        }
    }

    pub fn with_device(mut self, device: DeviceHint) -> Self {
        self.device = device;
        self
    }
}

/// Model-wide toggles shared by every layer of a GraphNAS model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NasConfig {
    /// Dropout on layer inputs and attention weights (default: 0.6).
    pub dropout: f32,
    /// Batch-normalize each layer's input (default: true).
    pub batch_normal: bool,
    /// Residual connections on layers after the first (default: true).
    pub residual: bool,
    /// Hidden width of pooling and recurrent aggregators (default: 128).
    pub pooling_dim: usize,
    /// Depth of the pooling aggregators' feed-forward stack (default: 1).
    pub num_fc: usize,
}

impl Default for NasConfig {
    fn default() -> Self {
        Self {
            dropout: 0.6,
            batch_normal: true,
            residual: true,
            pooling_dim: 128,
            num_fc: 1,
        }
    }
}

impl NasConfig {
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_batch_normal(mut self, batch_normal: bool) -> Self {
        self.batch_normal = batch_normal;
        self
    }

    pub fn with_residual(mut self, residual: bool) -> Self {
        self.residual = residual;
        self
    }

    pub fn with_pooling_dim(mut self, pooling_dim: usize) -> Self {
        self.pooling_dim = pooling_dim;
        self
    }

    pub fn with_num_fc(mut self, num_fc: usize) -> Self {
        self.num_fc = num_fc;
        self
    }
}

/// Settings for cell-style models built from a
/// [`MacroArchitecture`](crate::macro_arch::MacroArchitecture).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroConfig {
    /// Width of every intermediate state (default: 64).
    pub hidden_dim: usize,
    /// Dropout before the preprocessor and after each operation (default: 0.5).
    pub dropout: f32,
}

impl Default for MacroConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 64,
            dropout: 0.5,
        }
    }
}

impl MacroConfig {
    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }
}

/// Training schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Number of epochs (default: 200).
    pub epochs: usize,
    /// Learning rate (default: 0.005).
    pub learning_rate: f64,
    /// Weight decay (default: 5e-4).
    pub weight_decay: f64,
    /// Epochs without improvement before stopping (None = run all epochs).
    pub early_stopping: Option<usize>,
    /// Loss change below which an epoch counts as "no improvement" for
    /// combinatorial tasks (default: 1e-4).
    pub tolerance: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.005,
            weight_decay: 5e-4,
            early_stopping: Some(100),
            tolerance: 1e-4,
        }
    }
}

impl TrainConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_early_stopping(mut self, patience: Option<usize>) -> Self {
        self.early_stopping = patience;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// Everything needed to build and train one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub task: TaskConfig,
    #[serde(default)]
    pub model: NasConfig,
    #[serde(default)]
    pub train: TrainConfig,
    /// Used only when the candidate is a cell architecture.
    #[serde(default, rename = "macro")]
    pub macro_model: MacroConfig,
}

impl RunConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }
}
