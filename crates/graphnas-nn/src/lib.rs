//! GraphNAS execution core on candle.
//!
//! Builds a trainable GNN from a flat architecture encoding and runs it on a
//! [`Graph`] for one of three task contexts.
//!
//! # Layer anatomy
//!
//! | Stage | Module | Role |
//! |-------|--------|------|
//! | Prepare | [`prepare`] | project features, compute score components `a1`/`a2` |
//! | Message | [`message`] | bucket nodes by in-degree, gather mailboxes |
//! | Reduce | [`reduce`] | score edges, softmax over neighbors, call the aggregator |
//! | Aggregate | [`aggregator`] | sum / pool / MLP / LSTM / GRU over the mailbox |
//! | Finalize | [`finalize`] | residual and activation |
//! | Merge | [`layer`] | concatenate or average the heads |
//!
//! A second model family, [`MacroGnn`], wires dense convolutions from
//! [`conv`] into a four-operation cell chosen by a link vector.
//!
//! # Example
//!
//! ```rust,ignore
//! use graphnas_core::{Encoding, NasConfig, TaskConfig, TaskKind};
//! use graphnas_nn::{GnnModel, GraphNas, Mode};
//!
//! let enc: Encoding = "[gat, sum, relu, 2, 8, gcn, mean, relu, 1, 7]".parse()?;
//! let task = TaskConfig::new(TaskKind::NodeClassification, 16, 7);
//! let model = GraphNas::new(enc.tokens(), &task, &NasConfig::default())?;
//! let logits = model.forward(&graph, Mode::Eval)?;
//! ```

pub mod activation;
pub mod aggregator;
pub mod cell;
pub mod conv;
pub mod error;
pub mod finalize;
pub mod graph;
pub mod init;
pub mod layer;
pub mod message;
pub mod model;
pub mod prepare;
pub mod qubo;
pub mod reduce;
pub mod task;
pub mod train;

pub use activation::{lookup as activation_lookup, Activation, ActivationFn};
pub use aggregator::Aggregator;
pub use cell::MacroGnn;
pub use conv::{ArmaConv, ChebConv, GatConv, GcnConv, GcnOnly, GinConv, GraphConv, SageConv};
pub use error::{Error, Result};
pub use graph::{Graph, GraphLoaders, Split, SplitMasks};
pub use layer::NasLayer;
pub use model::{GnnModel, GraphNas, ParamBlob, ParamSnapshot};
pub use reduce::Reduce;
pub use task::{Metric, SplitAccuracy, TaskArgs, TaskHead};
pub use train::{MaxCutOutcome, Trainer, TrainingReport};

/// Training or evaluation pass.
///
/// Dropout is only active and batch norm only updates its running
/// statistics in [`Mode::Train`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Train,
    #[default]
    Eval,
}

impl Mode {
    pub fn is_train(&self) -> bool {
        matches!(self, Self::Train)
    }
}
