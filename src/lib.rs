//! `graphnas` builds, trains and evaluates GNN candidates proposed by an
//! architecture search loop.
//!
//! The workspace is split in two:
//!
//! - [`graphnas_core`]: encodings, operator tags, configuration and snapshot
//!   keys, free of any tensor library
//! - [`graphnas_nn`]: candle models, message passing, task heads and training
//!
//! Most callers only need the [`prelude`].
//!
//! ```rust,ignore
//! use graphnas::prelude::*;
//!
//! let run = RunConfig::from_json_file("run.json")?;
//! let enc: Encoding = "[gat, sum, relu, 2, 8, gcn, mean, relu, 1, 7]".parse()?;
//! let model = GraphNas::new(enc.tokens(), &run.task, &run.model)?;
//! let report = Trainer::new(run.train).fit_node_classification(&model, &graph)?;
//! println!("{:?}", report.metric.to_map());
//! ```

pub use graphnas_core;
pub use graphnas_nn;

pub mod prelude {
    pub use graphnas_core::{
        best_link, merge_params, ActivationType, AggregatorType, ArchToken, Architecture,
        AttentionType, DeviceHint, Encoding, LayerChoice, LayerDims, MacroArchitecture,
        MacroConfig, MacroOp, ModelSnapshot, NasConfig, RunConfig, TaskConfig, TaskKind,
        TrainConfig,
    };
    pub use graphnas_nn::{
        Error, GcnOnly, GnnModel, Graph, GraphLoaders, GraphNas, MacroGnn, MaxCutOutcome, Metric,
        Mode,
        ParamSnapshot, Result, Split, SplitAccuracy, SplitMasks, TaskArgs, TaskHead, Trainer,
        TrainingReport,
    };
}
