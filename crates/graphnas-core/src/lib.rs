//! Tensor-free building blocks for GraphNAS.
//!
//! The search loop proposes architectures as flat token lists; this crate
//! turns them into validated, typed layer choices and carries the rest of the
//! run description. It has no tensor dependency, so orchestration code can
//! validate candidates without pulling in a numeric backend.
//!
//! # Modules
//!
//! - [`ops`]: closed enums for attention, aggregator and activation choices
//! - [`arch`]: encoding decode/validation and per-layer dimensions
//! - [`macro_arch`]: the cell search space of linked operations
//! - [`config`]: task, model and training configuration
//! - [`snapshot`]: composite parameter keys and merge-by-key semantics
//!
//! # Example
//!
//! ```rust
//! use graphnas_core::arch::{Architecture, Encoding};
//!
//! let enc: Encoding = "[gat, sum, relu, 2, 8, gcn, mean, relu, 1, 7]".parse().unwrap();
//! let arch = Architecture::decode(enc.tokens(), 7).unwrap();
//! let dims = arch.layer_dims(16, true);
//! assert_eq!(dims[0].output_width(), 16);
//! assert_eq!(dims[1].output_width(), 7);
//! ```

pub mod arch;
pub mod config;
pub mod error;
pub mod macro_arch;
pub mod ops;
pub mod snapshot;

pub use arch::{
    ArchToken, Architecture, Encoding, LayerChoice, LayerDims, MAX_LAYER_WIDTH, STATE_NUM,
};
pub use config::{
    DeviceHint, MacroConfig, NasConfig, RunConfig, TaskConfig, TaskKind, TrainConfig,
};
pub use error::{Error, Result};
pub use macro_arch::{best_link, MacroArchitecture, MacroOp, LINKS, MACRO_OPS};
pub use ops::{ActivationType, AggregatorType, AttentionType};
pub use snapshot::{merge_params, LayerKeys, LayerParams, ModelSnapshot};
