//! Architecture assembler and the model interface shared by every GNN.

use std::collections::BTreeMap;
use std::fmt;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use graphnas_core::snapshot::layer_key;
use graphnas_core::{
    ArchToken, Architecture, DeviceHint, LayerParams, ModelSnapshot, NasConfig, TaskConfig,
};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::layer::NasLayer;
use crate::task::{Metric, TaskArgs, TaskHead};
use crate::Mode;

/// Named tensors of one sub-module, relative to its `VarMap` prefix.
pub type ParamBlob = BTreeMap<String, Tensor>;

/// Parameters of a whole model, as exported by [`GraphNas::param_dict`].
pub type ParamSnapshot = ModelSnapshot<ParamBlob>;

/// A trainable graph model bound to one task context.
pub trait GnnModel {
    fn task(&self) -> TaskHead;

    /// Parameter store, handed to the optimizer.
    fn varmap(&self) -> &VarMap;

    /// Task-level prediction rows: per node, or per graph after readout.
    fn forward(&self, graph: &Graph, mode: Mode) -> Result<Tensor>;

    fn loss(&self, args: &TaskArgs<'_>) -> Result<Tensor> {
        self.task().loss(args)
    }

    fn metric(&self, args: &TaskArgs<'_>) -> Result<Metric> {
        self.task().metric(args, &|g: &Graph| self.forward(g, Mode::Eval))
    }
}

pub(crate) fn device_for(hint: DeviceHint) -> Result<Device> {
    Ok(match hint {
        DeviceHint::Cpu => Device::Cpu,
        DeviceHint::Cuda(ordinal) => Device::new_cuda(ordinal)?,
    })
}

pub(crate) fn check_dropout(p: f32) -> Result<()> {
    if (0.0..1.0).contains(&p) {
        Ok(())
    } else {
        Err(graphnas_core::Error::Configuration {
            kind: "dropout",
            value: p.to_string(),
        }
        .into())
    }
}

/// Reject model-wide settings that would build degenerate layers.
pub(crate) fn check_nas_config(config: &NasConfig) -> Result<()> {
    check_dropout(config.dropout)?;
    for (kind, value) in [("num_fc", config.num_fc), ("pooling_dim", config.pooling_dim)] {
        if value == 0 {
            return Err(graphnas_core::Error::Configuration {
                kind,
                value: value.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

fn lock_poisoned() -> Error {
    Error::Training("parameter store lock poisoned".into())
}

/// A searched GNN: one [`NasLayer`] per five encoding tokens plus a task head.
pub struct GraphNas {
    architecture: Architecture,
    task_config: TaskConfig,
    config: NasConfig,
    head: TaskHead,
    layers: Vec<NasLayer>,
    varmap: VarMap,
    device: Device,
}

impl GraphNas {
    /// Decode `tokens` and build the model.
    ///
    /// The encoding and configuration are fully validated before any
    /// parameter is allocated.
    pub fn new(tokens: &[ArchToken], task: &TaskConfig, config: &NasConfig) -> Result<Self> {
        let architecture = Architecture::decode(tokens, task.num_label)?;
        Self::from_architecture(architecture, task, config)
    }

    pub fn from_architecture(
        architecture: Architecture,
        task: &TaskConfig,
        config: &NasConfig,
    ) -> Result<Self> {
        check_nas_config(config)?;
        let device = device_for(task.device)?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let layers = architecture
            .layers()
            .iter()
            .zip(architecture.layer_dims(task.num_feat, config.residual))
            .enumerate()
            .map(|(i, (choice, dims))| NasLayer::new(choice, dims, config, vb.pp(layer_key(i))))
            .collect::<Result<Vec<_>>>()?;

        let num_params: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
        info!(
            task = %task.task_name,
            layers = layers.len(),
            num_params,
            architecture = %architecture,
            "built GraphNAS model"
        );

        Ok(Self {
            architecture,
            task_config: task.clone(),
            config: config.clone(),
            head: TaskHead::for_task(task.task_name),
            layers,
            varmap,
            device,
        })
    }

    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    pub fn layers(&self) -> &[NasLayer] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn task_config(&self) -> &TaskConfig {
        &self.task_config
    }

    pub fn config(&self) -> &NasConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Export parameters, merged into `old` per layer.
    ///
    /// A key already present in `old` is overwritten only with `update_all`.
    /// Tensors are copied, so later training does not alter the snapshot.
    pub fn param_dict(&self, old: Option<ParamSnapshot>, update_all: bool) -> Result<ParamSnapshot> {
        let mut snapshot = old.unwrap_or_default();
        let data = self.varmap.data().lock().map_err(|_| lock_poisoned())?;

        for (i, layer) in self.layers.iter().enumerate() {
            let mut params = LayerParams::new();
            for (key, group) in layer.param_groups() {
                let prefix = format!("{}.{}.", layer_key(i), group.prefix());
                let mut blob = ParamBlob::new();
                for (name, var) in data.iter() {
                    if let Some(rest) = name.strip_prefix(&prefix) {
                        blob.insert(rest.to_string(), var.as_tensor().copy()?);
                    }
                }
                if !blob.is_empty() {
                    params.insert(key, blob);
                }
            }
            snapshot.absorb_layer(i, params, update_all);
        }
        Ok(snapshot)
    }

    /// Copy every blob whose key matches one of this model's keys.
    ///
    /// Layers missing from the snapshot and keys that do not match are
    /// skipped. Every matching blob is checked against the target variables
    /// before the first write, so a failed import leaves the model unchanged.
    /// Returns the number of blobs loaded.
    pub fn load_param(&mut self, snapshot: &ParamSnapshot) -> Result<usize> {
        let data = self.varmap.data().lock().map_err(|_| lock_poisoned())?;
        let mut staged = Vec::new();
        let mut loaded = 0;

        for (i, layer) in self.layers.iter().enumerate() {
            let Some(params) = snapshot.layer(i) else {
                debug!(layer = i, "no inherited parameters for layer");
                continue;
            };
            for (key, group) in layer.param_groups() {
                let Some(blob) = params.get(&key) else {
                    debug!(layer = i, key = %key, "no inherited parameters for key");
                    continue;
                };
                for (name, value) in blob {
                    let full = format!("{}.{}.{}", layer_key(i), group.prefix(), name);
                    let var = data.get(&full).ok_or_else(|| {
                        Error::Snapshot(format!("blob {key} holds unknown parameter {name}"))
                    })?;
                    if var.dims() != value.dims() || var.dtype() != value.dtype() {
                        return Err(Error::Snapshot(format!(
                            "blob {key} parameter {name}: expected {:?} {:?}, got {:?} {:?}",
                            var.dims(),
                            var.dtype(),
                            value.dims(),
                            value.dtype()
                        )));
                    }
                    staged.push((var, value));
                }
                loaded += 1;
            }
        }

        for (var, value) in staged {
            var.set(value)?;
        }
        debug!(loaded, "loaded inherited parameters");
        Ok(loaded)
    }
}

impl GnnModel for GraphNas {
    fn task(&self) -> TaskHead {
        self.head
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn forward(&self, graph: &Graph, mode: Mode) -> Result<Tensor> {
        if graph.num_features() != self.task_config.num_feat {
            return Err(Error::InvalidGraph(format!(
                "graph has {} features, model expects {}",
                graph.num_features(),
                self.task_config.num_feat
            )));
        }
        let mut h = graph.x().clone();
        for layer in &self.layers {
            h = layer.forward(&h, graph, mode)?;
        }
        self.head.readout(&h, graph)
    }
}

impl fmt::Debug for GraphNas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNas")
            .field("architecture", &self.architecture)
            .field("task_config", &self.task_config)
            .field("config", &self.config)
            .field("head", &self.head)
            .field("layers", &self.layers)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for GraphNas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GraphNas({}) {}", self.head.kind(), self.architecture)?;
        for (i, layer) in self.layers.iter().enumerate() {
            let c = layer.choice();
            let d = layer.dims();
            writeln!(
                f,
                "  layer_{i}: {} {} {} heads={} {}->{}{}{}",
                c.attention,
                c.aggregator,
                c.activation,
                d.heads,
                d.in_channels,
                d.output_width(),
                if d.concat { " concat" } else { " mean" },
                if d.residual { " residual" } else { "" },
            )?;
        }
        Ok(())
    }
}
