//! One searched layer: optional batch norm, `heads` independent pipelines,
//! and a concat or average merge.
//!
//! ```text
//!            ┌─ prepare ─ propagate(reduce) ─ finalize ─┐
//! x ── bn ───┼─ prepare ─ propagate(reduce) ─ finalize ─┼── concat | mean
//!            └─ ...                                      ┘
//! ```
//!
//! Parameters live under `layer_{i}.{prp|agg|red|fnl}.{head}` and
//! `layer_{i}.bn` in the model's `VarMap`.

use candle_core::{ModuleT, Tensor};
use candle_nn::{batch_norm, BatchNorm, BatchNormConfig, VarBuilder};
use graphnas_core::{LayerChoice, LayerDims, LayerKeys, NasConfig};
use rayon::prelude::*;

use crate::aggregator::Aggregator;
use crate::error::Result;
use crate::finalize::Finalize;
use crate::graph::Graph;
use crate::message::propagate;
use crate::prepare::AttentionPrepare;
use crate::reduce::Reduce;
use crate::Mode;

const BN_MOMENTUM: f64 = 0.5;
const BN_EPS: f64 = 1e-5;

/// Sub-module groups of a layer, as registered in the `VarMap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamGroup {
    Prepare,
    Aggregator,
    Reduce,
    Finalize,
    BatchNorm,
}

impl ParamGroup {
    /// Path segment under `layer_{i}`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Prepare => "prp",
            Self::Aggregator => "agg",
            Self::Reduce => "red",
            Self::Finalize => "fnl",
            Self::BatchNorm => "bn",
        }
    }
}

#[derive(Debug, Clone)]
struct Head {
    prepare: AttentionPrepare,
    reduce: Reduce,
    finalize: Finalize,
}

impl Head {
    fn forward(&self, x: &Tensor, graph: &Graph, mode: Mode) -> Result<Tensor> {
        let state = self.prepare.forward(x, graph.norm(), mode)?;
        let accum = propagate(graph.message_index(), &state, &self.reduce, mode)?;
        self.finalize.forward(&accum, &state.h)
    }
}

#[derive(Debug, Clone)]
pub struct NasLayer {
    choice: LayerChoice,
    dims: LayerDims,
    pooling_dim: usize,
    num_fc: usize,
    heads: Vec<Head>,
    bn: BatchNorm,
    batch_normal: bool,
}

impl NasLayer {
    /// Build one layer; `vb` should already be scoped to `layer_{i}`.
    pub fn new(
        choice: &LayerChoice,
        dims: LayerDims,
        config: &NasConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let attention_dim = choice.attention.attention_dim();
        let heads = (0..dims.heads)
            .map(|h| {
                let aggregator = Aggregator::new(
                    choice.aggregator,
                    dims.out_channels,
                    config.pooling_dim,
                    config.num_fc,
                    vb.pp(ParamGroup::Aggregator.prefix()).pp(h),
                )?;
                Ok(Head {
                    prepare: AttentionPrepare::new(
                        dims.in_channels,
                        dims.out_channels,
                        attention_dim,
                        config.dropout,
                        vb.pp(ParamGroup::Prepare.prefix()).pp(h),
                    )?,
                    reduce: Reduce::new(
                        choice.attention,
                        config.dropout,
                        aggregator,
                        vb.pp(ParamGroup::Reduce.prefix()).pp(h),
                    )?,
                    finalize: Finalize::new(
                        dims.in_channels,
                        dims.out_channels,
                        choice.activation,
                        dims.residual,
                        vb.pp(ParamGroup::Finalize.prefix()).pp(h),
                    )?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let bn = batch_norm(
            dims.in_channels,
            BatchNormConfig {
                eps: BN_EPS,
                remove_mean: true,
                affine: true,
                momentum: BN_MOMENTUM,
            },
            vb.pp(ParamGroup::BatchNorm.prefix()),
        )?;

        Ok(Self {
            choice: *choice,
            dims,
            pooling_dim: config.pooling_dim,
            num_fc: config.num_fc,
            heads,
            bn,
            batch_normal: config.batch_normal,
        })
    }

    pub fn choice(&self) -> &LayerChoice {
        &self.choice
    }

    pub fn dims(&self) -> &LayerDims {
        &self.dims
    }

    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    pub fn keys(&self) -> LayerKeys {
        LayerKeys::new(
            &self.dims,
            self.choice.attention,
            self.choice.aggregator,
            self.pooling_dim,
            self.num_fc,
        )
    }

    /// Snapshot key and `VarMap` group of every sub-module that owns weights.
    pub fn param_groups(&self) -> Vec<(String, ParamGroup)> {
        let keys = self.keys();
        let mut groups = vec![(keys.prepare(), ParamGroup::Prepare)];
        if self.choice.aggregator != graphnas_core::AggregatorType::Sum {
            groups.push((keys.aggregator(), ParamGroup::Aggregator));
        }
        if self.heads.iter().any(|h| h.reduce.has_parameters()) {
            groups.push((keys.reduce(), ParamGroup::Reduce));
        }
        if self.dims.residual && self.dims.in_channels != self.dims.out_channels {
            groups.push((keys.finalize(), ParamGroup::Finalize));
        }
        groups.push((keys.batch_norm(), ParamGroup::BatchNorm));
        groups
    }

    /// `(N, in)` to `(N, heads * out)` when concatenating, `(N, out)` otherwise.
    pub fn forward(&self, x: &Tensor, graph: &Graph, mode: Mode) -> Result<Tensor> {
        let x = if self.batch_normal {
            self.bn.forward_t(x, mode.is_train())?
        } else {
            x.clone()
        };

        let outputs = self
            .heads
            .par_iter()
            .map(|head| head.forward(&x, graph, mode))
            .collect::<Result<Vec<_>>>()?;

        if self.dims.concat {
            Ok(Tensor::cat(&outputs, 1)?)
        } else {
            Ok(Tensor::stack(&outputs, 1)?.mean(1)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use graphnas_core::{ActivationType, AggregatorType, AttentionType};

    fn ring(n: usize, f: usize) -> Graph {
        let x = Tensor::randn(0f32, 1.0, (n, f), &Device::Cpu).unwrap();
        let edges = (0..n).flat_map(|i| [(i, (i + 1) % n), ((i + 1) % n, i)]).collect();
        Graph::new(x, edges).unwrap().with_gcn_norm().unwrap()
    }

    fn choice(attention: AttentionType, aggregator: AggregatorType, heads: usize, out: usize) -> LayerChoice {
        LayerChoice {
            attention,
            aggregator,
            activation: ActivationType::Elu,
            heads,
            out_channels: out,
        }
    }

    fn dims(in_channels: usize, c: &LayerChoice, concat: bool, residual: bool) -> LayerDims {
        LayerDims {
            in_channels,
            out_channels: c.out_channels,
            heads: c.heads,
            concat,
            residual,
        }
    }

    #[test]
    fn test_concat_and_average_widths() {
        let graph = ring(6, 10);
        let c = choice(AttentionType::Gat, AggregatorType::Sum, 3, 4);
        for (concat, width) in [(true, 12), (false, 4)] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            let layer = NasLayer::new(&c, dims(10, &c, concat, true), &NasConfig::default(), vb).unwrap();
            let out = layer.forward(graph.x(), &graph, Mode::Train).unwrap();
            assert_eq!(out.dims(), &[6, width]);
        }
    }

    #[test]
    fn test_var_paths() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let c = choice(AttentionType::GeneralizedLinear, AggregatorType::Mean, 2, 4);
        NasLayer::new(&c, dims(8, &c, true, true), &NasConfig::default(), vb.pp("layer_1")).unwrap();

        let data = varmap.data().lock().unwrap();
        for name in [
            "layer_1.prp.0.fc.weight",
            "layer_1.prp.1.attn_l.weight",
            "layer_1.agg.1.fc.0.weight",
            "layer_1.red.0.generalized_linear.weight",
            "layer_1.fnl.0.residual_fc.weight",
            "layer_1.bn.running_mean",
        ] {
            assert!(data.contains_key(name), "missing {name}");
        }
    }

    #[test]
    fn test_param_groups_follow_weights() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let c = choice(AttentionType::Gat, AggregatorType::Sum, 1, 4);
        let layer = NasLayer::new(&c, dims(4, &c, false, true), &NasConfig::default(), vb).unwrap();

        let groups: Vec<_> = layer.param_groups().into_iter().map(|(_, g)| g).collect();
        assert_eq!(groups, vec![ParamGroup::Prepare, ParamGroup::BatchNorm]);
        assert_eq!(layer.param_groups()[0].0, "4_4_1_gat_1_prp");
    }

    #[test]
    fn test_isolated_nodes_get_activation_of_zero() {
        // no edges, no residual, linear activation: every head accumulates zero
        let x = Tensor::randn(0f32, 1.0, (3, 5), &Device::Cpu).unwrap();
        let graph = Graph::new(x, vec![]).unwrap();
        let mut c = choice(AttentionType::Gat, AggregatorType::Max, 2, 3);
        c.activation = ActivationType::Linear;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = NasLayer::new(&c, dims(5, &c, true, false), &NasConfig::default(), vb).unwrap();
        let out = layer.forward(graph.x(), &graph, Mode::Eval).unwrap();
        let total = out.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(total, 0.0);
    }
}
