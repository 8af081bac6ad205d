//! Mailbox aggregators.
//!
//! Every aggregator reduces a mailbox `(batch, degree, dim)` to `(batch, dim)`.
//!
//! | Tag | Reduction |
//! |-----|-----------|
//! | `sum` | sum over degree |
//! | `max` | feed-forward stack, then max over degree |
//! | `mean` | feed-forward stack, then mean over degree |
//! | `mlp` | sum over degree, then feed-forward stack |
//! | `lstm` / `gru` | recurrent unit over the degree axis, last hidden state, linear back to `dim` |

use candle_core::{Module, Tensor};
use candle_nn::rnn::{gru, lstm, GRUConfig, LSTMConfig, GRU, LSTM, RNN};
use candle_nn::{linear, Linear, VarBuilder};
use graphnas_core::AggregatorType;

use crate::activation::{leaky_relu, LEAKY_SLOPE};
use crate::error::{Error, Result};

/// Linear layers with bias, each followed by leaky-relu.
///
/// The first `num_fc - 1` layers map to `pooling_dim`, the last back to `dim`.
#[derive(Debug, Clone)]
pub struct FeedForward {
    layers: Vec<Linear>,
}

impl FeedForward {
    pub fn new(dim: usize, pooling_dim: usize, num_fc: usize, vb: VarBuilder) -> Result<Self> {
        let mut layers = Vec::with_capacity(num_fc);
        for i in 0..num_fc {
            let in_dim = if i == 0 { dim } else { pooling_dim };
            let out_dim = if i + 1 == num_fc { dim } else { pooling_dim };
            layers.push(linear(in_dim, out_dim, vb.pp(format!("fc.{i}")))?);
        }
        Ok(Self { layers })
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

impl Module for FeedForward {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = xs.clone();
        for layer in &self.layers {
            h = leaky_relu(&layer.forward(&h)?, LEAKY_SLOPE)?;
        }
        Ok(h)
    }
}

/// A mailbox reduction.
#[derive(Debug, Clone)]
pub enum Aggregator {
    Sum,
    MaxPool(FeedForward),
    MeanPool(FeedForward),
    Mlp(FeedForward),
    Lstm { rnn: LSTM, proj: Linear },
    Gru { rnn: GRU, proj: Linear },
}

impl Aggregator {
    /// Build the aggregator for `kind` over features of width `dim`.
    pub fn new(
        kind: AggregatorType,
        dim: usize,
        pooling_dim: usize,
        num_fc: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(match kind {
            AggregatorType::Sum => Self::Sum,
            AggregatorType::Max => Self::MaxPool(FeedForward::new(dim, pooling_dim, num_fc, vb)?),
            AggregatorType::Mean => Self::MeanPool(FeedForward::new(dim, pooling_dim, num_fc, vb)?),
            AggregatorType::Mlp => Self::Mlp(FeedForward::new(dim, pooling_dim, num_fc, vb)?),
            AggregatorType::Lstm => Self::Lstm {
                rnn: lstm(dim, pooling_dim, LSTMConfig::default_no_bias(), vb.pp("rnn"))?,
                proj: linear(pooling_dim, dim, vb.pp("proj"))?,
            },
            AggregatorType::Gru => Self::Gru {
                rnn: gru(dim, pooling_dim, GRUConfig::default_no_bias(), vb.pp("rnn"))?,
                proj: linear(pooling_dim, dim, vb.pp("proj"))?,
            },
        })
    }

    /// Build from a symbolic tag; unknown tags are configuration errors.
    pub fn from_name(
        name: &str,
        dim: usize,
        pooling_dim: usize,
        num_fc: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        Self::new(name.parse()?, dim, pooling_dim, num_fc, vb)
    }

    pub fn kind(&self) -> AggregatorType {
        match self {
            Self::Sum => AggregatorType::Sum,
            Self::MaxPool(_) => AggregatorType::Max,
            Self::MeanPool(_) => AggregatorType::Mean,
            Self::Mlp(_) => AggregatorType::Mlp,
            Self::Lstm { .. } => AggregatorType::Lstm,
            Self::Gru { .. } => AggregatorType::Gru,
        }
    }

    /// Reduce `(batch, degree, dim)` to `(batch, dim)`.
    pub fn aggregate(&self, neighbour: &Tensor) -> Result<Tensor> {
        let (_, degree, _) = neighbour.dims3().map_err(|_| {
            Error::InvalidGraph(format!(
                "mailbox must be (batch, degree, dim), got {:?}",
                neighbour.dims()
            ))
        })?;
        if degree == 0 {
            return Err(Error::InvalidGraph("mailbox with zero degree".into()));
        }
        let out = match self {
            Self::Sum => neighbour.sum(1)?,
            Self::MaxPool(ff) => ff.forward(neighbour)?.max(1)?,
            Self::MeanPool(ff) => ff.forward(neighbour)?.mean(1)?,
            Self::Mlp(ff) => ff.forward(&neighbour.sum(1)?)?,
            Self::Lstm { rnn, proj } => {
                let states = rnn.seq(&neighbour.contiguous()?)?;
                match states.last() {
                    Some(state) => proj.forward(state.h())?,
                    None => return Err(Error::InvalidGraph("empty recurrent sequence".into())),
                }
            }
            Self::Gru { rnn, proj } => {
                let states = rnn.seq(&neighbour.contiguous()?)?;
                match states.last() {
                    Some(state) => proj.forward(state.h())?,
                    None => return Err(Error::InvalidGraph("empty recurrent sequence".into())),
                }
            }
        };
        Ok(out)
    }

    /// Whether this aggregator registers any parameters.
    pub fn has_parameters(&self) -> bool {
        !matches!(self, Self::Sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn mailbox(batch: usize, degree: usize, dim: usize) -> Tensor {
        Tensor::randn(0f32, 1.0, (batch, degree, dim), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_all_aggregators_shape() {
        let device = Device::Cpu;
        for kind in AggregatorType::ALL {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let agg = Aggregator::new(kind, 8, 16, 2, vb).unwrap();
            let out = agg.aggregate(&mailbox(5, 3, 8)).unwrap();
            assert_eq!(out.dims(), &[5, 8], "aggregator {kind}");
            assert_eq!(agg.kind(), kind);
        }
    }

    #[test]
    fn test_sum_values() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let agg = Aggregator::new(AggregatorType::Sum, 2, 4, 1, vb).unwrap();

        let mb = Tensor::new(&[[[1f32, 2.], [3., 4.]]], &Device::Cpu).unwrap();
        let out = agg.aggregate(&mb).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out, vec![vec![4.0, 6.0]]);
        assert!(varmap.all_vars().is_empty());
    }

    #[test]
    fn test_feed_forward_widths() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let ff = FeedForward::new(8, 32, 3, vb).unwrap();
        assert_eq!(ff.depth(), 3);

        let data = varmap.data().lock().unwrap();
        assert_eq!(data["fc.0.weight"].dims(), &[32, 8]);
        assert_eq!(data["fc.1.weight"].dims(), &[32, 32]);
        assert_eq!(data["fc.2.weight"].dims(), &[8, 32]);
        assert_eq!(data["fc.2.bias"].dims(), &[8]);
    }

    #[test]
    fn test_recurrent_has_no_rnn_bias() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Aggregator::new(AggregatorType::Lstm, 4, 6, 1, vb).unwrap();

        let data = varmap.data().lock().unwrap();
        assert!(data.keys().filter(|k| k.starts_with("rnn.")).all(|k| !k.contains("bias")));
        assert!(data.contains_key("proj.bias"));
    }

    #[test]
    fn test_unknown_aggregator() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let err = Aggregator::from_name("median", 4, 4, 1, vb).unwrap_err();
        assert!(err.to_string().contains("median"));
    }
}
