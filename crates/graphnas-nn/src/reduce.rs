//! Attention / reduce strategies.
//!
//! A reduce strategy turns one degree bucket's mailbox into accumulated node
//! features. Most strategies score each incoming edge, softmax the scores over
//! the neighbor axis, weight the neighbor features, and hand the weighted
//! mailbox to their [`Aggregator`].
//!
//! | Tag | Edge coefficient before softmax |
//! |-----|---------------------------------|
//! | `gat` | `leaky_relu(sum(a1 + a2))` |
//! | `const` / `none` | 1, no softmax |
//! | `gcn` | `norm_dst * norm_src`, no softmax |
//! | `linear` | `tanh(sum(a2))` |
//! | `gat_sym` | `leaky_relu(sum((a1 + a2) + b) + b)`, `b = b1 + b2` |
//! | `cos` / `bilinear` | `leaky_relu(sum(a1 * a2))` |
//! | `generalized_linear` | `w . tanh(a1 + a2)` |
//!
//! `a1` is always the receiving node's score and `a2` the sender's, so the
//! coefficient of edge `j -> i` depends on both endpoints.

use candle_core::{Module, Tensor, D};
use candle_nn::{linear_no_bias, ops, Dropout, Linear, VarBuilder};
use graphnas_core::AttentionType;

use crate::activation::{leaky_relu, LEAKY_SLOPE};
use crate::aggregator::Aggregator;
use crate::error::{Error, Result};
use crate::message::{Mailbox, NodeBatch};
use crate::Mode;

#[derive(Debug, Clone)]
enum Scorer {
    Gat,
    Const,
    Gcn,
    Linear,
    GatSymmetric,
    Cosine,
    GeneralizedLinear(Linear),
}

/// Edge scoring plus the aggregator it feeds.
#[derive(Debug, Clone)]
pub struct Reduce {
    attention: AttentionType,
    scorer: Scorer,
    attn_drop: Option<Dropout>,
    aggregator: Aggregator,
}

impl Reduce {
    /// Build the strategy for `attention`, taking ownership of `aggregator`.
    ///
    /// `attn_drop` of zero disables attention dropout.
    pub fn new(
        attention: AttentionType,
        attn_drop: f32,
        aggregator: Aggregator,
        vb: VarBuilder,
    ) -> Result<Self> {
        let scorer = match attention {
            AttentionType::Gat => Scorer::Gat,
            AttentionType::Const => Scorer::Const,
            AttentionType::Gcn => Scorer::Gcn,
            AttentionType::Linear => Scorer::Linear,
            AttentionType::GatSym => Scorer::GatSymmetric,
            AttentionType::Cos | AttentionType::Bilinear => Scorer::Cosine,
            AttentionType::GeneralizedLinear => Scorer::GeneralizedLinear(linear_no_bias(
                attention.attention_dim(),
                1,
                vb.pp("generalized_linear"),
            )?),
        };
        Ok(Self {
            attention,
            scorer,
            attn_drop: (attn_drop > 0.0).then(|| Dropout::new(attn_drop)),
            aggregator,
        })
    }

    pub fn attention(&self) -> AttentionType {
        self.attention
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Whether the scorer itself registers parameters.
    pub fn has_parameters(&self) -> bool {
        matches!(self.scorer, Scorer::GeneralizedLinear(_))
    }

    fn dropout(&self, xs: &Tensor, mode: Mode) -> Result<Tensor> {
        match &self.attn_drop {
            Some(drop) => Ok(drop.forward(xs, mode.is_train())?),
            None => Ok(xs.clone()),
        }
    }

    /// Softmax-normalized edge weights `(B, deg, 1)`, or `None` for
    /// strategies that do not weight edges.
    fn edge_weights(&self, nodes: &NodeBatch, mailbox: &Mailbox) -> Result<Option<Tensor>> {
        let a1 = nodes.a1.unsqueeze(1)?;
        let score = match &self.scorer {
            Scorer::Const | Scorer::Gcn => return Ok(None),
            Scorer::Gat => {
                let a = mailbox.a2.broadcast_add(&a1)?.sum_keepdim(D::Minus1)?;
                leaky_relu(&a, LEAKY_SLOPE)?
            }
            Scorer::Linear => mailbox.a2.sum_keepdim(D::Minus1)?.tanh()?,
            Scorer::GatSymmetric => {
                let b1 = nodes.a2.unsqueeze(1)?;
                let a = mailbox.a2.broadcast_add(&a1)?;
                let b = mailbox.a1.broadcast_add(&b1)?;
                // b enters twice: once inside the sum and once after it
                let a = (a + &b)?.sum_keepdim(D::Minus1)?;
                leaky_relu(&a.broadcast_add(&b)?, LEAKY_SLOPE)?
            }
            Scorer::Cosine => {
                let a = mailbox.a2.broadcast_mul(&a1)?.sum_keepdim(D::Minus1)?;
                leaky_relu(&a, LEAKY_SLOPE)?
            }
            Scorer::GeneralizedLinear(w) => {
                let a = mailbox.a2.broadcast_add(&a1)?.tanh()?;
                w.forward(&a)?
            }
        };
        Ok(Some(ops::softmax(&score, 1)?))
    }

    /// Reduce one degree bucket to `(B, out)`.
    pub fn reduce(&self, nodes: &NodeBatch, mailbox: &Mailbox, mode: Mode) -> Result<Tensor> {
        let weighted = match &self.scorer {
            Scorer::Const => self.dropout(&mailbox.ft, mode)?,
            Scorer::Gcn => {
                let self_norm = nodes.norm.as_ref().ok_or(Error::MissingField { field: "norm" })?;
                let neighbour = mailbox.norm.as_ref().ok_or(Error::MissingField { field: "norm" })?;
                neighbour.broadcast_mul(&self_norm.unsqueeze(1)?)?
            }
            _ => match self.edge_weights(nodes, mailbox)? {
                Some(e) => {
                    let e = self.dropout(&e, mode)?;
                    mailbox.ft.broadcast_mul(&e)?
                }
                None => mailbox.ft.clone(),
            },
        };
        self.aggregator.aggregate(&weighted)
    }

    /// Edge weights for inspection, `(B, deg)`; `None` for `const` and `gcn`.
    pub fn attention_weights(&self, nodes: &NodeBatch, mailbox: &Mailbox) -> Result<Option<Tensor>> {
        match self.edge_weights(nodes, mailbox)? {
            Some(e) => Ok(Some(e.squeeze(D::Minus1)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use graphnas_core::AggregatorType;

    const B: usize = 3;
    const DEG: usize = 4;
    const OUT: usize = 5;

    fn batch(attention_dim: usize, with_norm: bool) -> (NodeBatch, Mailbox) {
        let dev = Device::Cpu;
        let r = |shape: &[usize]| Tensor::randn(0f32, 1.0, shape, &dev).unwrap();
        let norm = with_norm.then(|| Tensor::ones((B, 1), DType::F32, &dev).unwrap());
        let nodes = NodeBatch {
            a1: r(&[B, attention_dim]),
            a2: r(&[B, attention_dim]),
            norm,
        };
        let mailbox = Mailbox {
            ft: r(&[B, DEG, OUT]),
            a1: r(&[B, DEG, attention_dim]),
            a2: r(&[B, DEG, attention_dim]),
            norm: with_norm.then(|| r(&[B, DEG, OUT])),
        };
        (nodes, mailbox)
    }

    fn build(attention: AttentionType, varmap: &VarMap) -> Reduce {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        let agg = Aggregator::new(AggregatorType::Sum, OUT, 8, 1, vb.pp("agg")).unwrap();
        Reduce::new(attention, 0.6, agg, vb.pp("red")).unwrap()
    }

    #[test]
    fn test_every_strategy_shape() {
        for attention in AttentionType::ALL {
            let varmap = VarMap::new();
            let reduce = build(attention, &varmap);
            let (nodes, mailbox) = batch(attention.attention_dim(), true);
            for mode in [Mode::Train, Mode::Eval] {
                let out = reduce.reduce(&nodes, &mailbox, mode).unwrap();
                assert_eq!(out.dims(), &[B, OUT], "attention {attention}");
            }
        }
    }

    #[test]
    fn test_softmax_weights_sum_to_one() {
        for attention in AttentionType::ALL {
            let varmap = VarMap::new();
            let reduce = build(attention, &varmap);
            let (nodes, mailbox) = batch(attention.attention_dim(), true);
            let Some(w) = reduce.attention_weights(&nodes, &mailbox).unwrap() else {
                assert!(matches!(attention, AttentionType::Const | AttentionType::Gcn));
                continue;
            };
            for row in w.sum(1).unwrap().to_vec1::<f32>().unwrap() {
                assert!((row - 1.0).abs() < 1e-5, "attention {attention}: {row}");
            }
        }
    }

    #[test]
    fn test_gcn_requires_norm() {
        let varmap = VarMap::new();
        let reduce = build(AttentionType::Gcn, &varmap);
        let (nodes, mailbox) = batch(1, false);
        let err = reduce.reduce(&nodes, &mailbox, Mode::Eval).unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "norm" }));
    }

    #[test]
    fn test_eval_is_deterministic() {
        let varmap = VarMap::new();
        let reduce = build(AttentionType::Gat, &varmap);
        let (nodes, mailbox) = batch(1, false);
        let a = reduce.reduce(&nodes, &mailbox, Mode::Eval).unwrap();
        let b = reduce.reduce(&nodes, &mailbox, Mode::Eval).unwrap();
        let diff = (a - b).unwrap().abs().unwrap().sum_all().unwrap();
        assert_eq!(diff.to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn test_only_generalized_linear_has_weights() {
        for attention in AttentionType::ALL {
            let varmap = VarMap::new();
            let reduce = build(attention, &varmap);
            let expected = attention == AttentionType::GeneralizedLinear;
            assert_eq!(reduce.has_parameters(), expected);
            assert_eq!(!varmap.all_vars().is_empty(), expected);
        }
    }
}
