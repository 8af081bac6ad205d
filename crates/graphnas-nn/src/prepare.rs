//! Per-head projection ahead of message passing.

use candle_core::{Module, Tensor};
use candle_nn::{Dropout, Linear, VarBuilder};

use crate::error::Result;
use crate::init::xavier_linear;
use crate::message::NodeState;
use crate::Mode;

/// Projects layer input to `ft` and the two score components `a1`, `a2`.
///
/// All three projections are bias-free and Xavier-normal initialized:
/// `fc: in -> out`, `attn_l: out -> attention_dim`, `attn_r: out -> attention_dim`.
#[derive(Debug, Clone)]
pub struct AttentionPrepare {
    fc: Linear,
    attn_l: Linear,
    attn_r: Linear,
    feat_drop: Option<Dropout>,
}

impl AttentionPrepare {
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        attention_dim: usize,
        feat_drop: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            fc: xavier_linear(in_dim, out_dim, vb.pp("fc"))?,
            attn_l: xavier_linear(out_dim, attention_dim, vb.pp("attn_l"))?,
            attn_r: xavier_linear(out_dim, attention_dim, vb.pp("attn_r"))?,
            feat_drop: (feat_drop > 0.0).then(|| Dropout::new(feat_drop)),
        })
    }

    /// Build the working record for `feats` `(N, in)`.
    ///
    /// `norm` `(N, 1)` is passed through untouched.
    pub fn forward(&self, feats: &Tensor, norm: Option<&Tensor>, mode: Mode) -> Result<NodeState> {
        let h = match &self.feat_drop {
            Some(drop) => drop.forward(feats, mode.is_train())?,
            None => feats.clone(),
        };
        let ft = self.fc.forward(&h)?;
        let a1 = self.attn_l.forward(&ft)?;
        let a2 = self.attn_r.forward(&ft)?;
        Ok(NodeState {
            h,
            ft,
            a1,
            a2,
            norm: norm.cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_state_shapes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let prep = AttentionPrepare::new(12, 6, 64, 0.5, vb).unwrap();

        let x = Tensor::randn(0f32, 1.0, (9, 12), &Device::Cpu).unwrap();
        let state = prep.forward(&x, None, Mode::Train).unwrap();
        assert_eq!(state.h.dims(), &[9, 12]);
        assert_eq!(state.ft.dims(), &[9, 6]);
        assert_eq!(state.a1.dims(), &[9, 64]);
        assert_eq!(state.a2.dims(), &[9, 64]);
        assert!(state.norm.is_none());
        assert_eq!(varmap.all_vars().len(), 3);
    }

    #[test]
    fn test_eval_skips_dropout() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let prep = AttentionPrepare::new(4, 2, 1, 0.9, vb).unwrap();

        let x = Tensor::randn(0f32, 1.0, (3, 4), &Device::Cpu).unwrap();
        let norm = Tensor::ones((3, 1), DType::F32, &Device::Cpu).unwrap();
        let state = prep.forward(&x, Some(&norm), Mode::Eval).unwrap();
        assert_eq!(state.h.to_vec2::<f32>().unwrap(), x.to_vec2::<f32>().unwrap());
        assert!(state.norm.is_some());
    }
}
