//! Per-head output combiner: `act(accum + residual)`.

use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use graphnas_core::ActivationType;

use crate::activation::Activation;
use crate::error::Result;
use crate::init::xavier_linear;

#[derive(Debug, Clone)]
enum Residual {
    None,
    Identity,
    Projected(Linear),
}

#[derive(Debug, Clone)]
pub struct Finalize {
    activation: Activation,
    residual: Residual,
}

impl Finalize {
    /// A residual layer adds `h` as is when `in_dim == out_dim`, and a
    /// bias-free Xavier projection of `h` otherwise.
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        activation: ActivationType,
        residual: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let residual = match (residual, in_dim == out_dim) {
            (false, _) => Residual::None,
            (true, true) => Residual::Identity,
            (true, false) => Residual::Projected(xavier_linear(in_dim, out_dim, vb.pp("residual_fc"))?),
        };
        Ok(Self {
            activation: Activation::new(activation),
            residual,
        })
    }

    pub fn forward(&self, accum: &Tensor, h: &Tensor) -> Result<Tensor> {
        let ret = match &self.residual {
            Residual::None => accum.clone(),
            Residual::Identity => (accum + h)?,
            Residual::Projected(fc) => (accum + fc.forward(h)?)?,
        };
        Ok(self.activation.forward(&ret)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn vb(varmap: &VarMap) -> VarBuilder<'_> {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    #[test]
    fn test_identity_residual() {
        let varmap = VarMap::new();
        let fin = Finalize::new(2, 2, ActivationType::Linear, true, vb(&varmap)).unwrap();
        let accum = Tensor::new(&[[1f32, 2.]], &Device::Cpu).unwrap();
        let h = Tensor::new(&[[10f32, 20.]], &Device::Cpu).unwrap();
        let out = fin.forward(&accum, &h).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out, vec![vec![11.0, 22.0]]);
        assert!(varmap.all_vars().is_empty());
    }

    #[test]
    fn test_projected_residual() {
        let varmap = VarMap::new();
        let fin = Finalize::new(4, 2, ActivationType::Relu, true, vb(&varmap)).unwrap();
        let accum = Tensor::zeros((3, 2), DType::F32, &Device::Cpu).unwrap();
        let h = Tensor::ones((3, 4), DType::F32, &Device::Cpu).unwrap();
        let out = fin.forward(&accum, &h).unwrap();
        assert_eq!(out.dims(), &[3, 2]);
        assert_eq!(varmap.all_vars().len(), 1);
    }

    #[test]
    fn test_no_residual() {
        let varmap = VarMap::new();
        let fin = Finalize::new(4, 2, ActivationType::Relu, false, vb(&varmap)).unwrap();
        let accum = Tensor::new(&[[-1f32, 3.]], &Device::Cpu).unwrap();
        let h = Tensor::ones((1, 4), DType::F32, &Device::Cpu).unwrap();
        let out = fin.forward(&accum, &h).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out, vec![vec![0.0, 3.0]]);
    }
}
