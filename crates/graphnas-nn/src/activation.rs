//! Activation registry.
//!
//! Maps an [`ActivationType`] tag to a pure elementwise function on tensors.

use candle_core::{Module, Tensor};
use graphnas_core::ActivationType;

use crate::error::Result;

/// Elementwise activation function.
pub type ActivationFn = fn(&Tensor) -> candle_core::Result<Tensor>;

/// Negative slope used wherever the search space asks for leaky-relu.
pub const LEAKY_SLOPE: f64 = 0.01;

/// LeakyReLU: `max(x, 0) + slope * min(x, 0)`.
pub fn leaky_relu(xs: &Tensor, slope: f64) -> candle_core::Result<Tensor> {
    let pos = xs.relu()?;
    let neg = (xs.minimum(0f64)? * slope)?;
    pos + neg
}

fn identity(xs: &Tensor) -> candle_core::Result<Tensor> {
    Ok(xs.clone())
}

fn elu(xs: &Tensor) -> candle_core::Result<Tensor> {
    xs.elu(1.0)
}

fn sigmoid(xs: &Tensor) -> candle_core::Result<Tensor> {
    candle_nn::ops::sigmoid(xs)
}

fn tanh(xs: &Tensor) -> candle_core::Result<Tensor> {
    xs.tanh()
}

fn relu(xs: &Tensor) -> candle_core::Result<Tensor> {
    xs.relu()
}

fn relu6(xs: &Tensor) -> candle_core::Result<Tensor> {
    xs.clamp(0f32, 6f32)
}

// log(1 + e^x) = relu(x) + log(1 + e^{-|x|}), finite for large |x|
fn softplus(xs: &Tensor) -> candle_core::Result<Tensor> {
    let tail = ((xs.abs()?.neg()?.exp()? + 1.0)?).log()?;
    xs.relu()? + tail
}

fn default_leaky_relu(xs: &Tensor) -> candle_core::Result<Tensor> {
    leaky_relu(xs, LEAKY_SLOPE)
}

/// Function for a tag.
pub fn activation_fn(kind: ActivationType) -> ActivationFn {
    match kind {
        ActivationType::Linear => identity,
        ActivationType::Elu => elu,
        ActivationType::Sigmoid => sigmoid,
        ActivationType::Tanh => tanh,
        ActivationType::Relu => relu,
        ActivationType::Relu6 => relu6,
        ActivationType::Softplus => softplus,
        ActivationType::LeakyRelu => default_leaky_relu,
    }
}

/// Function for a symbolic name; unknown names are configuration errors.
pub fn lookup(name: &str) -> Result<ActivationFn> {
    Ok(activation_fn(name.parse()?))
}

/// An activation as a [`Module`], so it composes with candle layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    kind: ActivationType,
}

impl Activation {
    pub fn new(kind: ActivationType) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ActivationType {
        self.kind
    }
}

impl Module for Activation {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        activation_fn(self.kind)(xs)
    }
}
