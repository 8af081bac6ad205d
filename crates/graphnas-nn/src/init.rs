//! Parameter initialization.

use candle_nn::{Init, Linear, VarBuilder};

/// Gain applied to every Xavier-initialized projection.
pub const XAVIER_GAIN: f64 = 1.414;

/// Bias-free linear layer with Xavier-normal weights.
///
/// `std = gain * sqrt(2 / (fan_in + fan_out))`, registered as `weight`.
pub fn xavier_linear(
    in_dim: usize,
    out_dim: usize,
    vb: VarBuilder,
) -> candle_core::Result<Linear> {
    let stdev = XAVIER_GAIN * (2.0 / (in_dim + out_dim) as f64).sqrt();
    let weight = vb.get_with_hints((out_dim, in_dim), "weight", Init::Randn { mean: 0.0, stdev })?;
    Ok(Linear::new(weight, None))
}
