//! Symbolic operator choices for one NAS layer.
//!
//! Each family is a closed enum. Parsing goes through [`std::str::FromStr`] and
//! rejects unknown tags with [`Error::Configuration`], so a malformed
//! architecture never reaches parameter allocation.
//!
//! | Family | Tags |
//! |---|---|
//! | [`AttentionType`] | gat, cos, const/none, gat_sym, linear, bilinear, generalized_linear, gcn |
//! | [`AggregatorType`] | sum, mean, max, mlp, lstm, gru |
//! | [`ActivationType`] | linear, elu, sigmoid, tanh, relu, relu6, softplus, leaky_relu |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How neighbor messages are weighted before aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AttentionType {
    /// softmax(leaky_relu(a1 + a2))
    Gat,
    /// softmax(leaky_relu(a1 * a2)), used in GaAN
    Cos,
    /// Every neighbor weighted 1.
    Const,
    /// GAT with mirrored scores added (not symmetric after softmax).
    GatSym,
    /// softmax(tanh(a2)): the neighbor attends to itself.
    Linear,
    /// Same coefficients as [`AttentionType::Cos`].
    Bilinear,
    /// softmax(w . tanh(a1 + a2)), used in GeniePath
    GeneralizedLinear,
    /// Degree-normalized sum; needs a per-node `norm`.
    Gcn,
}

impl AttentionType {
    pub const ALL: [AttentionType; 8] = [
        Self::Gat,
        Self::Cos,
        Self::Const,
        Self::GatSym,
        Self::Linear,
        Self::Bilinear,
        Self::GeneralizedLinear,
        Self::Gcn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gat => "gat",
            Self::Cos => "cos",
            Self::Const => "const",
            Self::GatSym => "gat_sym",
            Self::Linear => "linear",
            Self::Bilinear => "bilinear",
            Self::GeneralizedLinear => "generalized_linear",
            Self::Gcn => "gcn",
        }
    }

    /// Width of the `a1`/`a2` score projections.
    ///
    /// Multiplicative scorers need a richer score than a single scalar.
    pub fn attention_dim(&self) -> usize {
        match self {
            Self::Cos | Self::Bilinear | Self::GeneralizedLinear => 64,
            _ => 1,
        }
    }
}

impl FromStr for AttentionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "gat" => Ok(Self::Gat),
            "cos" => Ok(Self::Cos),
            "const" | "none" => Ok(Self::Const),
            "gat_sym" => Ok(Self::GatSym),
            "linear" => Ok(Self::Linear),
            "bilinear" => Ok(Self::Bilinear),
            "generalized_linear" => Ok(Self::GeneralizedLinear),
            "gcn" => Ok(Self::Gcn),
            other => Err(Error::configuration("attention type", other)),
        }
    }
}

/// Neighbor-feature reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AggregatorType {
    Sum,
    /// Feed-forward stack per neighbor, then mean over neighbors.
    Mean,
    /// Feed-forward stack per neighbor, then max over neighbors.
    Max,
    /// Sum over neighbors, then feed-forward stack.
    Mlp,
    Lstm,
    Gru,
}

impl AggregatorType {
    pub const ALL: [AggregatorType; 6] = [
        Self::Sum,
        Self::Mean,
        Self::Max,
        Self::Mlp,
        Self::Lstm,
        Self::Gru,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Max => "max",
            Self::Mlp => "mlp",
            Self::Lstm => "lstm",
            Self::Gru => "gru",
        }
    }

    /// Whether the aggregator is built around the `num_fc`-deep feed-forward stack.
    pub fn uses_feed_forward(&self) -> bool {
        matches!(self, Self::Mean | Self::Max | Self::Mlp)
    }
}

impl FromStr for AggregatorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "sum" => Ok(Self::Sum),
            "mean" => Ok(Self::Mean),
            "max" => Ok(Self::Max),
            "mlp" => Ok(Self::Mlp),
            "lstm" => Ok(Self::Lstm),
            "gru" => Ok(Self::Gru),
            other => Err(Error::configuration("aggregator type", other)),
        }
    }
}

/// Elementwise activation applied by a layer's finalize step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActivationType {
    Linear,
    Elu,
    Sigmoid,
    Tanh,
    Relu,
    Relu6,
    Softplus,
    LeakyRelu,
}

impl ActivationType {
    pub const ALL: [ActivationType; 8] = [
        Self::Linear,
        Self::Elu,
        Self::Sigmoid,
        Self::Tanh,
        Self::Relu,
        Self::Relu6,
        Self::Softplus,
        Self::LeakyRelu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Elu => "elu",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::Relu => "relu",
            Self::Relu6 => "relu6",
            Self::Softplus => "softplus",
            Self::LeakyRelu => "leaky_relu",
        }
    }
}

impl FromStr for ActivationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "linear" => Ok(Self::Linear),
            "elu" => Ok(Self::Elu),
            "sigmoid" => Ok(Self::Sigmoid),
            "tanh" => Ok(Self::Tanh),
            "relu" => Ok(Self::Relu),
            "relu6" => Ok(Self::Relu6),
            "softplus" => Ok(Self::Softplus),
            "leaky_relu" => Ok(Self::LeakyRelu),
            other => Err(Error::configuration("activation", other)),
        }
    }
}

macro_rules! string_conversions {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $ty {
            type Error = Error;

            fn try_from(value: String) -> Result<Self> {
                value.parse()
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> String {
                value.as_str().to_string()
            }
        }
    )*};
}

string_conversions!(AttentionType, AggregatorType, ActivationType);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_roundtrip_through_display() {
        for t in AttentionType::ALL {
            assert_eq!(t.to_string().parse::<AttentionType>().unwrap(), t);
        }
        for t in AggregatorType::ALL {
            assert_eq!(t.to_string().parse::<AggregatorType>().unwrap(), t);
        }
        for t in ActivationType::ALL {
            assert_eq!(t.to_string().parse::<ActivationType>().unwrap(), t);
        }
    }

    #[test]
    fn test_none_is_const_alias() {
        assert_eq!("none".parse::<AttentionType>().unwrap(), AttentionType::Const);
    }

    #[test]
    fn test_unknown_tags_name_the_offender() {
        let err = "attn".parse::<AttentionType>().unwrap_err();
        assert!(err.to_string().contains("attention type"));
        assert!(err.to_string().contains("attn"));

        let err = "median".parse::<AggregatorType>().unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration { kind: "aggregator type", ref value } if value == "median"
        ));

        assert!("swish".parse::<ActivationType>().is_err());
    }

    #[test]
    fn test_attention_dim() {
        assert_eq!(AttentionType::Gat.attention_dim(), 1);
        assert_eq!(AttentionType::Cos.attention_dim(), 64);
        assert_eq!(AttentionType::Bilinear.attention_dim(), 64);
        assert_eq!(AttentionType::GeneralizedLinear.attention_dim(), 64);
        assert_eq!(AttentionType::Gcn.attention_dim(), 1);
    }

    #[test]
    fn test_serde_uses_tags() {
        let json = serde_json::to_string(&AggregatorType::Lstm).unwrap();
        assert_eq!(json, "\"lstm\"");
        let back: ActivationType = serde_json::from_str("\"relu6\"").unwrap();
        assert_eq!(back, ActivationType::Relu6);
        assert!(serde_json::from_str::<ActivationType>("\"gelu\"").is_err());
    }
}
