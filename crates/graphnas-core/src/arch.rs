//! Architecture encodings.
//!
//! A GraphNAS architecture is a flat token list, five tokens per layer:
//!
//! ```text
//! [attention, aggregator, activation, heads, out_channels, attention, ...]
//!  └──────────────────── layer 0 ────────────────────┘ └── layer 1 ...
//! ```
//!
//! Decoding checks, in order:
//!
//! 1. the token count is a multiple of [`STATE_NUM`] ("unmatchable input");
//! 2. every symbol and number of every layer parses, and `heads * out_channels`
//!    stays within [`MAX_LAYER_WIDTH`];
//! 3. the last layer's `out_channels` equals the label count ("wrong structure").
//!
//! Layer widths follow from the encoding: layer 0 reads `num_feat` features,
//! layer `i > 0` reads `heads * out_channels` of layer `i - 1`. Every layer but
//! the last concatenates its heads; the last one averages them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ops::{ActivationType, AggregatorType, AttentionType};

/// Number of tokens describing one layer.
pub const STATE_NUM: usize = 5;

/// Upper bound on `heads * out_channels` for any layer.
pub const MAX_LAYER_WIDTH: usize = 1 << 16;

/// One token of an architecture encoding.
///
/// Encodings arrive as mixed lists (`["gat", "sum", "relu", 2, 8]`), so a token
/// is either an integer or a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArchToken {
    Int(usize),
    Op(String),
}

impl ArchToken {
    fn as_symbol(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Op(s) => s.trim().to_string(),
        }
    }

    fn as_count(&self, position: usize, field: &str) -> Result<usize> {
        let value = match self {
            Self::Int(v) => Some(*v),
            Self::Op(s) => s.trim().parse::<usize>().ok(),
        };
        match value {
            Some(v) if v > 0 => Ok(v),
            _ => Err(Error::Structural(format!(
                "token {position} ({field}) must be a positive integer, got {self}"
            ))),
        }
    }
}

impl fmt::Display for ArchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Op(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ArchToken {
    fn from(s: &str) -> Self {
        match s.trim().parse::<usize>() {
            Ok(v) => Self::Int(v),
            Err(_) => Self::Op(s.trim().to_string()),
        }
    }
}

impl From<usize> for ArchToken {
    fn from(v: usize) -> Self {
        Self::Int(v)
    }
}

/// A raw token list, as produced by the search loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding(pub Vec<ArchToken>);

impl Encoding {
    pub fn tokens(&self) -> &[ArchToken] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Into<ArchToken>> FromIterator<T> for Encoding {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Parses `"[gat, sum, relu, 2, 8]"` or `"gat,sum,relu,2,8"`.
///
/// Quotes around tokens are stripped. This does not validate the encoding;
/// see [`Architecture::decode`].
impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let body = s.trim();
        let body = body.strip_prefix('[').unwrap_or(body);
        let body = body.strip_suffix(']').unwrap_or(body);
        Ok(body
            .split(',')
            .map(|t| t.trim().trim_matches(|c| c == '\'' || c == '"'))
            .filter(|t| !t.is_empty())
            .collect())
    }
}

/// The decoded operator choice for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerChoice {
    pub attention: AttentionType,
    pub aggregator: AggregatorType,
    pub activation: ActivationType,
    pub heads: usize,
    pub out_channels: usize,
}

impl LayerChoice {
    fn decode(tokens: &[ArchToken], offset: usize) -> Result<Self> {
        let choice = Self {
            attention: tokens[0].as_symbol().parse()?,
            aggregator: tokens[1].as_symbol().parse()?,
            activation: tokens[2].as_symbol().parse()?,
            heads: tokens[3].as_count(offset + 3, "head_count")?,
            out_channels: tokens[4].as_count(offset + 4, "output_channels")?,
        };
        match choice.heads.checked_mul(choice.out_channels) {
            Some(width) if width <= MAX_LAYER_WIDTH => Ok(choice),
            _ => Err(Error::Structural(format!(
                "layer at token {offset}: {} heads x {} channels exceeds the width limit of {MAX_LAYER_WIDTH}",
                choice.heads, choice.out_channels
            ))),
        }
    }

    /// Width of this layer's output when heads are concatenated.
    ///
    /// Bounded by [`MAX_LAYER_WIDTH`] for decoded layers.
    pub fn concat_width(&self) -> usize {
        self.heads * self.out_channels
    }
}

/// Shape and wiring of one layer, derived from the architecture and the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerDims {
    pub in_channels: usize,
    pub out_channels: usize,
    pub heads: usize,
    /// Concatenate heads (true) or average them (false).
    pub concat: bool,
    /// Residual connection from the layer input.
    pub residual: bool,
}

impl LayerDims {
    /// Width of the merged layer output.
    pub fn output_width(&self) -> usize {
        if self.concat {
            self.heads * self.out_channels
        } else {
            self.out_channels
        }
    }
}

/// A validated architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Architecture {
    layers: Vec<LayerChoice>,
}

impl Architecture {
    /// Decode and validate a token list against the task's label count.
    pub fn decode(tokens: &[ArchToken], num_label: usize) -> Result<Self> {
        if tokens.len() % STATE_NUM != 0 {
            return Err(Error::Structural(format!(
                "unmatchable input: {} tokens is not a multiple of {STATE_NUM}",
                tokens.len()
            )));
        }
        if tokens.is_empty() {
            return Err(Error::Structural("empty architecture".into()));
        }

        let layers = tokens
            .chunks(STATE_NUM)
            .enumerate()
            .map(|(i, chunk)| LayerChoice::decode(chunk, i * STATE_NUM))
            .collect::<Result<Vec<_>>>()?;

        // non-empty, checked above
        let last = layers[layers.len() - 1].out_channels;
        if last != num_label {
            return Err(Error::Structural(format!(
                "wrong structure: last layer has {last} output channels, task has {num_label} labels"
            )));
        }
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[LayerChoice] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Per-layer dimensions for a task with `num_feat` input features.
    ///
    /// Residual wiring is never applied to layer 0, whose input is raw features.
    pub fn layer_dims(&self, num_feat: usize, residual: bool) -> Vec<LayerDims> {
        let n = self.layers.len();
        let mut in_channels = num_feat;
        let mut dims = Vec::with_capacity(n);
        for (i, layer) in self.layers.iter().enumerate() {
            dims.push(LayerDims {
                in_channels,
                out_channels: layer.out_channels,
                heads: layer.heads,
                concat: i + 1 != n,
                residual: i > 0 && residual,
            });
            in_channels = layer.concat_width();
        }
        dims
    }

    /// Re-encode as a flat token list.
    pub fn encode(&self) -> Encoding {
        let mut tokens = Vec::with_capacity(self.layers.len() * STATE_NUM);
        for l in &self.layers {
            tokens.push(ArchToken::Op(l.attention.to_string()));
            tokens.push(ArchToken::Op(l.aggregator.to_string()));
            tokens.push(ArchToken::Op(l.activation.to_string()));
            tokens.push(ArchToken::Int(l.heads));
            tokens.push(ArchToken::Int(l.out_channels));
        }
        Encoding(tokens)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.encode().0.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> Encoding {
        "[gat, sum, relu, 2, 8, gcn, mean, relu, 1, 7]".parse().unwrap()
    }

    #[test]
    fn test_parse_encoding_text() {
        let enc = example();
        assert_eq!(enc.len(), 10);
        assert_eq!(enc.tokens()[0], ArchToken::Op("gat".into()));
        assert_eq!(enc.tokens()[3], ArchToken::Int(2));

        let quoted: Encoding = "['gat', 'sum', 'relu', 2, 8]".parse().unwrap();
        assert_eq!(quoted.tokens()[1], ArchToken::Op("sum".into()));
    }

    #[test]
    fn test_decode_two_layer_example() {
        let arch = Architecture::decode(example().tokens(), 7).unwrap();
        assert_eq!(arch.num_layers(), 2);

        let dims = arch.layer_dims(16, true);
        assert_eq!(dims[0].in_channels, 16);
        assert_eq!(dims[0].output_width(), 16);
        assert!(dims[0].concat);
        assert!(!dims[0].residual);

        assert_eq!(dims[1].in_channels, 16);
        assert_eq!(dims[1].output_width(), 7);
        assert!(!dims[1].concat);
        assert!(dims[1].residual);
    }

    #[test]
    fn test_residual_toggle_off() {
        let arch = Architecture::decode(example().tokens(), 7).unwrap();
        assert!(arch.layer_dims(16, false).iter().all(|d| !d.residual));
    }

    #[test]
    fn test_unmatchable_length() {
        let enc: Encoding = "gat,sum,relu,2,8,gcn,mean".parse().unwrap();
        let err = Architecture::decode(enc.tokens(), 7).unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
        assert!(err.to_string().contains("unmatchable input"));
    }

    #[test]
    fn test_wrong_structure() {
        let err = Architecture::decode(example().tokens(), 3).unwrap_err();
        assert!(err.to_string().contains("wrong structure"));
    }

    #[test]
    fn test_unknown_op_is_configuration_error() {
        let enc: Encoding = "gat,median,relu,2,7".parse().unwrap();
        let err = Architecture::decode(enc.tokens(), 7).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_bad_counts() {
        let enc: Encoding = "gat,sum,relu,0,7".parse().unwrap();
        assert!(matches!(
            Architecture::decode(enc.tokens(), 7),
            Err(Error::Structural(_))
        ));
        let enc: Encoding = "gat,sum,relu,two,7".parse().unwrap();
        assert!(Architecture::decode(enc.tokens(), 7).is_err());
    }

    #[test]
    fn test_oversized_width_is_structural() {
        let enc: Encoding = "gat,sum,relu,4294967296,4294967296,gat,sum,relu,1,7".parse().unwrap();
        let err = Architecture::decode(enc.tokens(), 7).unwrap_err();
        assert!(matches!(err, Error::Structural(_)), "{err}");

        let enc: Encoding = "gat,sum,relu,256,257,gat,sum,relu,1,7".parse().unwrap();
        assert!(matches!(Architecture::decode(enc.tokens(), 7), Err(Error::Structural(_))));

        let enc: Encoding = "gat,sum,relu,256,256,gat,sum,relu,1,7".parse().unwrap();
        let arch = Architecture::decode(enc.tokens(), 7).unwrap();
        assert_eq!(arch.layer_dims(16, true)[1].in_channels, MAX_LAYER_WIDTH);
    }

    #[test]
    fn test_json_mixed_tokens() {
        let enc: Encoding = serde_json::from_str(r#"["gat","sum","relu",2,"7"]"#).unwrap();
        let arch = Architecture::decode(enc.tokens(), 7).unwrap();
        assert_eq!(arch.layers()[0].heads, 2);
        assert_eq!(arch.to_string(), "[gat, sum, relu, 2, 7]");
    }

    #[test]
    fn test_encode_roundtrip() {
        let arch = Architecture::decode(example().tokens(), 7).unwrap();
        let again = Architecture::decode(arch.encode().tokens(), 7).unwrap();
        assert_eq!(arch, again);
    }
}
