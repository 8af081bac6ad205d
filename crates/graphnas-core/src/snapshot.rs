//! Parameter snapshots for weight inheritance across search iterations.
//!
//! Parameters are grouped per layer (`layer_0`, `layer_1`, ...) and, inside a
//! layer, per sub-module under a composite key that spells out every shape and
//! operator choice the sub-module depends on:
//!
//! | Sub-module | Key |
//! |---|---|
//! | prepare | `{in}_{out}_{heads}_{attention}_{attention_dim}_prp` |
//! | aggregator | `{in}_{out}_{heads}_{attention}_{pooling_dim}_{aggregator}` |
//! | aggregator, `num_fc != 1` | `{in}_{out}_{heads}_{attention}_{pooling_dim}_{num_fc}fc_{aggregator}` |
//! | reduce | `{in}_{out}_{heads}_{attention}_{attention_dim}_red` |
//! | finalize | `{in}_{out}_{heads}_{attention}_fnl` |
//! | batch norm | `{in}_bn` |
//!
//! A blob saved by one architecture can be loaded by another only when the
//! whole key string matches, which guarantees matching parameter shapes. The
//! feed-forward depth only appears in the key of the `mean`, `max` and `mlp`
//! aggregators, the only ones whose shapes depend on it.
//!
//! The blob type is generic so this module stays free of any tensor library.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arch::LayerDims;
use crate::ops::{AggregatorType, AttentionType};

/// Parameters of one layer: composite key -> blob.
pub type LayerParams<V> = BTreeMap<String, V>;

/// Merge `new` into `old`.
///
/// With `update_all`, every incoming key overwrites. Without it, only keys
/// missing from `old` are inserted and existing values are kept.
pub fn merge_params<V>(old: &mut LayerParams<V>, new: LayerParams<V>, update_all: bool) {
    for (key, value) in new {
        if update_all || !old.contains_key(&key) {
            old.insert(key, value);
        }
    }
}

/// Name of the `i`-th layer entry in a [`ModelSnapshot`].
pub fn layer_key(index: usize) -> String {
    format!("layer_{index}")
}

/// Composite keys for one layer's sub-modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerKeys {
    base: String,
    in_channels: usize,
    attention_dim: usize,
    pooling_dim: usize,
    num_fc: usize,
    aggregator: AggregatorType,
}

impl LayerKeys {
    pub fn new(
        dims: &LayerDims,
        attention: AttentionType,
        aggregator: AggregatorType,
        pooling_dim: usize,
        num_fc: usize,
    ) -> Self {
        Self {
            base: format!(
                "{}_{}_{}_{}",
                dims.in_channels, dims.out_channels, dims.heads, attention
            ),
            in_channels: dims.in_channels,
            attention_dim: attention.attention_dim(),
            pooling_dim,
            num_fc,
            aggregator,
        }
    }

    pub fn prepare(&self) -> String {
        format!("{}_{}_prp", self.base, self.attention_dim)
    }

    pub fn aggregator(&self) -> String {
        if self.aggregator.uses_feed_forward() && self.num_fc != 1 {
            format!(
                "{}_{}_{}fc_{}",
                self.base, self.pooling_dim, self.num_fc, self.aggregator
            )
        } else {
            format!("{}_{}_{}", self.base, self.pooling_dim, self.aggregator)
        }
    }

    pub fn reduce(&self) -> String {
        format!("{}_{}_red", self.base, self.attention_dim)
    }

    pub fn finalize(&self) -> String {
        format!("{}_fnl", self.base)
    }

    pub fn batch_norm(&self) -> String {
        format!("{}_bn", self.in_channels)
    }
}

/// Parameters of a whole model, keyed by layer then by composite key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot<V> {
    layers: BTreeMap<String, LayerParams<V>>,
}

impl<V> Default for ModelSnapshot<V> {
    fn default() -> Self {
        Self {
            layers: BTreeMap::new(),
        }
    }
}

impl<V> ModelSnapshot<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one layer's parameters in, creating the layer entry if absent.
    pub fn absorb_layer(&mut self, index: usize, params: LayerParams<V>, update_all: bool) {
        let entry = self.layers.entry(layer_key(index)).or_default();
        merge_params(entry, params, update_all);
    }

    pub fn layer(&self, index: usize) -> Option<&LayerParams<V>> {
        self.layers.get(&layer_key(index))
    }

    pub fn layers(&self) -> impl Iterator<Item = (&String, &LayerParams<V>)> {
        self.layers.iter()
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Total number of blobs across all layers.
    pub fn num_blobs(&self) -> usize {
        self.layers.values().map(BTreeMap::len).sum()
    }
}
