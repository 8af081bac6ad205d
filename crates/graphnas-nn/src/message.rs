//! Message passing with per-node mailboxes.
//!
//! One propagation round follows the usual three steps:
//!
//! 1. **Message**: every edge `(src, dst)` carries `src`'s working record
//! 2. **Reduce**: every node reduces its mailbox into one accumulated feature
//! 3. **Update**: the head's finalize step combines the result with the input
//!
//! Reduce strategies need the whole mailbox at once (softmax over neighbors,
//! recurrent aggregators), so mailboxes are materialized as dense
//! `(batch, degree, dim)` tensors. Nodes are bucketed by in-degree: every
//! bucket is one gather plus one reduce call, and the buckets are scattered
//! back into node order with a single index select. Nodes without incoming
//! edges accumulate zeros.
//!
//! ```text
//! in-degree 1: [v3, v7]      -> mailbox (2, 1, D) -> reduce -> (2, D) ┐
//! in-degree 3: [v0, v1, v5]  -> mailbox (3, 3, D) -> reduce -> (3, D) ├─ cat + reorder -> (N, D)
//! isolated:    [v2, v4, v6]  -> zeros (3, D) ──────────────────────── ┘
//! ```

use std::collections::BTreeMap;

use candle_core::{Device, Tensor};

use crate::error::{Error, Result};
use crate::reduce::Reduce;
use crate::Mode;

/// Per-node working record produced by a head's prepare step.
///
/// Owned by one head for one layer call; never shared between heads.
#[derive(Debug, Clone)]
pub struct NodeState {
    /// Layer input after dropout, `(N, in)`.
    pub h: Tensor,
    /// Projected features, `(N, out)`.
    pub ft: Tensor,
    /// Score component for the node as receiver, `(N, attention_dim)`.
    pub a1: Tensor,
    /// Score component for the node as sender, `(N, attention_dim)`.
    pub a2: Tensor,
    /// Per-node normalization, `(N, 1)`, when the graph carries one.
    pub norm: Option<Tensor>,
}

/// Receiving nodes of one degree bucket.
#[derive(Debug, Clone)]
pub struct NodeBatch {
    /// `(B, attention_dim)`
    pub a1: Tensor,
    /// `(B, attention_dim)`
    pub a2: Tensor,
    /// `(B, 1)`
    pub norm: Option<Tensor>,
}

/// Messages received by the nodes of one degree bucket.
#[derive(Debug, Clone)]
pub struct Mailbox {
    /// Neighbor features, `(B, deg, out)`.
    pub ft: Tensor,
    /// Neighbor receiver scores, `(B, deg, attention_dim)`.
    pub a1: Tensor,
    /// Neighbor sender scores, `(B, deg, attention_dim)`.
    pub a2: Tensor,
    /// Neighbor features scaled by the neighbor's norm, `(B, deg, out)`.
    pub norm: Option<Tensor>,
}

/// Nodes sharing one in-degree.
#[derive(Debug, Clone)]
struct DegreeBucket {
    degree: usize,
    /// Receiving node ids, `(B,)`.
    dst: Tensor,
    /// Sender ids, row-major `(B * degree,)`.
    src: Tensor,
}

/// Precomputed mailbox layout for a fixed edge list.
#[derive(Debug, Clone)]
pub struct MessageIndex {
    num_nodes: usize,
    buckets: Vec<DegreeBucket>,
    isolated: usize,
    /// Row of node `i` in the concatenated bucket output.
    position: Tensor,
}

impl MessageIndex {
    /// Build the layout for `edges`, each `(src, dst)`.
    ///
    /// Endpoints must already be checked against `num_nodes`.
    pub fn new(num_nodes: usize, edges: &[(usize, usize)], device: &Device) -> Result<Self> {
        let mut inbox: Vec<Vec<u32>> = vec![Vec::new(); num_nodes];
        for &(src, dst) in edges {
            inbox[dst].push(src as u32);
        }

        let mut by_degree: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut isolated_nodes = Vec::new();
        for (node, senders) in inbox.iter().enumerate() {
            if senders.is_empty() {
                isolated_nodes.push(node);
            } else {
                by_degree.entry(senders.len()).or_default().push(node);
            }
        }

        let mut order: Vec<usize> = Vec::with_capacity(num_nodes);
        let mut buckets = Vec::with_capacity(by_degree.len());
        for (degree, nodes) in by_degree {
            let dst: Vec<u32> = nodes.iter().map(|&n| n as u32).collect();
            let src: Vec<u32> = nodes.iter().flat_map(|&n| inbox[n].iter().copied()).collect();
            buckets.push(DegreeBucket {
                degree,
                dst: Tensor::from_vec(dst, nodes.len(), device)?,
                src: Tensor::from_vec(src, nodes.len() * degree, device)?,
            });
            order.extend(nodes);
        }
        let isolated = isolated_nodes.len();
        order.extend(isolated_nodes);

        let mut position = vec![0u32; num_nodes];
        for (row, &node) in order.iter().enumerate() {
            position[node] = row as u32;
        }

        Ok(Self {
            num_nodes,
            buckets,
            isolated,
            position: Tensor::from_vec(position, num_nodes, device)?,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Distinct in-degrees present (excluding zero).
    pub fn degrees(&self) -> Vec<usize> {
        self.buckets.iter().map(|b| b.degree).collect()
    }

    /// Nodes without incoming edges.
    pub fn num_isolated(&self) -> usize {
        self.isolated
    }
}

fn gather(t: &Tensor, ids: &Tensor, rows: usize, degree: usize) -> Result<Tensor> {
    let width = t.dim(1)?;
    Ok(t.index_select(ids, 0)?.reshape((rows, degree, width))?)
}

/// Deliver every node's record to its out-neighbors and reduce each mailbox.
///
/// Returns the accumulated features `(N, out)` in node order.
pub fn propagate(
    index: &MessageIndex,
    state: &NodeState,
    reduce: &Reduce,
    mode: Mode,
) -> Result<Tensor> {
    let (n, width) = state.ft.dims2()?;
    if n != index.num_nodes {
        return Err(Error::InvalidGraph(format!(
            "working record has {n} rows, graph has {} nodes",
            index.num_nodes
        )));
    }

    // message: sender features scaled by the sender's norm
    let scaled = match &state.norm {
        Some(norm) => Some(state.ft.broadcast_mul(norm)?),
        None => None,
    };

    let mut parts = Vec::with_capacity(index.buckets.len() + 1);
    for bucket in &index.buckets {
        let rows = bucket.dst.dim(0)?;
        let nodes = NodeBatch {
            a1: state.a1.index_select(&bucket.dst, 0)?,
            a2: state.a2.index_select(&bucket.dst, 0)?,
            norm: match &state.norm {
                Some(norm) => Some(norm.index_select(&bucket.dst, 0)?),
                None => None,
            },
        };
        let mailbox = Mailbox {
            ft: gather(&state.ft, &bucket.src, rows, bucket.degree)?,
            a1: gather(&state.a1, &bucket.src, rows, bucket.degree)?,
            a2: gather(&state.a2, &bucket.src, rows, bucket.degree)?,
            norm: match &scaled {
                Some(s) => Some(gather(s, &bucket.src, rows, bucket.degree)?),
                None => None,
            },
        };
        parts.push(reduce.reduce(&nodes, &mailbox, mode)?);
    }
    if index.isolated > 0 || parts.is_empty() {
        parts.push(Tensor::zeros(
            (index.isolated, width),
            state.ft.dtype(),
            state.ft.device(),
        )?);
    }

    let stacked = Tensor::cat(&parts, 0)?;
    Ok(stacked.index_select(&index.position, 0)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_group_by_in_degree() {
        // 0 -> 1, 0 -> 2, 1 -> 2, 3 isolated
        let edges = vec![(0, 1), (0, 2), (1, 2)];
        let index = MessageIndex::new(4, &edges, &Device::Cpu).unwrap();

        assert_eq!(index.degrees(), vec![1, 2]);
        assert_eq!(index.num_isolated(), 2); // nodes 0 and 3
        assert_eq!(index.num_nodes(), 4);
    }

    #[test]
    fn test_position_is_a_permutation() {
        let edges = vec![(1, 0), (2, 0), (0, 3), (3, 1)];
        let index = MessageIndex::new(5, &edges, &Device::Cpu).unwrap();

        let mut pos = index.position.to_vec1::<u32>().unwrap();
        pos.sort_unstable();
        assert_eq!(pos, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_mailbox_rows_follow_edge_order() {
        // node 2 receives from 0 then 1
        let edges = vec![(0, 2), (1, 2)];
        let index = MessageIndex::new(3, &edges, &Device::Cpu).unwrap();
        let bucket = &index.buckets[0];

        assert_eq!(bucket.degree, 2);
        assert_eq!(bucket.dst.to_vec1::<u32>().unwrap(), vec![2]);
        assert_eq!(bucket.src.to_vec1::<u32>().unwrap(), vec![0, 1]);
    }
}
