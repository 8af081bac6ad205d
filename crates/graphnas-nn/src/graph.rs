//! Graph handle.
//!
//! A [`Graph`] bundles node features, a directed edge list, and whatever the
//! task needs on top: a per-node normalization, labels, split masks, and for
//! mini-batches of several graphs a graph-assignment vector.
//!
//! The mailbox layout ([`MessageIndex`]) is built once at construction, so a
//! graph can be fed through many forward passes without re-bucketing edges.
//!
//! # Example
//!
//! ```rust,ignore
//! let graph = Graph::new(x, vec![(0, 1), (1, 0), (1, 2), (2, 1)])?
//!     .with_gcn_norm()?
//!     .with_labels(&[0, 1, 0])?
//!     .with_masks(SplitMasks::from_indices(3, &[0], &[1], &[2]))?;
//! ```

use std::collections::BTreeSet;
use std::sync::OnceLock;

use candle_core::{DType, Device, Tensor};

use crate::error::{Error, Result};
use crate::message::MessageIndex;

/// Dataset split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
    Test,
}

/// Boolean train/val/test membership per node.
///
/// A node is in at most one split; splits need not cover every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitMasks {
    pub train: Vec<bool>,
    pub val: Vec<bool>,
    pub test: Vec<bool>,
}

impl SplitMasks {
    /// Build masks of length `num_nodes` from index lists.
    ///
    /// Indices at or beyond `num_nodes` are ignored.
    pub fn from_indices(num_nodes: usize, train: &[usize], val: &[usize], test: &[usize]) -> Self {
        let mask = |ids: &[usize]| {
            let mut m = vec![false; num_nodes];
            for &i in ids.iter().filter(|&&i| i < num_nodes) {
                m[i] = true;
            }
            m
        };
        Self {
            train: mask(train),
            val: mask(val),
            test: mask(test),
        }
    }

    pub fn get(&self, split: Split) -> &[bool] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    /// Node ids selected by `split`.
    pub fn indices(&self, split: Split) -> Vec<u32> {
        self.get(split)
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i as u32))
            .collect()
    }

    fn validate(&self, num_nodes: usize) -> Result<()> {
        for (name, mask) in [("train", &self.train), ("val", &self.val), ("test", &self.test)] {
            if mask.len() != num_nodes {
                return Err(Error::InvalidGraph(format!(
                    "{name} mask has length {}, graph has {num_nodes} nodes",
                    mask.len()
                )));
            }
        }
        for i in 0..num_nodes {
            let hits = [self.train[i], self.val[i], self.test[i]]
                .iter()
                .filter(|&&m| m)
                .count();
            if hits > 1 {
                return Err(Error::InvalidGraph(format!("node {i} is in more than one split")));
            }
        }
        Ok(())
    }
}

/// Graph-assignment of nodes for a mini-batch of graphs.
#[derive(Debug, Clone)]
struct Assignment {
    batch: Vec<usize>,
    num_graphs: usize,
    /// Row-normalized `(G, N)` membership matrix; `pool @ x` is the per-graph mean.
    pool: Tensor,
}

impl Assignment {
    fn new(batch: Vec<usize>, num_nodes: usize, device: &Device) -> Result<Self> {
        if batch.len() != num_nodes {
            return Err(Error::InvalidGraph(format!(
                "batch assignment has length {}, graph has {num_nodes} nodes",
                batch.len()
            )));
        }
        let num_graphs = batch.iter().max().map_or(0, |&g| g + 1);
        let mut counts = vec![0usize; num_graphs];
        for &g in &batch {
            counts[g] += 1;
        }
        let mut pool = vec![0f32; num_graphs * num_nodes];
        for (node, &g) in batch.iter().enumerate() {
            pool[g * num_nodes + node] = 1.0 / counts[g] as f32;
        }
        Ok(Self {
            batch,
            num_graphs,
            pool: Tensor::from_vec(pool, (num_graphs, num_nodes), device)?,
        })
    }
}

/// Node features plus directed edges and optional task annotations.
#[derive(Debug, Clone)]
pub struct Graph {
    x: Tensor,
    edges: Vec<(usize, usize)>,
    index: MessageIndex,
    norm: Option<Tensor>,
    y: Option<Tensor>,
    masks: Option<SplitMasks>,
    assignment: Option<Assignment>,
    adjacency: OnceLock<Tensor>,
    raw_adjacency: OnceLock<Tensor>,
    sym_adjacency: OnceLock<Tensor>,
}

impl Graph {
    /// Create a graph from an `(N, F)` feature matrix and `(src, dst)` edges.
    pub fn new(x: Tensor, edges: Vec<(usize, usize)>) -> Result<Self> {
        let (num_nodes, _) = x.dims2().map_err(|_| {
            Error::InvalidGraph(format!("features must be (N, F), got {:?}", x.dims()))
        })?;
        if let Some(&(src, dst)) = edges.iter().find(|&&(s, d)| s >= num_nodes || d >= num_nodes) {
            return Err(Error::InvalidGraph(format!(
                "edge ({src}, {dst}) out of range for {num_nodes} nodes"
            )));
        }
        let index = MessageIndex::new(num_nodes, &edges, x.device())?;
        Ok(Self {
            x,
            edges,
            index,
            norm: None,
            y: None,
            masks: None,
            assignment: None,
            adjacency: OnceLock::new(),
            raw_adjacency: OnceLock::new(),
            sym_adjacency: OnceLock::new(),
        })
    }

    /// Attach integer class labels (one per node, or one per graph).
    pub fn with_labels(self, labels: &[u32]) -> Result<Self> {
        self.check_label_count(labels.len())?;
        let y = Tensor::from_vec(labels.to_vec(), labels.len(), self.x.device())?;
        Ok(Self { y: Some(y), ..self })
    }

    /// Attach labels from a rank-1 tensor; converted to `u32`.
    pub fn with_label_tensor(self, y: &Tensor) -> Result<Self> {
        let y = y.flatten_all()?.to_dtype(DType::U32)?;
        self.check_label_count(y.elem_count())?;
        Ok(Self { y: Some(y), ..self })
    }

    fn check_label_count(&self, len: usize) -> Result<()> {
        if len == self.num_nodes() || len == self.num_graphs() {
            return Ok(());
        }
        Err(Error::InvalidGraph(format!(
            "{len} labels for {} nodes in {} graph(s)",
            self.num_nodes(),
            self.num_graphs()
        )))
    }

    pub fn with_masks(self, masks: SplitMasks) -> Result<Self> {
        masks.validate(self.num_nodes())?;
        Ok(Self {
            masks: Some(masks),
            ..self
        })
    }

    /// Attach a per-node normalization.
    pub fn with_norm(self, norm: &[f32]) -> Result<Self> {
        if norm.len() != self.num_nodes() {
            return Err(Error::InvalidGraph(format!(
                "norm has length {}, graph has {} nodes",
                norm.len(),
                self.num_nodes()
            )));
        }
        let norm = Tensor::from_vec(norm.to_vec(), (norm.len(), 1), self.x.device())?
            .to_dtype(self.x.dtype())?;
        Ok(Self {
            norm: Some(norm),
            ..self
        })
    }

    /// Attach `norm = in_degree^{-1/2}`, zero for nodes without incoming edges.
    pub fn with_gcn_norm(self) -> Result<Self> {
        let norm: Vec<f32> = self
            .in_degrees()
            .into_iter()
            .map(|d| if d == 0 { 0.0 } else { (d as f32).powf(-0.5) })
            .collect();
        self.with_norm(&norm)
    }

    /// Assign nodes to graphs `0..G` for per-graph readout.
    pub fn with_graph_assignment(self, batch: Vec<usize>) -> Result<Self> {
        let assignment = Assignment::new(batch, self.num_nodes(), self.x.device())?;
        Ok(Self {
            assignment: Some(assignment),
            ..self
        })
    }

    /// Merge graphs into one disjoint graph with a graph-assignment vector.
    ///
    /// Edges are offset, features and labels are concatenated, and a norm is
    /// kept only if every graph has one. Masks are dropped.
    pub fn collate(graphs: &[Graph]) -> Result<Self> {
        let first = graphs
            .first()
            .ok_or_else(|| Error::InvalidGraph("cannot collate zero graphs".into()))?;

        let mut edges = Vec::new();
        let mut batch = Vec::new();
        let mut offset = 0;
        let mut next_graph = 0;
        for g in graphs {
            edges.extend(g.edges.iter().map(|&(s, d)| (s + offset, d + offset)));
            match &g.assignment {
                Some(a) => {
                    batch.extend(a.batch.iter().map(|&b| b + next_graph));
                    next_graph += a.num_graphs;
                }
                None => {
                    batch.extend(std::iter::repeat(next_graph).take(g.num_nodes()));
                    next_graph += 1;
                }
            }
            offset += g.num_nodes();
        }

        let xs: Vec<&Tensor> = graphs.iter().map(|g| &g.x).collect();
        let mut merged = Graph::new(Tensor::cat(&xs, 0)?, edges)?;

        if graphs.iter().all(|g| g.norm.is_some()) {
            let norms: Vec<&Tensor> = graphs.iter().filter_map(|g| g.norm.as_ref()).collect();
            merged.norm = Some(Tensor::cat(&norms, 0)?);
        }
        if graphs.iter().all(|g| g.y.is_some()) {
            let ys: Vec<&Tensor> = graphs.iter().filter_map(|g| g.y.as_ref()).collect();
            merged.y = Some(Tensor::cat(&ys, 0)?);
        }
        merged.assignment = Some(Assignment::new(batch, offset, first.x.device())?);
        Ok(merged)
    }

    pub fn x(&self) -> &Tensor {
        &self.x
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn num_nodes(&self) -> usize {
        self.index.num_nodes()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_features(&self) -> usize {
        self.x.dims().get(1).copied().unwrap_or(0)
    }

    pub fn device(&self) -> &Device {
        self.x.device()
    }

    pub fn in_degrees(&self) -> Vec<usize> {
        let mut deg = vec![0; self.num_nodes()];
        for &(_, dst) in &self.edges {
            deg[dst] += 1;
        }
        deg
    }

    pub fn message_index(&self) -> &MessageIndex {
        &self.index
    }

    /// Per-node normalization `(N, 1)`.
    pub fn norm(&self) -> Option<&Tensor> {
        self.norm.as_ref()
    }

    pub fn labels(&self) -> Result<&Tensor> {
        self.y.as_ref().ok_or(Error::MissingField { field: "y" })
    }

    pub fn masks(&self) -> Result<&SplitMasks> {
        self.masks.as_ref().ok_or(Error::MissingField { field: "masks" })
    }

    /// Node ids of `split` as an index tensor.
    pub fn split_index(&self, split: Split) -> Result<Tensor> {
        let ids = self.masks()?.indices(split);
        let n = ids.len();
        Ok(Tensor::from_vec(ids, n, self.device())?)
    }

    /// Number of graphs in this batch (1 without an assignment).
    pub fn num_graphs(&self) -> usize {
        self.assignment.as_ref().map_or(1, |a| a.num_graphs)
    }

    pub fn graph_assignment(&self) -> Option<&[usize]> {
        self.assignment.as_ref().map(|a| a.batch.as_slice())
    }

    /// Mean of node rows per graph, `(G, D)`.
    pub fn mean_pool(&self, h: &Tensor) -> Result<Tensor> {
        match &self.assignment {
            Some(a) => Ok(a.pool.to_dtype(h.dtype())?.matmul(h)?),
            None => Ok(h.mean_keepdim(0)?),
        }
    }

    /// Dense `D^{-1/2} (A + I) D^{-1/2}` with `A[dst][src] = 1` per edge.
    ///
    /// Computed on first use and cached.
    pub fn normalized_adjacency(&self) -> Result<&Tensor> {
        if let Some(adj) = self.adjacency.get() {
            return Ok(adj);
        }
        let adj = self.dense_tensor(self.sym_normalize(self.dense_edges(true)))?;
        Ok(self.adjacency.get_or_init(|| adj))
    }

    /// Dense adjacency without self-loops, `A[dst][src]` counting edges.
    ///
    /// Cached like
    /// [`Graph::normalized_adjacency`].
    pub fn adjacency(&self) -> Result<&Tensor> {
        if let Some(adj) = self.raw_adjacency.get() {
            return Ok(adj);
        }
        let adj = self.dense_tensor(self.dense_edges(false))?;
        Ok(self.raw_adjacency.get_or_init(|| adj))
    }

    /// Dense `D^{-1/2} A D^{-1/2}` without self-loops; isolated nodes get
    /// all-zero rows.
    pub fn sym_norm_adjacency(&self) -> Result<&Tensor> {
        if let Some(adj) = self.sym_adjacency.get() {
            return Ok(adj);
        }
        let adj = self.dense_tensor(self.sym_normalize(self.dense_edges(false)))?;
        Ok(self.sym_adjacency.get_or_init(|| adj))
    }

    fn dense_edges(&self, self_loops: bool) -> Vec<f32> {
        let n = self.num_nodes();
        let mut dense = vec![0f32; n * n];
        if self_loops {
            for i in 0..n {
                dense[i * n + i] = 1.0;
            }
        }
        for &(src, dst) in &self.edges {
            if src != dst {
                dense[dst * n + src] += 1.0;
            }
        }
        dense
    }

    fn sym_normalize(&self, mut dense: Vec<f32>) -> Vec<f32> {
        let n = self.num_nodes();
        let inv_sqrt: Vec<f32> = (0..n)
            .map(|i| {
                let deg: f32 = dense[i * n..(i + 1) * n].iter().sum();
                if deg > 0.0 {
                    deg.powf(-0.5)
                } else {
                    0.0
                }
            })
            .collect();
        for i in 0..n {
            for j in 0..n {
                dense[i * n + j] *= inv_sqrt[i] * inv_sqrt[j];
            }
        }
        dense
    }

    fn dense_tensor(&self, dense: Vec<f32>) -> Result<Tensor> {
        let n = self.num_nodes();
        Ok(Tensor::from_vec(dense, (n, n), self.device())?.to_dtype(self.x.dtype())?)
    }
}

/// Mini-batches for graph classification, one collated [`Graph`] per batch.
#[derive(Debug, Clone, Default)]
pub struct GraphLoaders {
    pub train: Vec<Graph>,
    pub val: Vec<Graph>,
    pub test: Vec<Graph>,
}

impl GraphLoaders {
    /// Collate each split into batches of at most `batch_size` graphs.
    pub fn batched(
        train: &[Graph],
        val: &[Graph],
        test: &[Graph],
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidGraph("batch size must be positive".into()));
        }
        let collate = |graphs: &[Graph]| {
            graphs
                .chunks(batch_size)
                .map(Graph::collate)
                .collect::<Result<Vec<_>>>()
        };
        Ok(Self {
            train: collate(train)?,
            val: collate(val)?,
            test: collate(test)?,
        })
    }

    pub fn get(&self, split: Split) -> &[Graph] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }
}

/// Undirected edges as `(min, max)` pairs without self-loops, each once.
pub(crate) fn undirected_edges(edges: &[(usize, usize)]) -> BTreeSet<(usize, usize)> {
    edges
        .iter()
        .filter(|(s, d)| s != d)
        .map(|&(s, d)| (s.min(d), s.max(d)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(n: usize, f: usize) -> Tensor {
        Tensor::ones((n, f), DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_edge_out_of_range() {
        let err = Graph::new(features(2, 3), vec![(0, 2)]).unwrap_err();
        assert!(matches!(err, Error::InvalidGraph(_)));
    }

    #[test]
    fn test_label_count_checked() {
        let g = Graph::new(features(3, 2), vec![(0, 1)]).unwrap();
        assert!(matches!(g.clone().with_labels(&[0, 1]), Err(Error::InvalidGraph(_))));
        assert!(g.clone().with_labels(&[0, 1, 1]).is_ok());
        // one label for the whole graph
        assert!(g.clone().with_labels(&[1]).is_ok());

        let y = Tensor::new(&[0u32, 1, 0, 1], &Device::Cpu).unwrap();
        assert!(matches!(g.clone().with_label_tensor(&y), Err(Error::InvalidGraph(_))));

        let batched = g.with_graph_assignment(vec![0, 1, 1]).unwrap();
        assert!(batched.clone().with_labels(&[2, 3]).is_ok());
        assert!(batched.with_labels(&[2, 3, 4, 5]).is_err());
    }

    #[test]
    fn test_overlapping_masks_rejected() {
        let g = Graph::new(features(3, 2), vec![(0, 1)]).unwrap();
        let masks = SplitMasks::from_indices(3, &[0, 1], &[1], &[2]);
        assert!(matches!(g.with_masks(masks), Err(Error::InvalidGraph(_))));
    }

    #[test]
    fn test_mask_length_checked() {
        let g = Graph::new(features(3, 2), vec![]).unwrap();
        let masks = SplitMasks::from_indices(4, &[0], &[1], &[2]);
        assert!(g.with_masks(masks).is_err());
    }

    #[test]
    fn test_masks_need_not_cover() {
        let g = Graph::new(features(4, 2), vec![])
            .unwrap()
            .with_masks(SplitMasks::from_indices(4, &[0], &[], &[3]))
            .unwrap();
        assert_eq!(g.masks().unwrap().indices(Split::Train), vec![0]);
        assert!(g.masks().unwrap().indices(Split::Val).is_empty());
    }

    #[test]
    fn test_gcn_norm() {
        // in-degrees: 0 -> 0, 1 -> 1, 2 -> 4
        let edges = vec![(0, 1), (0, 2), (1, 2), (3, 2), (3, 2)];
        let g = Graph::new(features(4, 1), edges).unwrap().with_gcn_norm().unwrap();
        let norm = g.norm().unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(norm, vec![0.0, 1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_collate_offsets_edges() {
        let a = Graph::new(features(2, 3), vec![(0, 1)]).unwrap().with_labels(&[1]).unwrap();
        let b = Graph::new(features(3, 3), vec![(2, 0)]).unwrap().with_labels(&[0]).unwrap();
        let merged = Graph::collate(&[a, b]).unwrap();

        assert_eq!(merged.num_nodes(), 5);
        assert_eq!(merged.edges(), &[(0, 1), (4, 2)]);
        assert_eq!(merged.num_graphs(), 2);
        assert_eq!(merged.graph_assignment().unwrap(), &[0, 0, 1, 1, 1]);
        assert_eq!(merged.labels().unwrap().to_vec1::<u32>().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_mean_pool_per_graph() {
        let x = Tensor::new(&[[1f32], [3.], [10.]], &Device::Cpu).unwrap();
        let g = Graph::new(x.clone(), vec![])
            .unwrap()
            .with_graph_assignment(vec![0, 0, 1])
            .unwrap();
        let pooled = g.mean_pool(&x).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(pooled, vec![2.0, 10.0]);
    }

    #[test]
    fn test_normalized_adjacency_rows() {
        // path 0 - 1 - 2, both directions
        let edges = vec![(0, 1), (1, 0), (1, 2), (2, 1)];
        let g = Graph::new(features(3, 1), edges).unwrap();
        let adj = g.normalized_adjacency().unwrap().to_vec2::<f32>().unwrap();

        // degrees with self loops: 2, 3, 2
        assert!((adj[0][0] - 0.5).abs() < 1e-6);
        assert!((adj[0][1] - 1.0 / (6f32).sqrt()).abs() < 1e-6);
        assert_eq!(adj[0][2], 0.0);
        assert!((adj[1][0] - adj[0][1]).abs() < 1e-6);
    }

    #[test]
    fn test_adjacency_without_self_loops() {
        let edges = vec![(0, 1), (1, 0), (1, 2), (2, 1), (3, 3)];
        let g = Graph::new(features(4, 1), edges).unwrap();

        let raw = g.adjacency().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(raw[1], vec![1.0, 0.0, 1.0, 0.0]);
        assert_eq!(raw[3][3], 0.0);

        // degrees 1, 2, 1, 0
        let sym = g.sym_norm_adjacency().unwrap().to_vec2::<f32>().unwrap();
        assert!((sym[0][1] - 1.0 / 2f32.sqrt()).abs() < 1e-6);
        assert_eq!(sym[0][0], 0.0);
        assert!(sym[3].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_loaders_batch() {
        let graphs: Vec<Graph> = (0..5)
            .map(|_| Graph::new(features(2, 1), vec![(0, 1)]).unwrap())
            .collect();
        let loaders = GraphLoaders::batched(&graphs, &graphs[..1], &[], 2).unwrap();
        assert_eq!(loaders.train.len(), 3);
        assert_eq!(loaders.train[0].num_graphs(), 2);
        assert_eq!(loaders.val.len(), 1);
        assert!(loaders.test.is_empty());
    }

    #[test]
    fn test_undirected_edges() {
        let e = undirected_edges(&[(0, 1), (1, 0), (2, 2), (1, 2)]);
        assert_eq!(e.into_iter().collect::<Vec<_>>(), vec![(0, 1), (1, 2)]);
    }
}
