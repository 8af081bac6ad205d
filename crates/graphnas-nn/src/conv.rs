//! Dense graph convolutions and the GCN-only baseline.
//!
//! The convolutions take a dense `(N, N)` operator from [`Graph`] and are the
//! candidate operations of the cell search space
//! ([`MacroGnn`](crate::MacroGnn)).
//!
//! | Conv | Operator it expects |
//! |---|---|
//! | [`GcnConv`] | [`Graph::normalized_adjacency`] |
//! | [`GatConv`], [`SageConv`], [`GinConv`], [`GraphConv`] | [`Graph::adjacency`] |
//! | [`ChebConv`], [`ArmaConv`] | [`Graph::sym_norm_adjacency`] |
//!
//! The baseline is a plain stack of graph convolutions used as a reference
//! point for searched architectures. Each layer computes
//!
//! ```text
//! H' = relu(Â dropout(H) W),    Â = D^{-1/2} (A + I) D^{-1/2}
//! ```
//!
//! It shares task dispatch with [`GraphNas`](crate::GraphNas) through
//! [`GnnModel`].

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{linear, linear_no_bias, ops, Dropout, Linear, VarBuilder, VarMap};
use graphnas_core::{TaskConfig, TaskKind};
use tracing::info;

use crate::activation::leaky_relu;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::model::{device_for, GnnModel};
use crate::task::TaskHead;
use crate::Mode;

const BASELINE_DROPOUT: f32 = 0.5;

/// Graph convolution (Kipf & Welling, 2017).
///
/// Implements `Â (X W)` given a normalized adjacency with self-loops.
#[derive(Debug, Clone)]
pub struct GcnConv {
    linear: Linear,
}

impl GcnConv {
    /// # Arguments
    /// - `in_features`: Input feature dimension
    /// - `out_features`: Output feature dimension
    /// - `vb`: Variable builder for the weight and bias
    pub fn new(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            linear: linear(in_features, out_features, vb)?,
        })
    }

    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `adj`: Normalized adjacency matrix (N x N)
    pub fn forward(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let h = self.linear.forward(x)?;
        Ok(adj.matmul(&h)?)
    }
}

/// Single-head graph attention (Velickovic et al., 2018) over a dense mask.
///
/// `h_i' = sum_j alpha_ij W h_j + b`, where `alpha_i` is a softmax over `i`'s
/// in-neighbors and `i` itself of `leaky_relu(a_dst . W h_i + a_src . W h_j)`.
#[derive(Debug, Clone)]
pub struct GatConv {
    linear: Linear,
    att_src: Tensor,
    att_dst: Tensor,
    bias: Tensor,
    negative_slope: f64,
}

impl GatConv {
    /// # Arguments
    /// - `in_features`: Input feature dimension
    /// - `out_features`: Output feature dimension
    /// - `negative_slope`: LeakyReLU negative slope (typically 0.2)
    /// - `vb`: Variable builder
    pub fn new(
        in_features: usize,
        out_features: usize,
        negative_slope: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let init = candle_nn::init::DEFAULT_KAIMING_NORMAL;
        Ok(Self {
            linear: linear_no_bias(in_features, out_features, vb.pp("lin"))?,
            att_src: vb.get_with_hints((out_features, 1), "att_src", init)?,
            att_dst: vb.get_with_hints((out_features, 1), "att_dst", init)?,
            bias: vb.get_with_hints(out_features, "bias", candle_nn::init::ZERO)?,
            negative_slope,
        })
    }

    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `adj`: Raw adjacency (N x N), `adj[dst][src] > 0` per edge
    pub fn forward(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let n = x.dim(0)?;
        let h = self.linear.forward(x)?;
        let a_src = h.matmul(&self.att_src)?;
        let a_dst = h.matmul(&self.att_dst)?;
        // scores[dst][src]
        let scores = leaky_relu(&a_dst.broadcast_add(&a_src.t()?)?, self.negative_slope)?;

        let eye = Tensor::eye(n, adj.dtype(), adj.device())?;
        let mask = (adj + eye)?.gt(0f64)?;
        let blocked = (scores.ones_like()? * -1e9)?;
        let alpha = ops::softmax(&mask.where_cond(&scores, &blocked)?, D::Minus1)?;
        Ok(alpha.matmul(&h)?.broadcast_add(&self.bias)?)
    }
}

/// GraphSAGE with mean aggregation (Hamilton et al., 2017).
///
/// `h_i' = W_n mean_{j in N(i)} h_j + W_s h_i`; nodes without neighbors get
/// only the self term.
#[derive(Debug, Clone)]
pub struct SageConv {
    lin_self: Linear,
    lin_neighbor: Linear,
}

impl SageConv {
    /// # Arguments
    /// - `in_features`: Input feature dimension
    /// - `out_features`: Output feature dimension
    /// - `vb`: Variable builder
    pub fn new(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            lin_self: linear_no_bias(in_features, out_features, vb.pp("lin_self"))?,
            lin_neighbor: linear(in_features, out_features, vb.pp("lin_neighbor"))?,
        })
    }

    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `adj`: Raw adjacency (N x N)
    pub fn forward(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let deg = adj.sum_keepdim(1)?.maximum(1f64)?;
        let mean = adj.matmul(x)?.broadcast_div(&deg)?;
        Ok((self.lin_neighbor.forward(&mean)? + self.lin_self.forward(x)?)?)
    }
}

/// Graph isomorphism layer (Xu et al., 2019) with a fixed `eps = 0` and a
/// one-layer `Linear + ReLU` update.
#[derive(Debug, Clone)]
pub struct GinConv {
    linear: Linear,
}

impl GinConv {
    pub fn new(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            linear: linear(in_features, out_features, vb.pp("mlp"))?,
        })
    }

    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `adj`: Raw adjacency (N x N), need not be normalized
    pub fn forward(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let combined = (x + adj.matmul(x)?)?;
        Ok(self.linear.forward(&combined)?.relu()?)
    }
}

/// Chebyshev spectral filter (Defferrard et al., 2016).
///
/// Uses `lambda_max = 2`, so the scaled Laplacian is `-D^{-1/2} A D^{-1/2}`,
/// which is the negated [`Graph::sym_norm_adjacency`].
#[derive(Debug, Clone)]
pub struct ChebConv {
    weights: Vec<Linear>,
}

impl ChebConv {
    /// # Arguments
    /// - `in_features`: Input feature dimension
    /// - `out_features`: Output feature dimension
    /// - `k`: Number of Chebyshev terms, at least 1
    /// - `vb`: Variable builder
    pub fn new(in_features: usize, out_features: usize, k: usize, vb: VarBuilder) -> Result<Self> {
        if k == 0 {
            return Err(graphnas_core::Error::Configuration {
                kind: "chebyshev order",
                value: k.to_string(),
            }
            .into());
        }
        let weights = (0..k)
            .map(|i| {
                let vb = vb.pp(format!("cheb_{i}"));
                if i == 0 {
                    linear(in_features, out_features, vb)
                } else {
                    linear_no_bias(in_features, out_features, vb)
                }
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { weights })
    }

    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `sym_adj`: `D^{-1/2} A D^{-1/2}` without self-loops (N x N)
    pub fn forward(&self, x: &Tensor, sym_adj: &Tensor) -> Result<Tensor> {
        let laplacian = sym_adj.neg()?;
        let mut t_prev = x.clone();
        let mut out = self.weights[0].forward(&t_prev)?;
        let Some(w1) = self.weights.get(1) else {
            return Ok(out);
        };
        let mut t_curr = laplacian.matmul(x)?;
        out = (out + w1.forward(&t_curr)?)?;
        for w in &self.weights[2..] {
            let t_next = ((laplacian.matmul(&t_curr)? * 2.0)? - &t_prev)?;
            out = (out + w.forward(&t_next)?)?;
            t_prev = t_curr;
            t_curr = t_next;
        }
        Ok(out)
    }
}

/// One-stack, one-layer ARMA filter (Bianchi et al., 2021).
///
/// `h' = relu(A_sym X W + X V + b)` with `A_sym` the symmetric normalization
/// without self-loops.
#[derive(Debug, Clone)]
pub struct ArmaConv {
    init: Linear,
    root: Linear,
}

impl ArmaConv {
    pub fn new(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            init: linear_no_bias(in_features, out_features, vb.pp("init"))?,
            root: linear(in_features, out_features, vb.pp("root"))?,
        })
    }

    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `sym_adj`: `D^{-1/2} A D^{-1/2}` without self-loops (N x N)
    pub fn forward(&self, x: &Tensor, sym_adj: &Tensor) -> Result<Tensor> {
        let propagated = sym_adj.matmul(&self.init.forward(x)?)?;
        Ok((propagated + self.root.forward(x)?)?.relu()?)
    }
}

/// k-GNN graph convolution (Morris et al., 2019): `h_i' = W_1 h_i + W_2 sum_j h_j`.
#[derive(Debug, Clone)]
pub struct GraphConv {
    lin_rel: Linear,
    lin_root: Linear,
}

impl GraphConv {
    pub fn new(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            lin_rel: linear(in_features, out_features, vb.pp("lin_rel"))?,
            lin_root: linear_no_bias(in_features, out_features, vb.pp("lin_root"))?,
        })
    }

    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `adj`: Raw adjacency (N x N)
    pub fn forward(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let neighbor_sum = adj.matmul(x)?;
        Ok((self.lin_rel.forward(&neighbor_sum)? + self.lin_root.forward(x)?)?)
    }
}

/// One [`GcnConv`] per descriptor entry.
pub struct GcnOnly {
    convs: Vec<GcnConv>,
    dropout: Dropout,
    head: TaskHead,
    num_feat: usize,
    varmap: VarMap,
}

impl GcnOnly {
    /// `desc[i]` is the output width of layer `i`; the last entry must equal
    /// the task's label count.
    pub fn new(desc: &[usize], task: &TaskConfig) -> Result<Self> {
        let Some(&last) = desc.last() else {
            return Err(graphnas_core::Error::Structural("empty architecture".into()).into());
        };
        if last != task.num_label {
            return Err(graphnas_core::Error::Structural(format!(
                "wrong structure: last layer has {last} output channels, task has {} labels",
                task.num_label
            ))
            .into());
        }
        if desc.contains(&0) {
            return Err(graphnas_core::Error::Structural("layer width must be positive".into()).into());
        }

        let device: Device = device_for(task.device)?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut convs = Vec::with_capacity(desc.len());
        let mut in_features = task.num_feat;
        for (i, &out_features) in desc.iter().enumerate() {
            convs.push(GcnConv::new(in_features, out_features, vb.pp(format!("conv_{i}")))?);
            in_features = out_features;
        }
        info!(task = %task.task_name, layers = convs.len(), "built GCN baseline");

        Ok(Self {
            convs,
            dropout: Dropout::new(BASELINE_DROPOUT),
            head: TaskHead::for_task(task.task_name),
            num_feat: task.num_feat,
            varmap,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.convs.len()
    }

    pub fn task_kind(&self) -> TaskKind {
        self.head.kind()
    }
}

impl GnnModel for GcnOnly {
    fn task(&self) -> TaskHead {
        self.head
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn forward(&self, graph: &Graph, mode: Mode) -> Result<Tensor> {
        if graph.num_features() != self.num_feat {
            return Err(Error::InvalidGraph(format!(
                "graph has {} features, model expects {}",
                graph.num_features(),
                self.num_feat
            )));
        }
        let adj = graph.normalized_adjacency()?;
        let mut h = graph.x().clone();
        for conv in &self.convs {
            h = self.dropout.forward(&h, mode.is_train())?;
            h = conv.forward(&h, adj)?.relu()?;
        }
        self.head.readout(&h, graph)
    }
}
