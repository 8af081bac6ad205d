//! Cell-style GNN over a [`MacroArchitecture`].
//!
//! ```text
//! s_0     = relu(W_pre dropout(X))
//! s_{i+1} = dropout(relu(op_i(s_{link[i]})))
//! out     = W_cls sum_{leaf} s_leaf
//! ```
//!
//! Every state has the same width, so any link topology type-checks.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{linear, Dropout, Linear, VarBuilder, VarMap};
use graphnas_core::{MacroArchitecture, MacroConfig, MacroOp, TaskConfig, TaskKind};
use tracing::info;

use crate::conv::{ArmaConv, ChebConv, GatConv, GcnConv, GinConv, GraphConv, SageConv};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::model::{check_dropout, device_for, GnnModel};
use crate::task::TaskHead;
use crate::Mode;

const GAT_SLOPE: f64 = 0.2;
const CHEB_ORDER: usize = 2;

/// A built candidate operation.
#[derive(Debug, Clone)]
enum CellOp {
    Gcn(GcnConv),
    Gat(GatConv),
    Sage(SageConv),
    Gin(GinConv),
    Cheb(ChebConv),
    Arma(ArmaConv),
    Graph(GraphConv),
    /// `fc` and `skip`: a projection that ignores the edges.
    Dense(Linear),
}

impl CellOp {
    fn new(op: MacroOp, dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(match op {
            MacroOp::Gcn => Self::Gcn(GcnConv::new(dim, dim, vb)?),
            MacroOp::Gat => Self::Gat(GatConv::new(dim, dim, GAT_SLOPE, vb)?),
            MacroOp::Sage => Self::Sage(SageConv::new(dim, dim, vb)?),
            MacroOp::Gin => Self::Gin(GinConv::new(dim, dim, vb)?),
            MacroOp::Cheb => Self::Cheb(ChebConv::new(dim, dim, CHEB_ORDER, vb)?),
            MacroOp::Arma => Self::Arma(ArmaConv::new(dim, dim, vb)?),
            MacroOp::Graph => Self::Graph(GraphConv::new(dim, dim, vb)?),
            MacroOp::Fc | MacroOp::Skip => Self::Dense(linear(dim, dim, vb)?),
        })
    }

    fn forward(&self, x: &Tensor, graph: &Graph) -> Result<Tensor> {
        match self {
            Self::Gcn(conv) => conv.forward(x, graph.normalized_adjacency()?),
            Self::Gat(conv) => conv.forward(x, graph.adjacency()?),
            Self::Sage(conv) => conv.forward(x, graph.adjacency()?),
            Self::Gin(conv) => conv.forward(x, graph.adjacency()?),
            Self::Cheb(conv) => conv.forward(x, graph.sym_norm_adjacency()?),
            Self::Arma(conv) => conv.forward(x, graph.sym_norm_adjacency()?),
            Self::Graph(conv) => conv.forward(x, graph.adjacency()?),
            Self::Dense(lin) => Ok(lin.forward(x)?),
        }
    }
}

/// A trainable cell: preprocessor, linked operations and a classifier.
pub struct MacroGnn {
    architecture: MacroArchitecture,
    preprocess: Linear,
    ops: Vec<CellOp>,
    classifier: Linear,
    leaves: Vec<usize>,
    dropout: Dropout,
    head: TaskHead,
    num_feat: usize,
    varmap: VarMap,
}

impl MacroGnn {
    pub fn new(
        architecture: MacroArchitecture,
        task: &TaskConfig,
        config: &MacroConfig,
    ) -> Result<Self> {
        check_dropout(config.dropout)?;
        if config.hidden_dim == 0 {
            return Err(graphnas_core::Error::Configuration {
                kind: "hidden_dim",
                value: "0".into(),
            }
            .into());
        }
        if task.num_label == 0 {
            return Err(graphnas_core::Error::Structural("task has no labels".into()).into());
        }

        let device: Device = device_for(task.device)?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let hid = config.hidden_dim;

        let preprocess = linear(task.num_feat, hid, vb.pp("pre"))?;
        let ops = architecture
            .ops()
            .iter()
            .enumerate()
            .map(|(i, &op)| CellOp::new(op, hid, vb.pp(format!("op_{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let classifier = linear(hid, task.num_label, vb.pp("classifier"))?;
        let leaves = architecture.leaves();

        info!(
            task = %task.task_name,
            link = ?architecture.link(),
            ops = ?architecture.ops(),
            hidden_dim = hid,
            "built cell model"
        );

        Ok(Self {
            architecture,
            preprocess,
            ops,
            classifier,
            leaves,
            dropout: Dropout::new(config.dropout),
            head: TaskHead::for_task(task.task_name),
            num_feat: task.num_feat,
            varmap,
        })
    }

    pub fn architecture(&self) -> &MacroArchitecture {
        &self.architecture
    }

    pub fn task_kind(&self) -> TaskKind {
        self.head.kind()
    }
}

impl GnnModel for MacroGnn {
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
        let train = mode.is_train();
        let x = self.dropout.forward(graph.x(), train)?;
        let mut states = Vec::with_capacity(self.ops.len() + 1);
        states.push(self.preprocess.forward(&x)?.relu()?);

        for (op, &src) in self.ops.iter().zip(self.architecture.link()) {
            let h = op.forward(&states[src], graph)?.relu()?;
            states.push(self.dropout.forward(&h, train)?);
        }

        let mut out = states[self.leaves[0]].clone();
        for &leaf in &self.leaves[1..] {
            out = (out + &states[leaf])?;
        }
        let logits = self.classifier.forward(&out)?;
        self.head.readout(&logits, graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphnas_core::LINKS;

    fn ring(n: usize, feat: usize) -> Graph {
        let x = Tensor::randn(0f32, 1.0, (n, feat), &Device::Cpu).unwrap();
        let edges = (0..n).flat_map(|i| [(i, (i + 1) % n), ((i + 1) % n, i)]).collect();
        Graph::new(x, edges).unwrap()
    }

    fn cell(link: usize, ops: &str) -> MacroArchitecture {
        let ops = ops.split(',').map(|t| t.parse().unwrap()).collect();
        MacroArchitecture::from_link_index(link, ops).unwrap()
    }

    #[test]
    fn test_every_op_in_every_topology() {
        let task = TaskConfig::new(TaskKind::NodeClassification, 5, 3);
        let config = MacroConfig::default().with_hidden_dim(8);
        let g = ring(6, 5);
        for link in 0..LINKS.len() {
            for ops in ["gcn,gat,sage,gin", "cheb,arma,graph,fc", "skip,gcn,cheb,gat"] {
                let model = MacroGnn::new(cell(link, ops), &task, &config).unwrap();
                let out = model.forward(&g, Mode::Eval).unwrap();
                assert_eq!(out.dims(), &[6, 3]);
            }
        }
    }

    #[test]
    fn test_graph_task_reads_out_per_graph() {
        let task = TaskConfig::new(TaskKind::GraphClassification, 4, 2);
        let model = MacroGnn::new(cell(8, "gin,gin,sage,fc"), &task, &MacroConfig::default()).unwrap();
        let g = Graph::collate(&[ring(3, 4), ring(5, 4)]).unwrap();
        assert_eq!(model.forward(&g, Mode::Eval).unwrap().dims(), &[2, 2]);
    }

    #[test]
    fn test_eval_is_deterministic() {
        let task = TaskConfig::new(TaskKind::NodeClassification, 4, 2);
        let model = MacroGnn::new(cell(5, "gat,arma,gcn,skip"), &task, &MacroConfig::default()).unwrap();
        let g = ring(5, 4);
        let a = model.forward(&g, Mode::Eval).unwrap().to_vec2::<f32>().unwrap();
        let b = model.forward(&g, Mode::Eval).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_settings() {
        let task = TaskConfig::new(TaskKind::NodeClassification, 4, 2);
        let arch = cell(0, "gcn,gcn,gcn,gcn");
        assert!(MacroGnn::new(arch.clone(), &task, &MacroConfig::default().with_hidden_dim(0)).is_err());
        assert!(MacroGnn::new(arch.clone(), &task, &MacroConfig::default().with_dropout(1.0)).is_err());

        let model = MacroGnn::new(arch, &task, &MacroConfig::default()).unwrap();
        assert!(matches!(model.forward(&ring(4, 3), Mode::Eval), Err(Error::InvalidGraph(_))));
    }

    #[test]
    fn test_parameters_are_namespaced_per_op() {
        let task = TaskConfig::new(TaskKind::NodeClassification, 4, 2);
        let model = MacroGnn::new(cell(8, "gat,sage,fc,cheb"), &task, &MacroConfig::default()).unwrap();
        let data = model.varmap().data().lock().unwrap();
        for key in ["pre.weight", "op_0.att_src", "op_1.lin_self.weight", "op_2.weight", "op_3.cheb_1.weight", "classifier.bias"] {
            assert!(data.contains_key(key), "missing {key}");
        }
    }
}
