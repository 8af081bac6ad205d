//! Task heads: readout, loss, and metric per task context.
//!
//! | Task | Readout | Loss | Metric |
//! |------|---------|------|--------|
//! | `NodeClassification` | identity | cross-entropy on the train mask | accuracy per split |
//! | `GraphClassification` | per-graph mean pool | cross-entropy over the batch | accuracy per loader |
//! | `CO_problem` | identity | `p^T Q p` | `maxcut / total_edges` |
//!
//! `loss` and `metric` take a [`TaskArgs`] bag; which fields are required
//! depends on the task, and every missing field is reported at once.

use std::collections::BTreeMap;

use candle_core::{DType, Tensor, D};
use candle_nn::loss::cross_entropy;
use graphnas_core::TaskKind;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::{Graph, GraphLoaders, Split};

/// Inputs to [`TaskHead::loss`] and [`TaskHead::metric`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskArgs<'a> {
    pub data: Option<&'a Graph>,
    pub out: Option<&'a Tensor>,
    pub loaders: Option<&'a GraphLoaders>,
    pub prob: Option<&'a Tensor>,
    pub q: Option<&'a Tensor>,
    pub maxcut: Option<f64>,
    pub total_edges: Option<usize>,
}

impl<'a> TaskArgs<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, data: &'a Graph) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_out(mut self, out: &'a Tensor) -> Self {
        self.out = Some(out);
        self
    }

    pub fn with_loaders(mut self, loaders: &'a GraphLoaders) -> Self {
        self.loaders = Some(loaders);
        self
    }

    pub fn with_prob(mut self, prob: &'a Tensor) -> Self {
        self.prob = Some(prob);
        self
    }

    pub fn with_q(mut self, q: &'a Tensor) -> Self {
        self.q = Some(q);
        self
    }

    pub fn with_maxcut(mut self, maxcut: f64) -> Self {
        self.maxcut = Some(maxcut);
        self
    }

    pub fn with_total_edges(mut self, total_edges: usize) -> Self {
        self.total_edges = Some(total_edges);
        self
    }
}

/// Error naming every field whose flag is false.
fn missing(task: TaskKind, fields: &[(&'static str, bool)]) -> Error {
    Error::MissingArgument {
        task,
        fields: fields
            .iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| *name)
            .collect(),
    }
}

/// Train/val/test accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitAccuracy {
    #[serde(rename = "train acc")]
    pub train: f64,
    #[serde(rename = "val acc")]
    pub val: f64,
    #[serde(rename = "test acc")]
    pub test: f64,
}

/// Evaluation result of a task head.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metric {
    Accuracy(SplitAccuracy),
    /// Cut ratio for combinatorial problems.
    Ratio(f64),
}

impl Metric {
    pub fn accuracy(&self) -> Option<&SplitAccuracy> {
        match self {
            Self::Accuracy(acc) => Some(acc),
            Self::Ratio(_) => None,
        }
    }

    pub fn ratio(&self) -> Option<f64> {
        match self {
            Self::Ratio(r) => Some(*r),
            Self::Accuracy(_) => None,
        }
    }

    /// The number model selection compares: validation accuracy or the ratio.
    pub fn score(&self) -> f64 {
        match self {
            Self::Accuracy(acc) => acc.val,
            Self::Ratio(r) => *r,
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        match self {
            Self::Accuracy(acc) => BTreeMap::from([
                ("train acc".to_string(), acc.train),
                ("val acc".to_string(), acc.val),
                ("test acc".to_string(), acc.test),
            ]),
            Self::Ratio(r) => BTreeMap::from([("ratio".to_string(), *r)]),
        }
    }
}

/// Fraction of equal entries; 0.0 for empty inputs.
fn accuracy(pred: &Tensor, labels: &Tensor) -> Result<f64> {
    let n = pred.dim(0)?;
    if n == 0 {
        return Ok(0.0);
    }
    let correct = pred
        .eq(labels)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar::<f32>()?;
    Ok(f64::from(correct) / n as f64)
}

/// Argmax predictions `(rows,)` as `u32`.
fn predict(out: &Tensor) -> Result<Tensor> {
    Ok(out.argmax(D::Minus1)?)
}

/// Readout, loss, and metric for one task context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskHead {
    NodeClassification,
    GraphClassification,
    CoProblem,
}

impl TaskHead {
    pub fn for_task(kind: TaskKind) -> Self {
        match kind {
            TaskKind::NodeClassification => Self::NodeClassification,
            TaskKind::GraphClassification => Self::GraphClassification,
            TaskKind::CoProblem => Self::CoProblem,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Self::NodeClassification => TaskKind::NodeClassification,
            Self::GraphClassification => TaskKind::GraphClassification,
            Self::CoProblem => TaskKind::CoProblem,
        }
    }

    /// Map the last layer's node output to the task's prediction rows.
    pub fn readout(&self, x: &Tensor, graph: &Graph) -> Result<Tensor> {
        match self {
            Self::GraphClassification => graph.mean_pool(x),
            Self::NodeClassification | Self::CoProblem => Ok(x.clone()),
        }
    }

    pub fn loss(&self, args: &TaskArgs<'_>) -> Result<Tensor> {
        match self {
            Self::NodeClassification => {
                let (Some(graph), Some(out)) = (args.data, args.out) else {
                    return Err(missing(
                        self.kind(),
                        &[("data", args.data.is_some()), ("out", args.out.is_some())],
                    ));
                };
                let idx = graph.split_index(Split::Train)?;
                if idx.dim(0)? == 0 {
                    return Err(Error::InvalidGraph("train mask is empty".into()));
                }
                let logits = out.index_select(&idx, 0)?;
                let targets = graph.labels()?.index_select(&idx, 0)?;
                Ok(cross_entropy(&logits, &targets)?)
            }
            Self::GraphClassification => {
                let (Some(graph), Some(out)) = (args.data, args.out) else {
                    return Err(missing(
                        self.kind(),
                        &[("data", args.data.is_some()), ("out", args.out.is_some())],
                    ));
                };
                Ok(cross_entropy(out, graph.labels()?)?)
            }
            Self::CoProblem => {
                let (Some(prob), Some(q)) = (args.prob, args.q) else {
                    return Err(missing(
                        self.kind(),
                        &[("prob", args.prob.is_some()), ("Q", args.q.is_some())],
                    ));
                };
                let p = prob.flatten_all()?.unsqueeze(1)?;
                Ok((&p * q.matmul(&p)?)?.sum_all()?)
            }
        }
    }

    /// Evaluate. `forward` runs the model in eval mode; only graph
    /// classification calls it.
    pub fn metric(
        &self,
        args: &TaskArgs<'_>,
        forward: &dyn Fn(&Graph) -> Result<Tensor>,
    ) -> Result<Metric> {
        match self {
            Self::NodeClassification => {
                let (Some(graph), Some(out)) = (args.data, args.out) else {
                    return Err(missing(
                        self.kind(),
                        &[("data", args.data.is_some()), ("out", args.out.is_some())],
                    ));
                };
                let pred = predict(out)?;
                let labels = graph.labels()?;
                let split_acc = |split: Split| -> Result<f64> {
                    let idx = graph.split_index(split)?;
                    if idx.dim(0)? == 0 {
                        return Ok(0.0);
                    }
                    accuracy(&pred.index_select(&idx, 0)?, &labels.index_select(&idx, 0)?)
                };
                Ok(Metric::Accuracy(SplitAccuracy {
                    train: split_acc(Split::Train)?,
                    val: split_acc(Split::Val)?,
                    test: split_acc(Split::Test)?,
                }))
            }
            Self::GraphClassification => {
                let Some(loaders) = args.loaders else {
                    return Err(missing(self.kind(), &[("loaders", false)]));
                };
                let loader_acc = |split: Split| -> Result<f64> {
                    let batches = loaders.get(split);
                    if batches.is_empty() {
                        return Ok(0.0);
                    }
                    let mut preds = Vec::with_capacity(batches.len());
                    let mut labels = Vec::with_capacity(batches.len());
                    for batch in batches {
                        preds.push(predict(&forward(batch)?)?);
                        labels.push(batch.labels()?.clone());
                    }
                    accuracy(&Tensor::cat(&preds, 0)?, &Tensor::cat(&labels, 0)?)
                };
                Ok(Metric::Accuracy(SplitAccuracy {
                    train: loader_acc(Split::Train)?,
                    val: loader_acc(Split::Val)?,
                    test: loader_acc(Split::Test)?,
                }))
            }
            Self::CoProblem => {
                let (Some(maxcut), Some(total_edges)) = (args.maxcut, args.total_edges) else {
                    return Err(missing(
                        self.kind(),
                        &[
                            ("maxcut", args.maxcut.is_some()),
                            ("total_edges", args.total_edges.is_some()),
                        ],
                    ));
                };
                if total_edges == 0 {
                    return Err(Error::InvalidGraph("total_edges is zero".into()));
                }
                Ok(Metric::Ratio(maxcut / total_edges as f64))
            }
        }
    }
}
