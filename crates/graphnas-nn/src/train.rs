//! Training loops for the three task contexts.
//!
//! All loops optimize the model's whole `VarMap` with AdamW and log one
//! `debug!` line per epoch.

use candle_nn::{ops, AdamW, Optimizer, ParamsAdamW};
use graphnas_core::{TaskKind, TrainConfig};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::graph::{Graph, GraphLoaders};
use crate::model::GnnModel;
use crate::qubo::{cut_size, maxcut_qubo, project_bits, unique_edge_count};
use crate::task::{Metric, TaskArgs};
use crate::Mode;

/// Threshold used to turn node probabilities into a cut.
pub const CUT_THRESHOLD: f64 = 0.5;

/// Summary of one fit.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// Mean training loss per epoch.
    pub loss_history: Vec<f32>,
    /// Epoch whose metric is reported.
    pub best_epoch: usize,
    pub metric: Metric,
    pub stopped_early: bool,
}

/// Max-Cut fit result: the report plus the assignment of the best epoch.
#[derive(Debug, Clone)]
pub struct MaxCutOutcome {
    pub report: TrainingReport,
    pub bits: Vec<u8>,
    pub cut: usize,
    pub total_edges: usize,
}

#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainConfig,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    fn optimizer(&self, model: &dyn GnnModel) -> Result<AdamW> {
        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: self.config.weight_decay,
            ..Default::default()
        };
        Ok(AdamW::new(model.varmap().all_vars(), params)?)
    }

    fn expect_task(model: &dyn GnnModel, expected: TaskKind) -> Result<()> {
        let actual = model.task().kind();
        if actual == expected {
            Ok(())
        } else {
            Err(graphnas_core::Error::Configuration {
                kind: "task",
                value: format!("{actual} (trainer expects {expected})"),
            }
            .into())
        }
    }

    fn patience_exhausted(&self, since_best: usize) -> bool {
        self.config.early_stopping.is_some_and(|p| since_best >= p)
    }

    /// Train on the train mask; report the metric of the best val-acc epoch.
    pub fn fit_node_classification(
        &self,
        model: &dyn GnnModel,
        graph: &Graph,
    ) -> Result<TrainingReport> {
        Self::expect_task(model, TaskKind::NodeClassification)?;
        let mut opt = self.optimizer(model)?;
        let mut loss_history = Vec::with_capacity(self.config.epochs);
        let mut best: Option<(usize, Metric)> = None;
        let mut since_best = 0;
        let mut stopped_early = false;

        for epoch in 0..self.config.epochs {
            let out = model.forward(graph, Mode::Train)?;
            let loss = model.loss(&TaskArgs::new().with_data(graph).with_out(&out))?;
            opt.backward_step(&loss)?;
            let loss = loss.to_scalar::<f32>()?;
            loss_history.push(loss);

            let eval = model.forward(graph, Mode::Eval)?;
            let metric = model.metric(&TaskArgs::new().with_data(graph).with_out(&eval))?;
            debug!(epoch, loss, val_acc = metric.score(), "node classification epoch");

            if best.as_ref().map_or(true, |(_, m)| metric.score() > m.score()) {
                best = Some((epoch, metric));
                since_best = 0;
            } else {
                since_best += 1;
                if self.patience_exhausted(since_best) {
                    info!(epoch, "early stopping");
                    stopped_early = true;
                    break;
                }
            }
        }

        let (best_epoch, metric) = match best {
            Some(b) => b,
            None => {
                let eval = model.forward(graph, Mode::Eval)?;
                (0, model.metric(&TaskArgs::new().with_data(graph).with_out(&eval))?)
            }
        };
        Ok(TrainingReport {
            loss_history,
            best_epoch,
            metric,
            stopped_early,
        })
    }

    /// One pass over the train batches per epoch; the final metric covers all
    /// three loaders.
    pub fn fit_graph_classification(
        &self,
        model: &dyn GnnModel,
        loaders: &GraphLoaders,
    ) -> Result<TrainingReport> {
        Self::expect_task(model, TaskKind::GraphClassification)?;
        if loaders.train.is_empty() {
            return Err(Error::Training("no training batches".into()));
        }
        let mut opt = self.optimizer(model)?;
        let mut loss_history = Vec::with_capacity(self.config.epochs);
        let mut best_epoch = 0;
        let mut best_score = f64::NEG_INFINITY;
        let mut since_best = 0;
        let mut stopped_early = false;

        for epoch in 0..self.config.epochs {
            let mut total = 0f32;
            for batch in &loaders.train {
                let out = model.forward(batch, Mode::Train)?;
                let loss = model.loss(&TaskArgs::new().with_data(batch).with_out(&out))?;
                opt.backward_step(&loss)?;
                total += loss.to_scalar::<f32>()?;
            }
            let loss = total / loaders.train.len() as f32;
            loss_history.push(loss);

            let score = model.metric(&TaskArgs::new().with_loaders(loaders))?.score();
            debug!(epoch, loss, val_acc = score, "graph classification epoch");

            if score > best_score {
                best_score = score;
                best_epoch = epoch;
                since_best = 0;
            } else {
                since_best += 1;
                if self.patience_exhausted(since_best) {
                    info!(epoch, "early stopping");
                    stopped_early = true;
                    break;
                }
            }
        }

        let metric = model.metric(&TaskArgs::new().with_loaders(loaders))?;
        Ok(TrainingReport {
            loss_history,
            best_epoch,
            metric,
            stopped_early,
        })
    }

    /// Minimize the relaxed Max-Cut QUBO and keep the lowest-loss assignment.
    ///
    /// Each epoch's probabilities are thresholded at [`CUT_THRESHOLD`]; the
    /// returned bits are those of `best_epoch`. Stops once the loss has failed
    /// to drop by more than the tolerance for `early_stopping` consecutive
    /// epochs.
    pub fn fit_maxcut(&self, model: &dyn GnnModel, graph: &Graph) -> Result<MaxCutOutcome> {
        Self::expect_task(model, TaskKind::CoProblem)?;
        if self.config.epochs == 0 {
            return Err(Error::Training("max-cut needs at least one epoch".into()));
        }
        let q = maxcut_qubo(graph.num_nodes(), graph.edges(), graph.device())?;
        let mut opt = self.optimizer(model)?;
        let mut loss_history = Vec::with_capacity(self.config.epochs);
        let mut best_epoch = 0;
        let mut best_loss = f32::INFINITY;
        let mut best_bits = None;
        let mut stalled = 0;
        let mut stopped_early = false;

        for epoch in 0..self.config.epochs {
            let out = model.forward(graph, Mode::Train)?;
            if out.dim(1)? != 1 {
                return Err(Error::Training(format!(
                    "max-cut needs one output channel, model has {}",
                    out.dim(1)?
                )));
            }
            let prob = ops::sigmoid(&out)?;
            let loss = model.loss(&TaskArgs::new().with_prob(&prob).with_q(&q))?;
            let value = loss.to_scalar::<f32>()?;
            if value < best_loss {
                best_loss = value;
                best_epoch = epoch;
                best_bits = Some(project_bits(&prob, CUT_THRESHOLD)?);
            }
            opt.backward_step(&loss)?;
            debug!(epoch, loss = value, "max-cut epoch");

            if let Some(&prev) = loss_history.last() {
                let delta = f64::from(value - prev);
                if delta.abs() <= self.config.tolerance || delta > 0.0 {
                    stalled += 1;
                } else {
                    stalled = 0;
                }
            }
            loss_history.push(value);
            if self.patience_exhausted(stalled) {
                info!(epoch, loss = value, "early stopping");
                stopped_early = true;
                break;
            }
        }

        let best_bits = best_bits
            .ok_or_else(|| Error::Training("max-cut loss never became finite".into()))?;
        let cut = cut_size(&best_bits, graph.edges());
        let total_edges = unique_edge_count(graph.edges());
        let metric = model.metric(
            &TaskArgs::new()
                .with_maxcut(cut as f64)
                .with_total_edges(total_edges),
        )?;
        info!(cut, total_edges, best_epoch, "max-cut solution");

        Ok(MaxCutOutcome {
            report: TrainingReport {
                loss_history,
                best_epoch,
                metric,
                stopped_early,
            },
            bits: best_bits,
            cut,
            total_edges,
        })
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new(TrainConfig::default())
    }
}
