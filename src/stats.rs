//! Metric evaluation and training bookkeeping.
//!
//! The evaluator is pure: given predictions, processed labels and the
//! `YInfo` recorded by the label stage it always yields the same metric
//! values, paired positionally with their names.
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use linfa::metrics::{ConfusionMatrix, ToConfusionMatrix};
use linfa::DatasetBase;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::data_handling::TaskType;
use crate::error::{BenchError, Result};
use crate::preprocessing::labels::{Target, YInfo};
use crate::preprocessing::PipelineState;

const LOG_LOSS_EPS: f64 = 1e-15;

/// Raw model output for one partition.
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    /// Regression outputs in normalized target units.
    Values(Array1<f64>),
    /// Unnormalized class scores, `(n, k)`.
    Logits(Array2<f64>),
    /// Class probabilities, `(n, k)`.
    Probabilities(Array2<f64>),
    /// Hard class indices.
    Labels(Array1<usize>),
}

impl Predictions {
    pub fn len(&self) -> usize {
        match self {
            Predictions::Values(v) => v.len(),
            Predictions::Labels(v) => v.len(),
            Predictions::Logits(m) | Predictions::Probabilities(m) => m.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major view of the predictions for export.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        match self {
            Predictions::Values(v) => v.iter().map(|&x| vec![x]).collect(),
            Predictions::Labels(v) => v.iter().map(|&x| vec![x as f64]).collect(),
            Predictions::Logits(m) | Predictions::Probabilities(m) => {
                m.outer_iter().map(|r| r.to_vec()).collect()
            }
        }
    }
}

/// Computes named metrics for one task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluator {
    task_type: TaskType,
    n_classes: usize,
    y_info: YInfo,
}

impl Evaluator {
    pub fn new(task_type: TaskType, n_classes: Option<usize>, y_info: YInfo) -> Self {
        Evaluator {
            task_type,
            n_classes: n_classes.unwrap_or(1),
            y_info,
        }
    }

    pub fn from_state(state: &PipelineState) -> Self {
        Evaluator::new(state.task.task_type, state.n_classes(), state.y_info())
    }

    /// Whether a larger first metric is better (accuracy) or worse (MAE).
    pub fn higher_is_better(&self) -> bool {
        !self.task_type.is_regression()
    }

    pub fn evaluate(&self, predictions: &Predictions, labels: &Target) -> Result<(Vec<f64>, Vec<&'static str>)> {
        if predictions.len() != labels.len() {
            return Err(BenchError::InvalidData(format!(
                "{} predictions for {} labels",
                predictions.len(),
                labels.len()
            )));
        }
        match (self.task_type, labels) {
            (TaskType::Regression, Target::Continuous(y)) => {
                let pred = match predictions {
                    Predictions::Values(v) => v.clone(),
                    Predictions::Logits(m) if m.ncols() == 1 => m.column(0).to_owned(),
                    _ => {
                        return Err(BenchError::InvalidData(
                            "regression metrics need one value per row".into(),
                        ))
                    }
                };
                Ok(self.regression(&pred, y))
            }
            (TaskType::BinClass | TaskType::MultiClass, Target::Classes(y)) => {
                let probs = match predictions {
                    Predictions::Logits(m) => Some(softmax(m)),
                    Predictions::Probabilities(m) => Some(m.clone()),
                    Predictions::Labels(_) => None,
                    Predictions::Values(_) => {
                        return Err(BenchError::InvalidData(
                            "classification metrics need scores or labels".into(),
                        ))
                    }
                };
                let pred = match (predictions, &probs) {
                    (Predictions::Labels(l), _) => l.clone(),
                    (_, Some(p)) => argmax_rows(p),
                    (_, None) => {
                        return Err(BenchError::InvalidData("classification predictions are empty".into()))
                    }
                };
                self.classification(&pred, probs.as_ref(), y)
            }
            _ => Err(BenchError::InvalidData(format!(
                "labels do not match task type {:?}",
                self.task_type
            ))),
        }
    }

    fn regression(&self, pred: &Array1<f64>, y: &Array1<f64>) -> (Vec<f64>, Vec<&'static str>) {
        // R2 is scale-invariant; only the distance metrics are rescaled.
        let scale = self.y_info.scale();
        let values = vec![mae(pred, y) * scale, r2(pred, y), rmse(pred, y) * scale];
        (values, vec!["MAE", "R2", "RMSE"])
    }

    fn classification(
        &self,
        pred: &Array1<usize>,
        probs: Option<&Array2<f64>>,
        y: &Array1<usize>,
    ) -> Result<(Vec<f64>, Vec<&'static str>)> {
        let (accuracy, precision, recall, macro_f1) = classification_scores(pred, y)?;
        let f1 = if self.n_classes == 2 {
            binary_f1(pred, y, 1)
        } else {
            macro_f1
        };
        let mut values = vec![accuracy, precision, recall, f1];
        let mut names = vec!["Accuracy", "Avg_Precision", "Avg_Recall", "F1"];
        if let Some(p) = probs {
            values.push(log_loss(p, y));
            values.push(roc_auc(p, y));
            names.push("LogLoss");
            names.push("AUC");
        }
        Ok((values, names))
    }
}

pub fn mae(pred: &Array1<f64>, y: &Array1<f64>) -> f64 {
    pred.iter().zip(y).map(|(p, t)| (p - t).abs()).sum::<f64>() / y.len().max(1) as f64
}

pub fn rmse(pred: &Array1<f64>, y: &Array1<f64>) -> f64 {
    (pred.iter().zip(y).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / y.len().max(1) as f64).sqrt()
}

pub fn r2(pred: &Array1<f64>, y: &Array1<f64>) -> f64 {
    let mean = y.sum() / y.len().max(1) as f64;
    let ss_res: f64 = pred.iter().zip(y).map(|(p, t)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Confusion matrix over the classes present in `y`, one row per true class.
fn confusion_matrix(pred: &Array1<usize>, y: &Array1<usize>) -> Result<ConfusionMatrix<usize>> {
    let truth = DatasetBase::new(Array2::<f64>::zeros((y.len(), 0)), y.clone());
    <Array1<usize> as ToConfusionMatrix<usize, _>>::confusion_matrix(pred, &truth)
        .map_err(|e| BenchError::InvalidData(format!("confusion matrix: {}", e)))
}

fn finite_or_zero(v: f32) -> f64 {
    if v.is_finite() {
        v as f64
    } else {
        0.0
    }
}

/// Per-class scores of the one-vs-rest split averaged over the classes of
/// the ground truth; undefined ratios count as 0.
fn macro_average(cm: &ConfusionMatrix<usize>, score: fn(&ConfusionMatrix<bool>) -> f32) -> f64 {
    let per_class = cm.split_one_vs_all();
    if per_class.is_empty() {
        return 0.0;
    }
    per_class.iter().map(|c| finite_or_zero(score(c))).sum::<f64>() / per_class.len() as f64
}

/// Fraction of correct predictions. Rows predicted as a class absent from
/// `y` are missing from the matrix and count as errors.
fn matrix_accuracy(cm: &ConfusionMatrix<usize>, pred: &Array1<usize>, y: &Array1<usize>) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let known: HashSet<usize> = y.iter().copied().collect();
    let in_matrix = pred.iter().filter(|p| known.contains(p)).count();
    finite_or_zero(cm.accuracy()) * in_matrix as f64 / y.len() as f64
}

pub fn accuracy(pred: &Array1<usize>, y: &Array1<usize>) -> Result<f64> {
    if y.is_empty() {
        return Ok(0.0);
    }
    let cm = confusion_matrix(pred, y)?;
    Ok(matrix_accuracy(&cm, pred, y))
}

/// Accuracy and the macro-averaged precision, recall and F1.
pub fn classification_scores(pred: &Array1<usize>, y: &Array1<usize>) -> Result<(f64, f64, f64, f64)> {
    if y.is_empty() {
        return Ok((0.0, 0.0, 0.0, 0.0));
    }
    let cm = confusion_matrix(pred, y)?;
    Ok((
        matrix_accuracy(&cm, pred, y),
        macro_average(&cm, ConfusionMatrix::precision),
        macro_average(&cm, ConfusionMatrix::recall),
        macro_average(&cm, ConfusionMatrix::f1_score),
    ))
}

/// F1 of the `positive` class alone. The members of a binary linfa matrix
/// are unordered, so the counts are taken directly.
pub fn binary_f1(pred: &Array1<usize>, y: &Array1<usize>, positive: usize) -> f64 {
    let (mut tp, mut wrong) = (0.0, 0.0);
    for (&p, &t) in pred.iter().zip(y) {
        match (p == positive, t == positive) {
            (true, true) => tp += 1.0,
            (true, false) | (false, true) => wrong += 1.0,
            _ => {}
        }
    }
    if tp == 0.0 {
        0.0
    } else {
        2.0 * tp / (2.0 * tp + wrong)
    }
}

pub fn log_loss(probs: &Array2<f64>, y: &Array1<usize>) -> f64 {
    let total: f64 = probs
        .outer_iter()
        .zip(y)
        .map(|(row, &t)| {
            let norm = row.sum();
            let p = if norm > 0.0 { row[t] / norm } else { 0.0 };
            -p.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS).ln()
        })
        .sum();
    total / y.len().max(1) as f64
}

/// Area under the ROC curve from the rank statistic, ties averaged.
/// Returns NaN when one of the two classes is absent.
pub fn binary_auc(scores: &[f64], positive: &[bool]) -> f64 {
    let n_pos = positive.iter().filter(|&&p| p).count();
    let n_neg = positive.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return f64::NAN;
    }
    let mut idx: Vec<usize> = (0..scores.len()).collect();
    idx.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < idx.len() {
        let mut j = i;
        while j + 1 < idx.len() && scores[idx[j + 1]] == scores[idx[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &k in &idx[i..=j] {
            ranks[k] = avg;
        }
        i = j + 1;
    }
    let pos_rank_sum: f64 = ranks.iter().zip(positive).filter(|(_, &p)| p).map(|(r, _)| r).sum();
    (pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0) / (n_pos * n_neg) as f64
}

/// Binary AUC on the positive-class column, or the macro one-vs-rest AUC.
pub fn roc_auc(probs: &Array2<f64>, y: &Array1<usize>) -> f64 {
    if probs.ncols() == 2 {
        let scores: Vec<f64> = probs.column(1).to_vec();
        let positive: Vec<bool> = y.iter().map(|&t| t == 1).collect();
        return binary_auc(&scores, &positive);
    }
    let aucs: Vec<f64> = (0..probs.ncols())
        .map(|c| {
            let scores: Vec<f64> = probs.column(c).to_vec();
            let positive: Vec<bool> = y.iter().map(|&t| t == c).collect();
            binary_auc(&scores, &positive)
        })
        .filter(|a| !a.is_nan())
        .collect();
    if aucs.is_empty() {
        f64::NAN
    } else {
        aucs.iter().sum::<f64>() / aucs.len() as f64
    }
}

pub fn softmax(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

pub fn argmax_rows(m: &Array2<f64>) -> Array1<usize> {
    m.outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}

/// Running mean of per-batch losses, reset at every epoch.
#[derive(Debug, Clone, Default)]
pub struct Averager {
    total: f64,
    count: usize,
}

impl Averager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    pub fn item(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// Training counters and per-epoch history of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLog {
    pub start_time: DateTime<Utc>,
    pub train_loss: Vec<f64>,
    pub val_metric: Vec<f64>,
    pub best_res: Option<f64>,
    pub best_epoch: Option<usize>,
    pub step: usize,
    pub epochs_run: usize,
    pub continue_training: bool,
    pub patience_counter: usize,
    /// The run stopped on a cancellation request.
    #[serde(default)]
    pub cancelled: bool,
}

impl Default for TrainingLog {
    fn default() -> Self {
        TrainingLog {
            start_time: Utc::now(),
            train_loss: Vec::new(),
            val_metric: Vec::new(),
            best_res: None,
            best_epoch: None,
            step: 0,
            epochs_run: 0,
            continue_training: true,
            patience_counter: 0,
            cancelled: false,
        }
    }
}

impl TrainingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a validation score and update the early-stopping state.
    /// Ties count as improvements. Returns whether training should continue.
    pub fn record_validation(&mut self, epoch: usize, score: f64, higher_is_better: bool, patience: usize) -> bool {
        self.val_metric.push(score);
        let improved = match self.best_res {
            None => true,
            Some(_) if epoch == 0 => true,
            Some(best) if higher_is_better => score >= best,
            Some(best) => score <= best,
        };
        if improved {
            self.best_res = Some(score);
            self.best_epoch = Some(epoch);
            self.patience_counter = 0;
        } else {
            self.patience_counter += 1;
            if self.patience_counter > patience {
                self.continue_training = false;
            }
        }
        self.continue_training
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
