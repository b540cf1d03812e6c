//! Replayable preprocessing pipeline.
//!
//! Four stages run in a fixed order: NaN handling, categorical encoding,
//! normalization and label processing. Each stage learns its parameters from
//! the training partition only; the fitted parameters form a
//! [`PipelineState`] that can be serialized and replayed on new rows with
//! [`apply`] without access to the training data.
//!
//! The label stage is fitted first because target-aware encoding consumes
//! the processed training targets; it only ever touches `y`.
pub mod encoding;
pub mod labels;
pub mod nan;
pub mod normalization;

use std::fs;
use std::path::Path;

use ndarray::{concatenate, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::{CatNanPolicy, CatPolicy, Normalization, NumNanPolicy, RunConfig, TargetPolicy};
use crate::data_handling::{Dataset, Partition, Partitions, TaskInfo};
use crate::error::{BenchError, Result};

use self::encoding::{CategoryEncoder, Encoded};
use self::labels::{LabelEncoder, Target, YInfo};
use self::nan::{CatImputer, NumImputer};
use self::normalization::Normalizer;

/// Policies a pipeline was fitted with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    pub num_nan_policy: NumNanPolicy,
    pub cat_nan_policy: CatNanPolicy,
    pub cat_policy: CatPolicy,
    pub normalization: Normalization,
    pub target_policy: TargetPolicy,
}

impl PolicySet {
    pub fn from_config(config: &RunConfig) -> Self {
        PolicySet {
            num_nan_policy: config.num_nan_policy,
            cat_nan_policy: config.cat_nan_policy,
            cat_policy: config.cat_policy,
            normalization: config.normalization,
            target_policy: config.target_policy,
        }
    }
}

/// Fitted parameters of every pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub policies: PolicySet,
    pub seed: u64,
    pub task: TaskInfo,
    pub num_imputer: Option<NumImputer>,
    pub cat_imputer: Option<CatImputer>,
    pub encoder: Option<CategoryEncoder>,
    pub normalizer: Option<Normalizer>,
    pub labels: LabelEncoder,
    /// Width of the processed numeric matrix.
    pub d_in: usize,
    /// Model output width: 1 for regression, the class count otherwise.
    pub d_out: usize,
}

impl PipelineState {
    pub fn y_info(&self) -> YInfo {
        self.labels.y_info()
    }

    pub fn n_classes(&self) -> Option<usize> {
        self.labels.n_classes()
    }

    /// Per-column code counts when categories stay a separate index matrix.
    pub fn category_sizes(&self) -> Option<Vec<usize>> {
        self.encoder
            .as_ref()
            .filter(|e| !e.policy.folds_into_numeric())
            .map(|e| e.category_sizes())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        log::debug!("Saved pipeline state to {:?}", path);
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BenchError::MissingArtifact {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Partitions after every pipeline stage. `c` is present only under the
/// `indices` categorical policy; every other policy folds categories into `n`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedData {
    pub n: Partitions<Array2<f64>>,
    pub c: Option<Partitions<Array2<usize>>>,
    pub y: Partitions<Target>,
}

impl ProcessedData {
    pub fn n_rows(&self, part: Partition) -> Option<usize> {
        self.y.get(&part).map(|y| y.len())
    }

    /// Partition evaluated at inference: the only one present, else `test`.
    pub fn inference_partition(&self) -> Result<Partition> {
        match self.y.keys().copied().collect::<Vec<_>>().as_slice() {
            [only] => Ok(*only),
            _ if self.y.contains_key(&Partition::Test) => Ok(Partition::Test),
            _ => Err(BenchError::InvalidData(
                "inference data needs a test partition".into(),
            )),
        }
    }
}

/// Fit every stage on the training partition and transform all partitions.
pub fn fit_and_apply(dataset: &Dataset, config: &RunConfig) -> Result<(ProcessedData, PipelineState)> {
    let state = fit(dataset, config)?;
    let processed = apply(dataset, &state)?;
    log::info!(
        "Pipeline fitted: d_in = {}, d_out = {}, partitions = {:?}",
        state.d_in,
        state.d_out,
        dataset.partitions()
    );
    Ok((processed, state))
}

fn fit(dataset: &Dataset, config: &RunConfig) -> Result<PipelineState> {
    let train = Partition::Train;
    let policies = PolicySet::from_config(config);
    let task = *dataset.info();

    let train_y = dataset
        .y()
        .get(&train)
        .ok_or_else(|| BenchError::InvalidData("fitting the pipeline requires a train partition".into()))?;
    let labels = LabelEncoder::fit(train_y, task.task_type, policies.target_policy)?;
    let y_train = labels.apply(train_y, train)?.to_f64();

    let n_train = dataset.n().and_then(|n| n.get(&train));
    let num_imputer = n_train.map(|x| NumImputer::fit(x, policies.num_nan_policy));
    let n_train = match (n_train, &num_imputer) {
        (Some(x), Some(imp)) => Some(imp.apply(x)?),
        _ => None,
    };

    let c_train = dataset.c().and_then(|c| c.get(&train));
    let cat_imputer = c_train.map(|x| CatImputer::fit(x, policies.cat_nan_policy));
    let mut encoder = None;
    let mut n_train_encoded = n_train;
    if let (Some(x), Some(imp)) = (c_train, &cat_imputer) {
        let filled = imp.apply(x)?;
        let enc = CategoryEncoder::fit(&filled, policies.cat_policy, Some(&y_train))?;
        if let Encoded::Numeric(block) = enc.encode(&filled)? {
            n_train_encoded = Some(hstack(n_train_encoded, block)?);
        }
        encoder = Some(enc);
    }

    let normalizer = n_train_encoded
        .as_ref()
        .map(|x| Normalizer::fit(x, policies.normalization, config.seed))
        .transpose()?;

    let d_in = n_train_encoded.as_ref().map_or(0, |x| x.ncols());
    let d_out = labels.n_classes().unwrap_or(1);

    Ok(PipelineState {
        policies,
        seed: config.seed,
        task,
        num_imputer,
        cat_imputer,
        encoder,
        normalizer,
        labels,
        d_in,
        d_out,
    })
}

/// Replay a fitted pipeline on every partition of `dataset`. The state is
/// only read; no parameter is re-estimated.
pub fn apply(dataset: &Dataset, state: &PipelineState) -> Result<ProcessedData> {
    if dataset.info().task_type != state.task.task_type {
        return Err(BenchError::InvalidData(format!(
            "pipeline fitted for {:?}, dataset is {:?}",
            state.task.task_type,
            dataset.info().task_type
        )));
    }

    let mut n_out: Partitions<Array2<f64>> = Partitions::new();
    let mut c_out: Partitions<Array2<usize>> = Partitions::new();
    let mut y_out: Partitions<Target> = Partitions::new();

    for part in dataset.partitions() {
        let raw_y = &dataset.y()[&part];
        let n_rows = raw_y.len();
        y_out.insert(part, state.labels.apply(raw_y, part)?);

        let mut x_num = match (dataset.n().and_then(|n| n.get(&part)), &state.num_imputer) {
            (Some(x), Some(imp)) => Some(imp.apply(x)?),
            (None, None) => None,
            _ => {
                return Err(BenchError::InvalidData(format!(
                    "numeric features of {} partition do not match the fitted pipeline",
                    part
                )))
            }
        };

        match (dataset.c().and_then(|c| c.get(&part)), &state.cat_imputer, &state.encoder) {
            (Some(x), Some(imp), Some(enc)) => match enc.encode(&imp.apply(x)?)? {
                Encoded::Numeric(block) => x_num = Some(hstack(x_num, block)?),
                Encoded::Indices(idx) => {
                    c_out.insert(part, idx);
                }
            },
            (None, None, None) => {}
            _ => {
                return Err(BenchError::InvalidData(format!(
                    "categorical features of {} partition do not match the fitted pipeline",
                    part
                )))
            }
        }

        let x_num = match (x_num, &state.normalizer) {
            (Some(x), Some(norm)) => norm.apply(&x)?,
            (Some(x), None) => x,
            (None, _) => Array2::zeros((n_rows, 0)),
        };
        n_out.insert(part, x_num);
    }

    Ok(ProcessedData {
        n: n_out,
        c: if c_out.is_empty() { None } else { Some(c_out) },
        y: y_out,
    })
}

fn hstack(left: Option<Array2<f64>>, right: Array2<f64>) -> Result<Array2<f64>> {
    match left {
        Some(l) => Ok(concatenate(Axis(1), &[l.view(), right.view()])?),
        None => Ok(right),
    }
}
