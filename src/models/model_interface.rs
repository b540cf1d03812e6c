//! The lifecycle contract every method implements.
//!
//! Required call order: `fit` binds a dataset, fits the preprocessing
//! pipeline, constructs the model and (optionally) trains and checkpoints
//! it; `predict` replays the pipeline on new rows and evaluates the
//! checkpointed model. Out-of-order calls fail with `InvalidState`.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MethodConfig;
use crate::data_handling::Dataset;
use crate::error::Result;
use crate::models::session::CancelToken;
use crate::stats::{Predictions, TrainingLog};

/// Lifecycle stage of a method instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Uninitialized,
    DatasetBound,
    PipelineFit,
    ModelConstructed,
    Training,
    Validating,
    Checkpointed,
    PredictReady,
}

impl Stage {
    /// Whether `self -> to` is a legal transition.
    pub fn can_transition(self, to: Stage) -> bool {
        use Stage::*;
        match (self, to) {
            (Uninitialized, DatasetBound) | (Uninitialized, PredictReady) => true,
            (DatasetBound, PipelineFit) => true,
            (PipelineFit, ModelConstructed) => true,
            (ModelConstructed, Training)
            | (ModelConstructed, Checkpointed)
            | (ModelConstructed, PredictReady) => true,
            (Training, Validating) => true,
            (Validating, Training) | (Validating, Checkpointed) => true,
            (Checkpointed, PredictReady) | (PredictReady, PredictReady) => true,
            // re-construct with another config
            (ModelConstructed | Checkpointed | PredictReady, ModelConstructed) => true,
            // rebind from any stage outside the training loop
            (from, DatasetBound) => !from.is_training(),
            _ => false,
        }
    }

    pub fn is_training(self) -> bool {
        matches!(self, Stage::Training | Stage::Validating)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Options of a `fit` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    /// Train the model. When false only the pipeline and model are set up,
    /// so that a prior checkpoint can be loaded for prediction.
    pub train: bool,
    /// Replay an already fitted pipeline on the new dataset instead of
    /// refitting it (hyper-parameter search over one dataset).
    pub reuse_pipeline: bool,
    /// Model/training configuration overriding the run configuration.
    pub config: Option<MethodConfig>,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            train: true,
            reuse_pipeline: false,
            config: None,
        }
    }
}

/// Result of `predict`: metric values paired positionally with their names,
/// and the raw predictions they were computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictOutput {
    pub metrics: Vec<f64>,
    pub metric_names: Vec<&'static str>,
    pub predictions: Predictions,
}

impl PredictOutput {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metric_names
            .iter()
            .position(|n| *n == name)
            .map(|i| self.metrics[i])
    }
}

/// The uniform surface of every method.
pub trait Method: Send {
    /// Registry name of the method.
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    /// File stem of the checkpoint this method writes (`best-val` or `epoch-last`).
    fn checkpoint_name(&self) -> &'static str;

    /// (Re)build the model from `config` or the run configuration. Requires
    /// a fitted pipeline; may be called repeatedly.
    fn construct_model(&mut self, config: Option<&MethodConfig>) -> Result<()>;

    fn fit(&mut self, data: Dataset, options: FitOptions) -> Result<()>;

    /// Load the artifact `{model_name}-{seed}` from the save path, replay the
    /// pipeline on `data` and evaluate.
    fn predict(&mut self, data: &Dataset, model_name: &str) -> Result<PredictOutput>;

    fn training_log(&self) -> &TrainingLog;

    /// Token honoured at epoch boundaries by learned methods.
    fn cancel_token(&self) -> CancelToken;
}
