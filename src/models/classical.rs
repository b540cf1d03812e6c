//! One-shot adapters for classical estimators.
//!
//! The estimator is fitted once on the full training partition, scored once
//! on validation, and the fitted estimator is written whole to
//! `best-val-{seed}.json`. There is no epoch loop and no optimizer state.
use std::fmt::Debug;
use std::fs;
use std::marker::PhantomData;
use std::sync::Arc;

use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{CatPolicy, MethodConfig, RunConfig};
use crate::data_handling::{Dataset, Partition, Partitions};
use crate::error::{BenchError, Result};
use crate::models::model_interface::{FitOptions, Method, PredictOutput, Stage};
use crate::models::session::{CancelToken, Session};
use crate::preprocessing::labels::Target;
use crate::stats::{accuracy, argmax_rows, r2, Predictions, TrainingLog};

pub const CHECKPOINT_NAME: &str = "best-val";

/// A classical estimator: a parameter set, a fit function and a fitted
/// model that serializes completely.
pub trait Estimator {
    const NAME: &'static str;

    type Params: DeserializeOwned + Default + Debug + Clone + Send;
    type Fitted: Serialize + DeserializeOwned + Send;

    /// Reject task types the estimator cannot handle.
    fn check_task(is_regression: bool) -> Result<()>;

    fn fit(params: &Self::Params, x: &Array2<f64>, y: &Target, seed: u64) -> Result<Self::Fitted>;

    fn predict(fitted: &Self::Fitted, x: &Array2<f64>) -> Result<Predictions>;
}

pub struct ClassicalMethod<E: Estimator> {
    session: Session,
    is_regression: bool,
    params: Option<E::Params>,
    fitted: Option<E::Fitted>,
    _estimator: PhantomData<fn() -> E>,
}

impl<E: Estimator> ClassicalMethod<E> {
    pub fn new(config: Arc<RunConfig>, is_regression: bool) -> Result<Self> {
        E::check_task(is_regression)?;
        if config.cat_policy == CatPolicy::Indices {
            return Err(BenchError::PolicyViolation(format!(
                "{} needs numeric input; categorical policy `indices` is not supported",
                E::NAME
            )));
        }
        Ok(ClassicalMethod {
            session: Session::new(config)?,
            is_regression,
            params: None,
            fitted: None,
            _estimator: PhantomData,
        })
    }

    pub fn params(&self) -> Option<&E::Params> {
        self.params.as_ref()
    }

    /// The estimator fitted or loaded by the last `fit`/`predict`.
    pub fn fitted(&self) -> Option<&E::Fitted> {
        self.fitted.as_ref()
    }

    fn train_once(&mut self) -> Result<()> {
        let params = self
            .params
            .clone()
            .ok_or_else(|| BenchError::InvalidState("model has not been constructed".into()))?;
        self.session.transition(Stage::Training)?;
        let seed = self.session.config().seed;
        let processed = self.session.processed()?;
        let (x_train, y_train) = partition(&processed.n, &processed.y, Partition::Train)?;
        log::info!(
            "Fitting {} on {} rows x {} features",
            E::NAME,
            x_train.nrows(),
            x_train.ncols()
        );
        let fitted = E::fit(&params, x_train, y_train, seed)?;

        self.session.transition(Stage::Validating)?;
        let processed = self.session.processed()?;
        let (x_val, y_val) = partition(&processed.n, &processed.y, Partition::Val)?;
        let score = validation_score(&E::predict(&fitted, x_val)?, y_val)?;
        log::info!("{} validation score: {:.6}", E::NAME, score);
        let trlog = self.session.trlog_mut();
        trlog.val_metric.push(score);
        trlog.best_res = Some(score);
        trlog.best_epoch = Some(0);
        trlog.epochs_run = 1;
        trlog.continue_training = false;

        self.session.ensure_save_dir()?;
        let path = self.session.artifact_path(CHECKPOINT_NAME, "json");
        fs::write(&path, serde_json::to_string(&fitted)?)?;
        self.session.persist_run()?;
        log::info!("Saved {} checkpoint to {:?}", E::NAME, path);
        self.fitted = Some(fitted);
        self.session.transition(Stage::Checkpointed)
    }
}

fn partition<'a>(
    n: &'a Partitions<Array2<f64>>,
    y: &'a Partitions<Target>,
    part: Partition,
) -> Result<(&'a Array2<f64>, &'a Target)> {
    match (n.get(&part), y.get(&part)) {
        (Some(x), Some(t)) => Ok((x, t)),
        _ => Err(BenchError::InvalidData(format!("dataset has no {} partition", part))),
    }
}

/// Accuracy for classifiers, R2 for regressors.
fn validation_score(pred: &Predictions, y: &Target) -> Result<f64> {
    match (pred, y) {
        (Predictions::Values(p), Target::Continuous(t)) => Ok(r2(p, t)),
        (Predictions::Labels(p), Target::Classes(t)) => accuracy(p, t),
        (Predictions::Probabilities(p) | Predictions::Logits(p), Target::Classes(t)) => {
            accuracy(&argmax_rows(p), t)
        }
        _ => Err(BenchError::InvalidData(
            "predictions do not match the target kind".into(),
        )),
    }
}

impl<E: Estimator> Method for ClassicalMethod<E> {
    fn name(&self) -> &'static str {
        E::NAME
    }

    fn stage(&self) -> Stage {
        self.session.stage()
    }

    fn checkpoint_name(&self) -> &'static str {
        CHECKPOINT_NAME
    }

    fn construct_model(&mut self, config: Option<&MethodConfig>) -> Result<()> {
        self.session.check_transition(Stage::ModelConstructed)?;
        let params: E::Params = match config {
            Some(c) => c.model_params()?,
            None => self.session.config().config.model_params()?,
        };
        log::debug!("Constructed {} with {:?}", E::NAME, params);
        self.params = Some(params);
        self.fitted = None;
        self.session.transition(Stage::ModelConstructed)
    }

    fn fit(&mut self, data: Dataset, options: FitOptions) -> Result<()> {
        if data.is_regression() != self.is_regression {
            return Err(BenchError::InvalidData(format!(
                "{} was constructed for a different task type",
                E::NAME
            )));
        }
        self.session.bind(data, options.reuse_pipeline)?;
        self.construct_model(options.config.as_ref())?;
        if !options.train {
            return Ok(());
        }
        let result = self.train_once();
        if result.is_err() {
            self.session.abort_training();
        }
        result
    }

    fn predict(&mut self, data: &Dataset, model_name: &str) -> Result<PredictOutput> {
        self.session.check_transition(Stage::PredictReady)?;
        let path = self.session.artifact_path(model_name, "json");
        self.session.require_artifact(&path)?;
        let fitted: E::Fitted = serde_json::from_str(&fs::read_to_string(&path)?)?;

        let processed = self.session.prepare_inference(data)?;
        let part = processed.inference_partition()?;
        let (x, y) = partition(&processed.n, &processed.y, part)?;
        let predictions = E::predict(&fitted, x)?;
        let (metrics, metric_names) = self.session.evaluator()?.evaluate(&predictions, y)?;

        self.fitted = Some(fitted);
        self.session.transition(Stage::PredictReady)?;
        Ok(PredictOutput {
            metrics,
            metric_names,
            predictions,
        })
    }

    fn training_log(&self) -> &TrainingLog {
        self.session.trlog()
    }

    fn cancel_token(&self) -> CancelToken {
        self.session.cancel_token()
    }
}
