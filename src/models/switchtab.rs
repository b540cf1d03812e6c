//! SwitchTab adapter: paired self-supervised training with a supervised head,
//! checkpointed after the last epoch.
use std::fs;
use std::path::Path;
use std::sync::Arc;

use candle_core::Tensor;
use candle_nn::{Optimizer, VarMap};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::building_blocks::optim::{ParamsRmsProp, RmsProp};
use crate::building_blocks::switchtab::{create_var_map, SwitchTab, SwitchTabConfig};
use crate::config::{CatPolicy, MethodConfig, RunConfig, TrainingConfig};
use crate::data_handling::{Dataset, Partition};
use crate::error::{BenchError, Result};
use crate::loader::{self, collect_rows, Criterion, Loader, Loaders};
use crate::models::model_interface::{FitOptions, Method, PredictOutput, Stage};
use crate::models::session::{run_epoch_loop, CancelToken, EpochRunner, Session};
use crate::stats::{Averager, Evaluator, Predictions, TrainingLog};

pub const CHECKPOINT_NAME: &str = "epoch-last";

/// Extension of the hyper-parameter file written next to each checkpoint.
const PARAMS_EXT: &str = "params.json";

const LOG_EVERY: usize = 50;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SwitchTabParams {
    /// Weight of the supervised loss against the reconstruction loss.
    pub alpha: f64,
    pub hidden_dim: usize,
    /// Share of features replaced in every training row.
    pub corruption_ratio: f64,
}

impl SwitchTabParams {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Early-stopping hook evaluated after every validation pass, on top of the
/// patience rule. Returning false ends training after the current epoch.
pub type ContinueRule = Box<dyn FnMut(&TrainingLog) -> bool + Send>;

impl Default for SwitchTabParams {
    fn default() -> Self {
        SwitchTabParams {
            alpha: 1.0,
            hidden_dim: 256,
            corruption_ratio: 0.3,
        }
    }
}

/// Replace `floor(ratio * d)` randomly chosen features of every row by the
/// same feature of a random row.
pub fn corrupt_features(x: &Array2<f64>, ratio: f64, seed: u64) -> Array2<f64> {
    let (n, d) = x.dim();
    let k = ((d as f64) * ratio.clamp(0.0, 1.0)).floor() as usize;
    let mut out = x.clone();
    if n == 0 || k == 0 {
        return out;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let columns: Vec<usize> = (0..d).collect();
    for i in 0..n {
        let picked: Vec<usize> = columns.choose_multiple(&mut rng, k).copied().collect();
        for j in picked {
            let donor = rng.gen_range(0..n);
            out[[i, j]] = x[[donor, j]];
        }
    }
    out
}

pub struct SwitchTabMethod {
    session: Session,
    is_regression: bool,
    params: Option<SwitchTabParams>,
    var_map: VarMap,
    net: Option<SwitchTab>,
    optimizer: Option<RmsProp>,
    continue_rule: Option<ContinueRule>,
}

impl SwitchTabMethod {
    pub fn new(config: Arc<RunConfig>, is_regression: bool) -> Result<Self> {
        if config.cat_policy == CatPolicy::Indices {
            return Err(BenchError::PolicyViolation(
                "switchtab needs numeric input; categorical policy `indices` is not supported".into(),
            ));
        }
        Ok(SwitchTabMethod {
            session: Session::new(config)?,
            is_regression,
            params: None,
            var_map: VarMap::new(),
            net: None,
            optimizer: None,
            continue_rule: None,
        })
    }

    pub fn set_continue_rule<F>(&mut self, rule: F)
    where
        F: FnMut(&TrainingLog) -> bool + Send + 'static,
    {
        self.continue_rule = Some(Box::new(rule));
    }

    pub fn params(&self) -> Option<&SwitchTabParams> {
        self.params.as_ref()
    }

    /// Build fresh, seeded weights for `d_in` features and `d_out` outputs.
    fn build_net(&mut self, params: &SwitchTabParams, training: &TrainingConfig) -> Result<()> {
        let pipeline = self.session.pipeline()?;
        if pipeline.d_in == 0 {
            return Err(BenchError::PolicyViolation(
                "switchtab needs at least one numeric feature".into(),
            ));
        }
        let net_config = SwitchTabConfig {
            feature_size: pipeline.d_in,
            num_classes: pipeline.d_out,
            hidden_dim: params.hidden_dim,
            alpha: params.alpha,
        };
        let device = self.session.device().clone();
        let var_map = VarMap::new();
        create_var_map(&var_map, &net_config, self.session.config().seed, &device)?;
        let net = SwitchTab::from_var_map(&var_map, &net_config, &device)?;
        let optimizer = RmsProp::new(
            var_map.all_vars(),
            ParamsRmsProp {
                lr: training.lr,
                weight_decay: training.weight_decay,
                ..ParamsRmsProp::default()
            },
        )?;
        log::debug!("Constructed switchtab {:?} with {:?}", net_config, training);
        self.var_map = var_map;
        self.net = Some(net);
        self.optimizer = Some(optimizer);
        Ok(())
    }

    fn train_loop(&mut self) -> Result<()> {
        let config = self.session.config().clone();
        let params = self.params.clone().unwrap_or_default();
        let mut processed = self.session.processed()?.clone();
        if let Some(x) = processed.n.get_mut(&Partition::Train) {
            *x = corrupt_features(x, params.corruption_ratio, config.seed);
        }
        let (loaders, criterion) = loader::build(
            self.is_regression,
            &processed,
            self.session.device(),
            config.batch_size,
            true,
            config.seed,
        )?;
        let (train, val) = match loaders {
            Loaders::Train { train, val } => (train, val),
            Loaders::Inference(_) => {
                return Err(BenchError::InvalidState("expected training loaders".into()))
            }
        };
        let criterion = criterion.unwrap_or_else(|| Criterion::for_task(self.is_regression));
        let evaluator = self.session.evaluator()?;
        let cancel = self.session.cancel_token();

        let SwitchTabMethod {
            session,
            net,
            optimizer,
            is_regression,
            continue_rule,
            ..
        } = &mut *self;
        let (net, optimizer) = match (net.as_ref(), optimizer.as_mut()) {
            (Some(n), Some(o)) => (n, o),
            _ => return Err(BenchError::InvalidState("model has not been constructed".into())),
        };
        let mut trainer = Trainer {
            session,
            net,
            optimizer,
            train,
            val,
            criterion,
            evaluator,
            is_regression: *is_regression,
            patience: config.early_stop_patience,
            continue_rule: continue_rule.as_mut(),
        };
        let epochs = run_epoch_loop(&mut trainer, config.max_epoch, &cancel)?;
        let cancelled =
            cancel.is_cancelled() && epochs < config.max_epoch && self.session.trlog().continue_training;
        if cancelled && epochs == 0 {
            log::warn!("Training cancelled before the first epoch, existing checkpoints are kept");
            self.session.discard_pipeline();
            self.net = None;
            self.optimizer = None;
            return Err(BenchError::Cancelled { epochs_run: 0 });
        }
        if cancelled {
            log::warn!("Training cancelled after {} epochs", epochs);
        } else {
            log::info!("Training finished after {} epochs", epochs);
        }
        self.session.trlog_mut().cancelled = cancelled;

        self.session.ensure_save_dir()?;
        let path = self.session.artifact_path(CHECKPOINT_NAME, "safetensors");
        self.var_map.save(&path)?;
        params.save(self.session.artifact_path(CHECKPOINT_NAME, PARAMS_EXT))?;
        self.session.persist_run()?;
        log::info!("Saved switchtab checkpoint to {:?}", path);
        self.session.transition(Stage::Checkpointed)
    }
}

struct Trainer<'a> {
    session: &'a mut Session,
    net: &'a SwitchTab,
    optimizer: &'a mut RmsProp,
    train: Loader,
    val: Loader,
    criterion: Criterion,
    evaluator: Evaluator,
    is_regression: bool,
    patience: usize,
    continue_rule: Option<&'a mut ContinueRule>,
}

impl<'a> EpochRunner for Trainer<'a> {
    fn train_epoch(&mut self, epoch: usize) -> Result<()> {
        self.session.transition(Stage::Training)?;
        let n_batches = self.train.len();
        let lr = self.optimizer.learning_rate();
        let alpha = self.net.alpha();
        let mut tl = Averager::new();

        for (i, pair) in self.train.paired_epoch().enumerate() {
            let (b1, b2) = pair?;
            if b1.x_cat.is_some() {
                return Err(BenchError::PolicyViolation(
                    "switchtab received a categorical index matrix".into(),
                ));
            }
            let out = self.net.forward_pair(&b1.x_num, &b2.x_num)?;
            let recon = candle_nn::loss::mse(&out.x1_recon, &b1.x_num)?
                .add(&candle_nn::loss::mse(&out.x2_recon, &b2.x_num)?)?
                .add(&candle_nn::loss::mse(&out.x1_switched, &b1.x_num)?)?
                .add(&candle_nn::loss::mse(&out.x2_switched, &b2.x_num)?)?;
            let sup = self
                .criterion
                .loss(&out.x1_pred, &b1.y)?
                .add(&self.criterion.loss(&out.x2_pred, &b2.y)?)?;
            let loss = recon.add(&sup.affine(alpha, 0.0)?)?;

            let value = loss.to_scalar::<f64>()?;
            let trlog = self.session.trlog_mut();
            if !value.is_finite() {
                return Err(BenchError::TrainingDivergence {
                    epoch,
                    step: trlog.step,
                    loss: value,
                });
            }
            self.optimizer.backward_step(&loss)?;
            trlog.step += 1;
            tl.add(value);

            if i % LOG_EVERY == 0 || i + 1 == n_batches {
                log::info!(
                    "epoch {}, train {}/{}, loss={:.4} lr={:.4e}",
                    epoch,
                    i,
                    n_batches,
                    value,
                    lr
                );
            }
        }
        self.session.trlog_mut().train_loss.push(tl.item());
        Ok(())
    }

    fn validate(&mut self, epoch: usize) -> Result<bool> {
        self.session.transition(Stage::Validating)?;
        let predictions = infer(self.net, &mut self.val, self.is_regression)?;
        let (metrics, names) = self.evaluator.evaluate(&predictions, self.val.targets())?;
        let score = metrics
            .first()
            .copied()
            .ok_or_else(|| BenchError::InvalidData("evaluator returned no metrics".into()))?;
        let higher_is_better = self.evaluator.higher_is_better();

        let trlog = self.session.trlog_mut();
        let mut continue_training = trlog.record_validation(epoch, score, higher_is_better, self.patience);
        trlog.epochs_run = epoch + 1;
        if let Some(rule) = self.continue_rule.as_mut() {
            continue_training = continue_training && (**rule)(&*trlog);
            trlog.continue_training = continue_training;
        }
        log::info!(
            "epoch {}, val {} = {:.4}, train loss = {:.4}, best epoch {:?} ({:?})",
            epoch,
            names[0],
            score,
            trlog.train_loss.last().copied().unwrap_or(f64::NAN),
            trlog.best_epoch,
            trlog.best_res
        );
        Ok(continue_training)
    }
}

/// Ordered pass over `loader`; regression heads yield values, classifier
/// heads yield logits.
fn infer(net: &SwitchTab, loader: &mut Loader, is_regression: bool) -> Result<Predictions> {
    if loader.is_empty() {
        return Err(BenchError::InvalidData("cannot predict on an empty partition".into()));
    }
    let mut chunks: Vec<Tensor> = Vec::with_capacity(loader.len());
    for batch in loader.epoch() {
        let batch = batch?;
        if batch.x_cat.is_some() {
            return Err(BenchError::PolicyViolation(
                "switchtab received a categorical index matrix".into(),
            ));
        }
        chunks.push(net.predict(&batch.x_num)?);
    }
    let out = collect_rows(&chunks)?;
    if is_regression {
        Ok(Predictions::Values(out.column(0).to_owned()))
    } else {
        Ok(Predictions::Logits(out))
    }
}

impl Method for SwitchTabMethod {
    fn name(&self) -> &'static str {
        "switchtab"
    }

    fn stage(&self) -> Stage {
        self.session.stage()
    }

    fn checkpoint_name(&self) -> &'static str {
        CHECKPOINT_NAME
    }

    fn construct_model(&mut self, config: Option<&MethodConfig>) -> Result<()> {
        self.session.check_transition(Stage::ModelConstructed)?;
        let config = config.cloned().unwrap_or_else(|| self.session.config().config.clone());
        let params: SwitchTabParams = config.model_params()?;
        self.build_net(&params, &config.training)?;
        self.params = Some(params);
        self.session.transition(Stage::ModelConstructed)
    }

    fn fit(&mut self, data: Dataset, options: FitOptions) -> Result<()> {
        if data.is_regression() != self.is_regression {
            return Err(BenchError::InvalidData(
                "switchtab was constructed for a different task type".into(),
            ));
        }
        self.session.bind(data, options.reuse_pipeline)?;
        self.construct_model(options.config.as_ref())?;
        if !options.train {
            return Ok(());
        }
        let result = self.train_loop();
        self.session.cancel_token().reset();
        if result.is_err() {
            self.session.abort_training();
        }
        result
    }

    fn predict(&mut self, data: &Dataset, model_name: &str) -> Result<PredictOutput> {
        self.session.check_transition(Stage::PredictReady)?;
        let path = self.session.artifact_path(model_name, "safetensors");
        self.session.require_artifact(&path)?;

        let processed = self.session.prepare_inference(data)?;
        // The checkpoint is shaped by the parameters it was trained with,
        // which may differ from both the run config and this instance.
        let params_path = self.session.artifact_path(model_name, PARAMS_EXT);
        let params = if params_path.exists() {
            SwitchTabParams::load(&params_path)?
        } else if let Some(params) = self.params.clone() {
            params
        } else {
            self.session.config().config.model_params()?
        };
        if self.net.is_none() || self.params.as_ref() != Some(&params) {
            let training = self.session.config().config.training.clone();
            self.build_net(&params, &training)?;
            self.params = Some(params);
        }
        self.var_map.load(&path)?;
        log::debug!("Loaded switchtab weights from {:?}", path);

        let (loaders, _) = loader::build(
            self.is_regression,
            &processed,
            self.session.device(),
            self.session.config().batch_size,
            false,
            self.session.config().seed,
        )?;
        let mut loader = match loaders {
            Loaders::Inference(l) => l,
            Loaders::Train { .. } => {
                return Err(BenchError::InvalidState("expected an inference loader".into()))
            }
        };
        let net = self
            .net
            .as_ref()
            .ok_or_else(|| BenchError::InvalidState("model has not been constructed".into()))?;
        let predictions = infer(net, &mut loader, self.is_regression)?;
        let (metrics, metric_names) = self
            .session
            .evaluator()?
            .evaluate(&predictions, loader.targets())?;

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

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn corruption_keeps_values_within_their_column() {
        let x = array![[1.0, 10.0, 100.0], [2.0, 20.0, 200.0], [3.0, 30.0, 300.0], [4.0, 40.0, 400.0]];
        let out = corrupt_features(&x, 0.5, 3);
        for j in 0..3 {
            for v in out.column(j) {
                assert!(x.column(j).iter().any(|w| w == v));
            }
        }
        assert_eq!(out, corrupt_features(&x, 0.5, 3));
    }

    #[test]
    fn zero_ratio_leaves_rows_untouched() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        assert_eq!(corrupt_features(&x, 0.0, 0), x);
    }
}
