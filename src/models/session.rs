//! Shared scaffolding of every method: lifecycle stage, bound dataset,
//! fitted pipeline, artifact paths and the epoch loop.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use candle_core::Device;

use crate::config::RunConfig;
use crate::data_handling::Dataset;
use crate::error::{BenchError, Result};
use crate::models::model_interface::Stage;
use crate::preprocessing::{self, PipelineState, ProcessedData};
use crate::stats::{Evaluator, TrainingLog};
use crate::utils::get_device;

/// Cooperative cancellation flag, checked between epochs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Withdraw a pending request. Called once a training run has observed it.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One epoch of training followed by one validation pass.
pub trait EpochRunner {
    fn train_epoch(&mut self, epoch: usize) -> Result<()>;

    /// Validate and return the continue-training flag.
    fn validate(&mut self, epoch: usize) -> Result<bool>;
}

/// Run epochs until the runner's continue flag turns false, `max_epoch`
/// epochs have run or cancellation is requested. Cancellation is only
/// observed between epochs. Returns the number of completed epochs.
pub fn run_epoch_loop<R: EpochRunner + ?Sized>(
    runner: &mut R,
    max_epoch: usize,
    cancel: &CancelToken,
) -> Result<usize> {
    let mut epochs_run = 0;
    for epoch in 0..max_epoch {
        if cancel.is_cancelled() {
            log::info!("Cancellation requested, stopping before epoch {}", epoch);
            break;
        }
        let tic = Instant::now();
        runner.train_epoch(epoch)?;
        let continue_training = runner.validate(epoch)?;
        epochs_run += 1;
        log::info!(
            "Epoch: {}, Time cost: {:.3}s",
            epoch,
            tic.elapsed().as_secs_f64()
        );
        if !continue_training {
            log::info!("Early stopping after epoch {}", epoch);
            break;
        }
    }
    Ok(epochs_run)
}

/// Per-instance state shared by all adapters.
pub struct Session {
    config: Arc<RunConfig>,
    device: Device,
    stage: Stage,
    dataset: Option<Dataset>,
    pipeline: Option<PipelineState>,
    processed: Option<ProcessedData>,
    trlog: TrainingLog,
    cancel: CancelToken,
}

impl Session {
    pub fn new(config: Arc<RunConfig>) -> Result<Self> {
        config.validate()?;
        let device = get_device(&config.device)?;
        Ok(Session {
            config,
            device,
            stage: Stage::Uninitialized,
            dataset: None,
            pipeline: None,
            processed: None,
            trlog: TrainingLog::new(),
            cancel: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn check_transition(&self, to: Stage) -> Result<()> {
        if self.stage.can_transition(to) {
            Ok(())
        } else {
            Err(BenchError::InvalidState(format!(
                "cannot move from {} to {}",
                self.stage, to
            )))
        }
    }

    pub fn transition(&mut self, to: Stage) -> Result<()> {
        self.check_transition(to)?;
        log::trace!("Stage {} -> {}", self.stage, to);
        self.stage = to;
        Ok(())
    }

    /// Leave the training loop after a failed run so the instance can be
    /// refit or reconstructed.
    pub fn abort_training(&mut self) {
        if self.stage.is_training() {
            log::warn!("Training aborted during {}", self.stage);
            self.stage = Stage::ModelConstructed;
        }
    }

    /// Bind `data` and fit the pipeline on its training partition, or, with
    /// `reuse_pipeline` and an already fitted pipeline, replay that pipeline
    /// on `data` without refitting.
    pub fn bind(&mut self, data: Dataset, reuse_pipeline: bool) -> Result<()> {
        self.transition(Stage::DatasetBound)?;
        let processed = if reuse_pipeline && self.pipeline.is_some() {
            log::info!("Reusing fitted pipeline");
            preprocessing::apply(&data, self.pipeline()?)?
        } else {
            let (processed, state) = preprocessing::fit_and_apply(&data, &self.config)?;
            self.pipeline = Some(state);
            processed
        };
        self.dataset = Some(data);
        self.processed = Some(processed);
        self.trlog = TrainingLog::new();
        self.transition(Stage::PipelineFit)
    }

    /// Drop the in-memory pipeline so the next prediction replays the
    /// persisted one.
    pub fn discard_pipeline(&mut self) {
        self.pipeline = None;
        self.processed = None;
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    pub fn pipeline(&self) -> Result<&PipelineState> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| BenchError::InvalidState("pipeline has not been fitted".into()))
    }

    pub fn processed(&self) -> Result<&ProcessedData> {
        self.processed
            .as_ref()
            .ok_or_else(|| BenchError::InvalidState("no dataset has been bound".into()))
    }

    pub fn evaluator(&self) -> Result<Evaluator> {
        Ok(Evaluator::from_state(self.pipeline()?))
    }

    pub fn trlog(&self) -> &TrainingLog {
        &self.trlog
    }

    pub fn trlog_mut(&mut self) -> &mut TrainingLog {
        &mut self.trlog
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// `{save_path}/{name}-{seed}.{ext}`
    pub fn artifact_path(&self, name: &str, ext: &str) -> PathBuf {
        self.config
            .save_path
            .join(format!("{}-{}.{}", name, self.config.seed, ext))
    }

    pub fn pipeline_path(&self) -> PathBuf {
        self.artifact_path("pipeline", "json")
    }

    pub fn trlog_path(&self) -> PathBuf {
        self.artifact_path("trlog", "json")
    }

    pub fn ensure_save_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.config.save_path)?;
        Ok(())
    }

    /// Write the pipeline state and training log next to a checkpoint.
    pub fn persist_run(&self) -> Result<()> {
        self.ensure_save_dir()?;
        self.pipeline()?.save(self.pipeline_path())?;
        self.trlog.save(self.trlog_path())?;
        Ok(())
    }

    /// Fail with `MissingArtifact` unless `path` exists.
    pub fn require_artifact(&self, path: &Path) -> Result<()> {
        if path.exists() {
            Ok(())
        } else {
            Err(BenchError::MissingArtifact {
                path: path.to_path_buf(),
            })
        }
    }

    /// Replay the pipeline on inference data. A fresh instance loads the
    /// pipeline persisted by the training run.
    pub fn prepare_inference(&mut self, data: &Dataset) -> Result<ProcessedData> {
        if self.pipeline.is_none() {
            let state = PipelineState::load(self.pipeline_path())?;
            log::debug!("Loaded pipeline state from {:?}", self.pipeline_path());
            self.pipeline = Some(state);
        }
        preprocessing::apply(data, self.pipeline()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown {
        epochs: usize,
        stop_after: usize,
    }

    impl EpochRunner for Countdown {
        fn train_epoch(&mut self, _epoch: usize) -> Result<()> {
            self.epochs += 1;
            Ok(())
        }

        fn validate(&mut self, epoch: usize) -> Result<bool> {
            Ok(epoch + 1 < self.stop_after)
        }
    }

    #[test]
    fn loop_respects_continue_flag_and_max_epoch() {
        let cancel = CancelToken::new();
        let mut r = Countdown {
            epochs: 0,
            stop_after: 3,
        };
        assert_eq!(run_epoch_loop(&mut r, 10, &cancel).unwrap(), 3);
        let mut r = Countdown {
            epochs: 0,
            stop_after: 100,
        };
        assert_eq!(run_epoch_loop(&mut r, 4, &cancel).unwrap(), 4);
        assert_eq!(r.epochs, 4);
    }

    #[test]
    fn reset_token_allows_the_next_run() {
        let cancel = CancelToken::new();
        let observer = cancel.clone();
        cancel.cancel();
        let mut r = Countdown {
            epochs: 0,
            stop_after: 100,
        };
        assert_eq!(run_epoch_loop(&mut r, 4, &cancel).unwrap(), 0);
        observer.reset();
        assert!(!cancel.is_cancelled());
        assert_eq!(run_epoch_loop(&mut r, 4, &cancel).unwrap(), 4);
    }
}
