use std::path::PathBuf;

use thiserror::Error;

use crate::data_handling::Partition;

/// Errors raised by the benchmarking harness.
///
/// Each failure category is its own variant so an orchestrator can react to
/// it (retry with another policy, require re-training, ...) without parsing
/// messages.
#[derive(Debug, Error)]
pub enum BenchError {
    /// A method was configured with a preprocessing policy it cannot consume.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// A label value that was not present in the training partition.
    #[error("unseen label `{label}` in {partition} partition")]
    UnseenLabel { label: String, partition: Partition },

    /// Prediction was requested but the checkpoint (or pipeline state) is absent.
    #[error("missing artifact: {}", path.display())]
    MissingArtifact { path: PathBuf },

    /// A batch produced a non-finite loss.
    #[error("training diverged at epoch {epoch}, step {step}: loss = {loss}")]
    TrainingDivergence { epoch: usize, step: usize, loss: f64 },

    /// Cancellation was observed before any epoch completed. Nothing was
    /// written, so earlier checkpoints stay intact.
    #[error("training cancelled after {epochs_run} epochs")]
    Cancelled { epochs_run: usize },

    /// Row counts of N, C and y disagree for a partition.
    #[error("partition {partition} has mismatched row counts: {detail}")]
    PartitionMismatch { partition: Partition, detail: String },

    /// A lifecycle call was made out of order.
    #[error("invalid lifecycle transition: {0}")]
    InvalidState(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Failure reported by an underlying estimator.
    #[error("estimator error: {0}")]
    Estimator(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, BenchError>;
