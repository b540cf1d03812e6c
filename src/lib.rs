//! Benchmarking harness for tabular prediction methods.
//!
//! Every method (classical estimators and learned networks alike) goes
//! through the same lifecycle: a dataset is bound, a preprocessing pipeline
//! is fitted on its training partition, the model is constructed, trained,
//! checkpointed and later used for prediction. The fitted pipeline is
//! persisted next to the checkpoint so that inference replays exactly the
//! transforms seen during training.
pub mod building_blocks;
pub mod config;
pub mod data_handling;
pub mod error;
pub mod io;
pub mod loader;
pub mod models;
pub mod preprocessing;
pub mod stats;
pub mod utils;

pub use error::{BenchError, Result};
