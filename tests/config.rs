//! Integration tests for run configuration loading.

use std::fs;

use tabench::config::{CatPolicy, Normalization, RunConfig, TargetPolicy};
use tabench::models::logreg::LogRegParams;
use tabench::models::svm::{Kernel, SvmParams};
use tabench::BenchError;

// ---------------------------------------------------------------------------
// JSON loading
// ---------------------------------------------------------------------------

#[test]
fn config_file_overrides_only_given_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");
    fs::write(
        &path,
        r#"{
            "seed": 3,
            "cat_policy": "ohe",
            "normalization": "quantile",
            "max_epoch": "many",
            "config": { "model": { "C": 0.5, "kernel": "linear" }, "training": { "lr": 0.01 } }
        }"#,
    )
    .unwrap();

    let config = RunConfig::from_json_file(&path).unwrap();
    assert_eq!(config.seed, 3);
    assert_eq!(config.cat_policy, CatPolicy::Ohe);
    assert_eq!(config.normalization, Normalization::Quantile);
    // invalid value falls back to the default
    assert_eq!(config.max_epoch, RunConfig::default().max_epoch);
    assert_eq!(config.target_policy, TargetPolicy::MeanStd);
    assert_eq!(config.config.training.lr, 0.01);

    let svm: SvmParams = config.config.model_params().unwrap();
    assert_eq!(svm.c, 0.5);
    assert_eq!(svm.kernel, Kernel::Linear);
    assert_eq!(svm.degree, 3.0);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RunConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, BenchError::Io(_)));
}

// ---------------------------------------------------------------------------
// Model parameters
// ---------------------------------------------------------------------------

#[test]
fn empty_model_section_uses_defaults() {
    let config = RunConfig::default();
    let params: LogRegParams = config.config.model_params().unwrap();
    assert_eq!(params, LogRegParams::default());
}

#[test]
fn aliases_are_accepted() {
    let config = RunConfig::from_json_value(&serde_json::json!({
        "config": { "model": { "max_iter": 7, "tol": 0.5 } }
    }));
    let params: LogRegParams = config.config.model_params().unwrap();
    assert_eq!(params.max_iterations, 7);
    assert_eq!(params.gradient_tolerance, 0.5);
}

#[test]
fn malformed_model_section_is_invalid_config() {
    let config = RunConfig::from_json_value(&serde_json::json!({
        "config": { "model": { "kernel": "sigmoid" } }
    }));
    let err = config.config.model_params::<SvmParams>().unwrap_err();
    assert!(matches!(err, BenchError::InvalidConfig(_)));
}

#[test]
fn validation_rejects_degenerate_values() {
    let mut config = RunConfig::default();
    assert!(config.validate().is_ok());
    config.batch_size = 0;
    assert!(config.validate().is_err());
    let mut config = RunConfig::default();
    config.config.training.lr = 0.0;
    assert!(matches!(config.validate(), Err(BenchError::InvalidConfig(_))));
}

#[test]
fn with_seed_changes_only_the_seed() {
    let base = RunConfig::default();
    let other = base.with_seed(9);
    assert_eq!(other.seed, 9);
    assert_eq!(other.save_path, base.save_path);
}
