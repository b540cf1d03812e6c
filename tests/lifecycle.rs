//! Integration tests for the method lifecycle of the classical adapters.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use tabench::config::{CatPolicy, MethodConfig, RunConfig, TrainingConfig};
use tabench::data_handling::Partition;
use tabench::models::factory::{build_method, MethodKind};
use tabench::models::model_interface::{FitOptions, Stage};
use tabench::stats::Predictions;
use tabench::BenchError;

fn run_config(save_path: &Path, seed: u64) -> RunConfig {
    RunConfig {
        seed,
        save_path: save_path.to_path_buf(),
        ..RunConfig::default()
    }
}

fn with_model(mut config: RunConfig, model: serde_json::Value) -> RunConfig {
    config.config = MethodConfig::new(model, TrainingConfig::default());
    config
}

// ---------------------------------------------------------------------------
// Train, checkpoint, predict
// ---------------------------------------------------------------------------

#[test]
fn logreg_round_trip_through_a_fresh_instance() {
    let dir = tempfile::tempdir().unwrap();
    let data = common::binary_dataset(0);
    let test = data.select(Partition::Test).unwrap();
    let config = Arc::new(run_config(dir.path(), 0));

    let mut method = build_method(MethodKind::LogReg, config.clone(), false).unwrap();
    method.fit(data, FitOptions::default()).unwrap();
    assert_eq!(method.stage(), Stage::Checkpointed);
    assert_eq!(method.checkpoint_name(), "best-val");
    for file in ["best-val-0.json", "pipeline-0.json", "trlog-0.json"] {
        assert!(dir.path().join(file).exists(), "{} was not written", file);
    }
    let log = method.training_log();
    assert_eq!(log.best_epoch, Some(0));
    assert_eq!(log.epochs_run, 1);
    assert!(log.best_res.unwrap() > 0.8);

    let first = method.predict(&test, "best-val").unwrap();
    assert_eq!(method.stage(), Stage::PredictReady);
    assert_eq!(
        first.metric_names,
        vec!["Accuracy", "Avg_Precision", "Avg_Recall", "F1", "LogLoss", "AUC"]
    );
    assert!(first.metric("Accuracy").unwrap() > 0.8);
    assert!(matches!(first.predictions, Predictions::Probabilities(_)));

    let mut fresh = build_method(MethodKind::LogReg, config, false).unwrap();
    let second = fresh.predict(&test, "best-val").unwrap();
    assert_eq!(first.predictions, second.predictions);
    assert_eq!(first.metrics, second.metrics);
}

#[test]
fn svm_classifies_binary_and_multiclass_tasks() {
    let dir = tempfile::tempdir().unwrap();

    let data = common::binary_dataset(1);
    let test = data.select(Partition::Test).unwrap();
    let mut method = build_method(MethodKind::Svm, Arc::new(run_config(dir.path(), 0)), false).unwrap();
    method.fit(data, FitOptions::default()).unwrap();
    let out = method.predict(&test, "best-val").unwrap();
    assert_eq!(out.metric_names, vec!["Accuracy", "Avg_Precision", "Avg_Recall", "F1"]);
    assert!(out.metric("Accuracy").unwrap() > 0.8, "{:?}", out.metrics);
    assert!(matches!(out.predictions, Predictions::Labels(_)));

    let data = common::multiclass_dataset(1);
    let test = data.select(Partition::Test).unwrap();
    let mut method = build_method(MethodKind::Svm, Arc::new(run_config(dir.path(), 1)), false).unwrap();
    method.fit(data, FitOptions::default()).unwrap();
    let out = method.predict(&test, "best-val").unwrap();
    assert!(out.metric("Accuracy").unwrap() > 0.8, "{:?}", out.metrics);
}

#[test]
fn svm_regression_reports_original_units() {
    let dir = tempfile::tempdir().unwrap();
    let config = with_model(
        run_config(dir.path(), 0),
        serde_json::json!({ "kernel": "linear", "C": 1.0 }),
    );
    let config = Arc::new(config);
    let data = common::regression_dataset(2);
    let test = data.select(Partition::Test).unwrap();

    let mut method = build_method(MethodKind::Svm, config.clone(), true).unwrap();
    method.fit(data, FitOptions::default()).unwrap();
    let out = method.predict(&test, "best-val").unwrap();
    assert_eq!(out.metric_names, vec!["MAE", "R2", "RMSE"]);
    assert!(out.metric("R2").unwrap() > 0.5, "{:?}", out.metrics);

    let mut fresh = build_method(MethodKind::Svm, config, true).unwrap();
    let again = fresh.predict(&test, "best-val").unwrap();
    assert_eq!(out.predictions, again.predictions);
}

// ---------------------------------------------------------------------------
// Partial-failure paths
// ---------------------------------------------------------------------------

#[test]
fn skipping_training_leaves_no_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let save_path = dir.path().join("run");
    let data = common::binary_dataset(3);
    let test = data.select(Partition::Test).unwrap();

    let mut method = build_method(MethodKind::LogReg, Arc::new(run_config(&save_path, 0)), false).unwrap();
    let options = FitOptions {
        train: false,
        ..FitOptions::default()
    };
    method.fit(data, options).unwrap();
    assert_eq!(method.stage(), Stage::ModelConstructed);
    assert!(!save_path.exists() || fs::read_dir(&save_path).unwrap().next().is_none());

    let err = method.predict(&test, "best-val").unwrap_err();
    assert!(matches!(err, BenchError::MissingArtifact { .. }), "{:?}", err);
}

#[test]
fn predicting_without_a_checkpoint_is_a_missing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let data = common::binary_dataset(4).select(Partition::Test).unwrap();
    let mut method = build_method(MethodKind::Svm, Arc::new(run_config(dir.path(), 0)), false).unwrap();
    match method.predict(&data, "best-val").unwrap_err() {
        BenchError::MissingArtifact { path } => assert!(path.ends_with("best-val-0.json")),
        other => panic!("expected MissingArtifact, got {:?}", other),
    }
}

#[test]
fn unsupported_combinations_fail_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(run_config(dir.path(), 0));
    let err = build_method(MethodKind::LogReg, config, true).err().unwrap();
    assert!(matches!(err, BenchError::PolicyViolation(_)));

    for kind in MethodKind::ALL {
        let config = RunConfig {
            cat_policy: CatPolicy::Indices,
            ..run_config(dir.path(), 0)
        };
        let err = build_method(kind, Arc::new(config), false).err().unwrap();
        assert!(matches!(err, BenchError::PolicyViolation(_)), "{}: {:?}", kind, err);
    }
}

#[test]
fn out_of_order_calls_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut method = build_method(MethodKind::LogReg, Arc::new(run_config(dir.path(), 0)), false).unwrap();
    let err = method.construct_model(None).unwrap_err();
    assert!(matches!(err, BenchError::InvalidState(_)));
    assert_eq!(method.stage(), Stage::Uninitialized);
}

#[test]
fn task_type_must_match_construction() {
    let dir = tempfile::tempdir().unwrap();
    let mut method = build_method(MethodKind::Svm, Arc::new(run_config(dir.path(), 0)), false).unwrap();
    let err = method
        .fit(common::regression_dataset(0), FitOptions::default())
        .unwrap_err();
    assert!(matches!(err, BenchError::InvalidData(_)));
}

// ---------------------------------------------------------------------------
// Pipeline reuse and independent runs
// ---------------------------------------------------------------------------

#[test]
fn reused_pipeline_is_not_refitted() {
    let dir = tempfile::tempdir().unwrap();
    let mut method = build_method(MethodKind::LogReg, Arc::new(run_config(dir.path(), 0)), false).unwrap();
    method.fit(common::binary_dataset(5), FitOptions::default()).unwrap();
    let pipeline = dir.path().join("pipeline-0.json");
    let first = fs::read_to_string(&pipeline).unwrap();

    let options = FitOptions {
        reuse_pipeline: true,
        config: Some(MethodConfig::new(
            serde_json::json!({ "alpha": 0.1 }),
            TrainingConfig::default(),
        )),
        ..FitOptions::default()
    };
    method.fit(common::binary_dataset(6), options).unwrap();
    assert_eq!(fs::read_to_string(&pipeline).unwrap(), first);

    method.fit(common::binary_dataset(6), FitOptions::default()).unwrap();
    assert_ne!(fs::read_to_string(&pipeline).unwrap(), first);
}

#[test]
fn parallel_seeds_write_separate_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let base = run_config(dir.path(), 0);

    thread::scope(|s| {
        for seed in 0..3u64 {
            let config = Arc::new(base.with_seed(seed));
            s.spawn(move || {
                let mut method = build_method(MethodKind::LogReg, config, false).unwrap();
                method.fit(common::binary_dataset(seed), FitOptions::default()).unwrap();
            });
        }
    });

    for seed in 0..3 {
        assert!(dir.path().join(format!("best-val-{}.json", seed)).exists());
        assert!(dir.path().join(format!("pipeline-{}.json", seed)).exists());
    }
}
