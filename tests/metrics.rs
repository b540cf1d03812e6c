//! Integration tests for the metric evaluator and the training log.

use ndarray::{array, Array1};

use tabench::data_handling::TaskType;
use tabench::preprocessing::labels::{Target, YInfo};
use tabench::stats::{softmax, Evaluator, Predictions, TrainingLog};

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
}

// ---------------------------------------------------------------------------
// Regression metrics and the target scale
// ---------------------------------------------------------------------------

#[test]
fn distance_metrics_are_reported_in_original_units() {
    let y_info = YInfo::MeanStd { mean: 100.0, std: 4.0 };
    let evaluator = Evaluator::new(TaskType::Regression, None, y_info);
    let pred = Predictions::Values(array![0.5, 1.0]);
    let labels = Target::Continuous(array![0.0, 1.0]);

    let (values, names) = evaluator.evaluate(&pred, &labels).unwrap();
    assert_eq!(names, vec!["MAE", "R2", "RMSE"]);
    assert_close(values[0], 0.25 * 4.0);
    assert_close(values[1], 0.5);
    assert_close(values[2], (0.125f64).sqrt() * 4.0);
}

#[test]
fn unnormalized_targets_keep_unit_scale() {
    let evaluator = Evaluator::new(TaskType::Regression, None, YInfo::None);
    let (values, _) = evaluator
        .evaluate(&Predictions::Values(array![1.0, 3.0]), &Target::Continuous(array![2.0, 2.0]))
        .unwrap();
    assert_close(values[0], 1.0);
    assert_close(values[2], 1.0);
    assert!(!evaluator.higher_is_better());
}

// ---------------------------------------------------------------------------
// Classification metrics
// ---------------------------------------------------------------------------

#[test]
fn hard_labels_give_four_metrics() {
    let evaluator = Evaluator::new(TaskType::MultiClass, Some(3), YInfo::None);
    let labels = Target::Classes(array![0, 1, 2, 2]);
    let (values, names) = evaluator
        .evaluate(&Predictions::Labels(array![0, 1, 2, 1]), &labels)
        .unwrap();
    assert_eq!(names, vec!["Accuracy", "Avg_Precision", "Avg_Recall", "F1"]);
    assert_close(values[0], 0.75);
    assert!(evaluator.higher_is_better());
}

#[test]
fn logits_are_soft_maxed_before_scoring() {
    let evaluator = Evaluator::new(TaskType::BinClass, Some(2), YInfo::None);
    let logits = array![[2.0, -1.0], [0.0, 3.0], [1.0, 0.5], [-2.0, 2.0]];
    let labels = Target::Classes(array![0, 1, 1, 1]);

    let (from_logits, names) = evaluator
        .evaluate(&Predictions::Logits(logits.clone()), &labels)
        .unwrap();
    let (from_probs, _) = evaluator
        .evaluate(&Predictions::Probabilities(softmax(&logits)), &labels)
        .unwrap();
    assert_eq!(names.len(), 6);
    assert_eq!(&names[4..], &["LogLoss", "AUC"]);
    for (a, b) in from_logits.iter().zip(&from_probs) {
        assert_close(*a, *b);
    }
    // ranks of the positive column separate the classes perfectly
    assert_close(from_logits[5], 1.0);
}

#[test]
fn binary_f1_uses_the_positive_class() {
    let evaluator = Evaluator::new(TaskType::BinClass, Some(2), YInfo::None);
    let labels = Target::Classes(array![1, 1, 0, 0]);
    let (values, _) = evaluator
        .evaluate(&Predictions::Labels(array![1, 0, 0, 0]), &labels)
        .unwrap();
    // tp = 1, fp = 0, fn = 1
    assert_close(values[3], 2.0 / 3.0);
}

#[test]
fn length_mismatch_is_an_error() {
    let evaluator = Evaluator::new(TaskType::BinClass, Some(2), YInfo::None);
    let labels = Target::Classes(Array1::from_vec(vec![0, 1, 1]));
    assert!(evaluator
        .evaluate(&Predictions::Labels(array![0, 1]), &labels)
        .is_err());
}

// ---------------------------------------------------------------------------
// Early stopping bookkeeping
// ---------------------------------------------------------------------------

#[test]
fn patience_counter_stops_after_exceeding_limit() {
    let mut log = TrainingLog::new();
    let scores = [0.5, 0.4, 0.3, 0.2];
    let flags: Vec<bool> = scores
        .iter()
        .enumerate()
        .map(|(epoch, &s)| log.record_validation(epoch, s, true, 2))
        .collect();
    assert_eq!(flags, vec![true, true, true, false]);
    assert_eq!(log.best_epoch, Some(0));
    assert_eq!(log.best_res, Some(0.5));
    assert_eq!(log.val_metric.len(), 4);
}

#[test]
fn ties_count_as_improvement() {
    let mut log = TrainingLog::new();
    log.record_validation(0, 1.5, false, 5);
    log.record_validation(1, 2.0, false, 5);
    log.record_validation(2, 1.5, false, 5);
    assert_eq!(log.best_epoch, Some(2));
    assert_eq!(log.patience_counter, 0);
}
