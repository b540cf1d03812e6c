//! Integration tests for dataset construction and partition handling.

use std::collections::BTreeMap;

use ndarray::{array, Array2};

use tabench::data_handling::{Dataset, Partition, RawLabels, TaskInfo, TaskType};
use tabench::BenchError;

fn info(task_type: TaskType, n_num: usize, n_cat: usize) -> TaskInfo {
    TaskInfo {
        task_type,
        n_num_features: n_num,
        n_cat_features: n_cat,
    }
}

// ---------------------------------------------------------------------------
// Partition consistency
// ---------------------------------------------------------------------------

#[test]
fn row_count_mismatch_is_rejected() {
    let mut n = BTreeMap::new();
    n.insert(Partition::Train, array![[1.0], [2.0], [3.0]]);
    let mut y = BTreeMap::new();
    y.insert(Partition::Train, RawLabels::Values(array![1.0, 2.0, 3.0, 4.0]));

    let err = Dataset::new(Some(n), None, y, info(TaskType::Regression, 1, 0)).unwrap_err();
    match err {
        BenchError::PartitionMismatch { partition, .. } => assert_eq!(partition, Partition::Train),
        other => panic!("expected PartitionMismatch, got {:?}", other),
    }
}

#[test]
fn feature_partition_without_labels_is_rejected() {
    let mut n = BTreeMap::new();
    n.insert(Partition::Train, array![[1.0], [2.0]]);
    n.insert(Partition::Val, array![[3.0]]);
    let mut y = BTreeMap::new();
    y.insert(Partition::Train, RawLabels::Values(array![1.0, 2.0]));

    let err = Dataset::new(Some(n), None, y, info(TaskType::Regression, 1, 0)).unwrap_err();
    assert!(
        matches!(err, BenchError::PartitionMismatch { partition: Partition::Val, .. }),
        "got {:?}",
        err
    );
}

#[test]
fn categorical_rows_must_match_labels() {
    let mut c = BTreeMap::new();
    c.insert(Partition::Train, Array2::from_elem((2, 1), Some("a".to_string())));
    let mut y = BTreeMap::new();
    y.insert(
        Partition::Train,
        RawLabels::Classes(array!["x".to_string(), "y".to_string(), "x".to_string()]),
    );

    let err = Dataset::new(None, Some(c), y, info(TaskType::BinClass, 0, 1)).unwrap_err();
    assert!(matches!(err, BenchError::PartitionMismatch { .. }));
}

// ---------------------------------------------------------------------------
// Metadata checks
// ---------------------------------------------------------------------------

#[test]
fn declared_width_must_match() {
    let mut n = BTreeMap::new();
    n.insert(Partition::Train, array![[1.0, 2.0]]);
    let mut y = BTreeMap::new();
    y.insert(Partition::Train, RawLabels::Values(array![1.0]));

    let err = Dataset::new(Some(n), None, y, info(TaskType::Regression, 3, 0)).unwrap_err();
    assert!(matches!(err, BenchError::InvalidData(_)));
}

#[test]
fn regression_needs_numeric_targets() {
    let mut n = BTreeMap::new();
    n.insert(Partition::Train, array![[1.0]]);
    let mut y = BTreeMap::new();
    y.insert(Partition::Train, RawLabels::Classes(array!["a".to_string()]));

    assert!(Dataset::new(Some(n), None, y, info(TaskType::Regression, 1, 0)).is_err());
}

#[test]
fn task_type_and_partition_names_parse() {
    assert_eq!("binclass".parse::<TaskType>().unwrap(), TaskType::BinClass);
    assert_eq!("Regression".parse::<TaskType>().unwrap(), TaskType::Regression);
    assert_eq!("validation".parse::<Partition>().unwrap(), Partition::Val);
    assert!("holdout".parse::<Partition>().is_err());
}
