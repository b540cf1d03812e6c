//! Integration tests for the CSV partition reader.

use std::fs;

use tabench::data_handling::{Partition, RawLabels, TaskType};
use tabench::io::{read_partitions, DataSchema};

fn schema(task_type: TaskType) -> DataSchema {
    DataSchema {
        num_columns: vec!["age".into(), "income".into()],
        cat_columns: vec!["city".into()],
        target_column: "label".into(),
        task_type,
        delimiter: ',',
    }
}

#[test]
fn reads_partitions_with_missing_cells() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("train.csv"),
        "id,age,income,city,label\n1,30,,paris,yes\n2,NaN,2.5,,no\n3,41,3.0,rome,yes\n",
    )
    .unwrap();
    fs::write(dir.path().join("val.csv"), "id,age,income,city,label\n4,22,1.0,rome,no\n").unwrap();

    let data = read_partitions(dir.path(), &schema(TaskType::BinClass), &Partition::ALL).unwrap();
    assert_eq!(data.partitions(), vec![Partition::Train, Partition::Val]);

    let n = &data.n().unwrap()[&Partition::Train];
    assert_eq!(n.dim(), (3, 2));
    assert!(n[[0, 1]].is_nan());
    assert!(n[[1, 0]].is_nan());
    assert_eq!(n[[2, 0]], 41.0);

    let c = &data.c().unwrap()[&Partition::Train];
    assert_eq!(c[[0, 0]].as_deref(), Some("paris"));
    assert_eq!(c[[1, 0]], None);

    match &data.y()[&Partition::Train] {
        RawLabels::Classes(y) => assert_eq!(y.to_vec(), vec!["yes", "no", "yes"]),
        other => panic!("expected textual labels, got {:?}", other),
    }
}

#[test]
fn numeric_labels_stay_numeric() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("test.csv"), "age,income,city,label\n1,2,a,0\n3,4,b,1\n").unwrap();
    let data = read_partitions(dir.path(), &schema(TaskType::BinClass), &[Partition::Test]).unwrap();
    assert!(matches!(data.y()[&Partition::Test], RawLabels::Values(_)));
}

#[test]
fn missing_column_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("train.csv"), "age,city,label\n1,a,0\n").unwrap();
    let err = read_partitions(dir.path(), &schema(TaskType::Regression), &[Partition::Train]).unwrap_err();
    assert!(err.to_string().contains("income"), "{}", err);
}

#[test]
fn empty_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(read_partitions(dir.path(), &schema(TaskType::Regression), &Partition::ALL).is_err());
}
