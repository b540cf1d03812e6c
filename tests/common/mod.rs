//! Synthetic datasets shared by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tabench::data_handling::{CatMatrix, Dataset, Partition, RawLabels, TaskInfo, TaskType};

const COLORS: [&str; 3] = ["red", "green", "blue"];

pub const ROWS: [(Partition, usize); 3] = [(Partition::Train, 120), (Partition::Val, 40), (Partition::Test, 40)];

/// Two well separated blobs over three numeric features plus one
/// categorical column correlated with the class. About 5% of the cells are
/// missing. Labels are the strings `"neg"` / `"pos"`.
pub fn binary_dataset(seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut n = BTreeMap::new();
    let mut c = BTreeMap::new();
    let mut y = BTreeMap::new();
    for (part, rows) in ROWS {
        let mut x = Array2::<f64>::zeros((rows, 3));
        let mut cat: CatMatrix = Array2::from_elem((rows, 1), None);
        let mut labels = Vec::with_capacity(rows);
        for i in 0..rows {
            let positive = i % 2 == 0;
            let center = if positive { 2.0 } else { -2.0 };
            for j in 0..3 {
                x[[i, j]] = if rng.gen_bool(0.05) {
                    f64::NAN
                } else {
                    center + rng.gen_range(-1.0..1.0)
                };
            }
            cat[[i, 0]] = if rng.gen_bool(0.05) {
                None
            } else if positive {
                Some(COLORS[0].to_string())
            } else {
                Some(COLORS[1 + rng.gen_range(0..2)].to_string())
            };
            labels.push(if positive { "pos" } else { "neg" }.to_string());
        }
        n.insert(part, x);
        c.insert(part, cat);
        y.insert(part, RawLabels::Classes(Array1::from_vec(labels)));
    }
    let info = TaskInfo {
        task_type: TaskType::BinClass,
        n_num_features: 3,
        n_cat_features: 1,
    };
    Dataset::new(Some(n), Some(c), y, info).unwrap()
}

/// Three blobs with numeric labels 0, 1, 2 and no categorical features.
pub fn multiclass_dataset(seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers = [[-3.0, 0.0], [3.0, 0.0], [0.0, 4.0]];
    let mut n = BTreeMap::new();
    let mut y = BTreeMap::new();
    for (part, rows) in ROWS {
        let mut x = Array2::<f64>::zeros((rows, 2));
        let mut labels = Array1::<f64>::zeros(rows);
        for i in 0..rows {
            let k = i % 3;
            for j in 0..2 {
                x[[i, j]] = centers[k][j] + rng.gen_range(-1.0..1.0);
            }
            labels[i] = k as f64;
        }
        n.insert(part, x);
        y.insert(part, RawLabels::Values(labels));
    }
    let info = TaskInfo {
        task_type: TaskType::MultiClass,
        n_num_features: 2,
        n_cat_features: 0,
    };
    Dataset::new(Some(n), None, y, info).unwrap()
}

/// `y = 3 x0 - 2 x1 + 100` with small noise; targets far from zero so the
/// target normalization is visible.
pub fn regression_dataset(seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut n = BTreeMap::new();
    let mut y = BTreeMap::new();
    for (part, rows) in ROWS {
        let mut x = Array2::<f64>::zeros((rows, 2));
        let mut target = Array1::<f64>::zeros(rows);
        for i in 0..rows {
            let a = rng.gen_range(-2.0..2.0);
            let b = rng.gen_range(-2.0..2.0);
            x[[i, 0]] = a;
            x[[i, 1]] = b;
            target[i] = 3.0 * a - 2.0 * b + 100.0 + rng.gen_range(-0.1..0.1);
        }
        n.insert(part, x);
        y.insert(part, RawLabels::Values(target));
    }
    let info = TaskInfo {
        task_type: TaskType::Regression,
        n_num_features: 2,
        n_cat_features: 0,
    };
    Dataset::new(Some(n), None, y, info).unwrap()
}
