//! Partitioned tabular datasets.
//!
//! A `Dataset` bundles numeric features (N), categorical features (C),
//! targets (y) and task metadata, each split into train/val/test
//! partitions. It is validated once at construction and never mutated;
//! preprocessing produces new partition maps instead.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Train,
    Val,
    Test,
}

impl Partition {
    pub const ALL: [Partition; 3] = [Partition::Train, Partition::Val, Partition::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Val => "val",
            Partition::Test => "test",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = BenchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "train" => Ok(Partition::Train),
            "val" | "valid" | "validation" => Ok(Partition::Val),
            "test" => Ok(Partition::Test),
            _ => Err(BenchError::InvalidData(format!("unknown partition `{}`", s))),
        }
    }
}

/// Mapping partition -> data, iterated in train/val/test order.
pub type Partitions<T> = BTreeMap<Partition, T>;

/// Raw categorical matrix; `None` marks a missing value.
pub type CatMatrix = Array2<Option<String>>;

/// Raw targets as they come from the data source.
#[derive(Debug, Clone, PartialEq)]
pub enum RawLabels {
    /// Numeric targets (regression values or numeric class labels).
    Values(Array1<f64>),
    /// Textual class labels.
    Classes(Array1<String>),
}

impl RawLabels {
    pub fn len(&self) -> usize {
        match self {
            RawLabels::Values(v) => v.len(),
            RawLabels::Classes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Regression,
    #[serde(alias = "binclass")]
    BinClass,
    #[serde(alias = "multiclass")]
    MultiClass,
}

impl TaskType {
    pub fn is_regression(&self) -> bool {
        matches!(self, TaskType::Regression)
    }

    pub fn is_binclass(&self) -> bool {
        matches!(self, TaskType::BinClass)
    }

    pub fn is_multiclass(&self) -> bool {
        matches!(self, TaskType::MultiClass)
    }
}

impl FromStr for TaskType {
    type Err = BenchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "regression" => Ok(TaskType::Regression),
            "binclass" | "bin_class" => Ok(TaskType::BinClass),
            "multiclass" | "multi_class" => Ok(TaskType::MultiClass),
            _ => Err(BenchError::InvalidData(format!("unknown task type `{}`", s))),
        }
    }
}

/// Task metadata attached to a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_type: TaskType,
    pub n_num_features: usize,
    pub n_cat_features: usize,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    n: Option<Partitions<Array2<f64>>>,
    c: Option<Partitions<CatMatrix>>,
    y: Partitions<RawLabels>,
    info: TaskInfo,
}

impl Dataset {
    /// Build a dataset, checking that every partition of N and C has a
    /// matching partition in y with the same number of rows, and that the
    /// feature widths agree with `info`.
    pub fn new(
        n: Option<Partitions<Array2<f64>>>,
        c: Option<Partitions<CatMatrix>>,
        y: Partitions<RawLabels>,
        info: TaskInfo,
    ) -> Result<Self> {
        if y.is_empty() {
            return Err(BenchError::InvalidData("dataset has no partitions".into()));
        }

        if let Some(n) = &n {
            check_partitions(n, &y, "N", |x| x.nrows())?;
            for (part, x) in n {
                if x.ncols() != info.n_num_features {
                    return Err(BenchError::InvalidData(format!(
                        "N[{}] has {} columns, expected {}",
                        part,
                        x.ncols(),
                        info.n_num_features
                    )));
                }
            }
        } else if info.n_num_features > 0 {
            return Err(BenchError::InvalidData(format!(
                "task declares {} numeric features but N is absent",
                info.n_num_features
            )));
        }

        if let Some(c) = &c {
            check_partitions(c, &y, "C", |x| x.nrows())?;
            for (part, x) in c {
                if x.ncols() != info.n_cat_features {
                    return Err(BenchError::InvalidData(format!(
                        "C[{}] has {} columns, expected {}",
                        part,
                        x.ncols(),
                        info.n_cat_features
                    )));
                }
            }
        } else if info.n_cat_features > 0 {
            return Err(BenchError::InvalidData(format!(
                "task declares {} categorical features but C is absent",
                info.n_cat_features
            )));
        }

        if n.is_none() && c.is_none() {
            return Err(BenchError::InvalidData(
                "dataset has neither numeric nor categorical features".into(),
            ));
        }

        if info.task_type.is_regression() {
            if let Some((part, _)) = y.iter().find(|(_, l)| matches!(l, RawLabels::Classes(_))) {
                return Err(BenchError::InvalidData(format!(
                    "regression targets in {} partition must be numeric",
                    part
                )));
            }
        }

        Ok(Dataset { n, c, y, info })
    }

    pub fn n(&self) -> Option<&Partitions<Array2<f64>>> {
        self.n.as_ref()
    }

    pub fn c(&self) -> Option<&Partitions<CatMatrix>> {
        self.c.as_ref()
    }

    pub fn y(&self) -> &Partitions<RawLabels> {
        &self.y
    }

    pub fn info(&self) -> &TaskInfo {
        &self.info
    }

    pub fn is_regression(&self) -> bool {
        self.info.task_type.is_regression()
    }

    /// Partitions present in this dataset, in train/val/test order.
    pub fn partitions(&self) -> Vec<Partition> {
        self.y.keys().copied().collect()
    }

    pub fn has_partition(&self, part: Partition) -> bool {
        self.y.contains_key(&part)
    }

    pub fn n_rows(&self, part: Partition) -> Option<usize> {
        self.y.get(&part).map(|l| l.len())
    }

    /// A dataset holding only the requested partition.
    pub fn select(&self, part: Partition) -> Result<Dataset> {
        let y = self.y.get(&part).ok_or_else(|| {
            BenchError::InvalidData(format!("dataset has no {} partition", part))
        })?;
        Ok(Dataset {
            n: self.n.as_ref().map(|m| select_partition(m, part)),
            c: self.c.as_ref().map(|m| select_partition(m, part)),
            y: std::iter::once((part, y.clone())).collect(),
            info: self.info,
        })
    }
}

fn select_partition<T: Clone>(m: &Partitions<T>, part: Partition) -> Partitions<T> {
    m.get(&part).cloned().map(|v| (part, v)).into_iter().collect()
}

fn check_partitions<T>(
    features: &Partitions<T>,
    y: &Partitions<RawLabels>,
    what: &str,
    rows: impl Fn(&T) -> usize,
) -> Result<()> {
    for (part, labels) in y {
        let x = features.get(part).ok_or_else(|| BenchError::PartitionMismatch {
            partition: *part,
            detail: format!("{} is missing this partition", what),
        })?;
        if rows(x) != labels.len() {
            return Err(BenchError::PartitionMismatch {
                partition: *part,
                detail: format!("{} has {} rows, y has {}", what, rows(x), labels.len()),
            });
        }
    }
    if let Some(part) = features.keys().find(|p| !y.contains_key(p)) {
        return Err(BenchError::PartitionMismatch {
            partition: *part,
            detail: format!("{} has this partition but y does not", what),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn partitions_iterate_in_split_order() {
        let mut p: Partitions<u8> = BTreeMap::new();
        p.insert(Partition::Test, 2);
        p.insert(Partition::Train, 0);
        p.insert(Partition::Val, 1);
        let order: Vec<_> = p.keys().map(|k| k.as_str()).collect();
        assert_eq!(order, vec!["train", "val", "test"]);
    }

    #[test]
    fn select_keeps_one_partition() {
        let n: Partitions<_> = [
            (Partition::Train, array![[1.0], [2.0]]),
            (Partition::Test, array![[3.0]]),
        ]
        .into_iter()
        .collect();
        let y: Partitions<_> = [
            (Partition::Train, RawLabels::Values(array![0.0, 1.0])),
            (Partition::Test, RawLabels::Values(array![1.0])),
        ]
        .into_iter()
        .collect();
        let info = TaskInfo {
            task_type: TaskType::Regression,
            n_num_features: 1,
            n_cat_features: 0,
        };
        let d = Dataset::new(Some(n), None, y, info).unwrap();
        let test = d.select(Partition::Test).unwrap();
        assert_eq!(test.partitions(), vec![Partition::Test]);
        assert_eq!(test.n_rows(Partition::Test), Some(1));
    }
}
