//! Label processing: class-index mapping and regression target scaling.
use std::collections::BTreeSet;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::config::TargetPolicy;
use crate::data_handling::{Partition, RawLabels, TaskType};
use crate::error::{BenchError, Result};

/// Target transform applied to regression labels, kept so metrics can be
/// reported in the original units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum YInfo {
    MeanStd { mean: f64, std: f64 },
    MinMax { min: f64, max: f64 },
    None,
}

impl YInfo {
    /// Factor that maps a distance in normalized units back to original units.
    pub fn scale(&self) -> f64 {
        match self {
            YInfo::MeanStd { std, .. } => *std,
            YInfo::MinMax { min, max } => max - min,
            YInfo::None => 1.0,
        }
    }

    pub fn normalize(&self, v: f64) -> f64 {
        match self {
            YInfo::MeanStd { mean, std } => (v - mean) / std,
            YInfo::MinMax { min, .. } => (v - min) / self.scale(),
            YInfo::None => v,
        }
    }

    pub fn denormalize(&self, v: f64) -> f64 {
        match self {
            YInfo::MeanStd { mean, std } => v * std + mean,
            YInfo::MinMax { min, .. } => v * self.scale() + min,
            YInfo::None => v,
        }
    }
}

/// Processed targets.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Continuous(Array1<f64>),
    Classes(Array1<usize>),
}

impl Target {
    pub fn len(&self) -> usize {
        match self {
            Target::Continuous(y) => y.len(),
            Target::Classes(y) => y.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_f64(&self) -> Array1<f64> {
        match self {
            Target::Continuous(y) => y.clone(),
            Target::Classes(y) => y.mapv(|c| c as f64),
        }
    }

    pub fn select(&self, idx: &[usize]) -> Target {
        match self {
            Target::Continuous(y) => Target::Continuous(idx.iter().map(|&i| y[i]).collect()),
            Target::Classes(y) => Target::Classes(idx.iter().map(|&i| y[i]).collect()),
        }
    }
}

/// Sorted class labels seen in the training partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassVocab {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

impl ClassVocab {
    pub fn len(&self) -> usize {
        match self {
            ClassVocab::Numeric(v) => v.len(),
            ClassVocab::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LabelEncoder {
    Regression { y_info: YInfo },
    Classification { classes: ClassVocab },
}

impl LabelEncoder {
    pub fn fit(train: &RawLabels, task_type: TaskType, policy: TargetPolicy) -> Result<Self> {
        if train.is_empty() {
            return Err(BenchError::InvalidData("training targets are empty".into()));
        }
        if task_type.is_regression() {
            let y = match train {
                RawLabels::Values(y) => y,
                RawLabels::Classes(_) => {
                    return Err(BenchError::InvalidData(
                        "regression targets must be numeric".into(),
                    ))
                }
            };
            let y_info = match policy {
                TargetPolicy::MeanStd => {
                    let mean = y.sum() / y.len() as f64;
                    let std = (y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / y.len() as f64)
                        .sqrt();
                    YInfo::MeanStd {
                        mean,
                        std: if std > 0.0 { std } else { 1.0 },
                    }
                }
                TargetPolicy::MinMax => {
                    let min = y.iter().copied().fold(f64::INFINITY, f64::min);
                    let mut max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    if max <= min {
                        max = min + 1.0;
                    }
                    YInfo::MinMax { min, max }
                }
                TargetPolicy::None => YInfo::None,
            };
            return Ok(LabelEncoder::Regression { y_info });
        }

        let classes = match train {
            RawLabels::Values(y) => {
                let mut v: Vec<f64> = y.to_vec();
                v.sort_by(|a, b| a.total_cmp(b));
                v.dedup_by(|a, b| a.total_cmp(b).is_eq());
                ClassVocab::Numeric(v)
            }
            RawLabels::Classes(y) => {
                ClassVocab::Text(y.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect())
            }
        };
        if task_type.is_binclass() && classes.len() > 2 {
            return Err(BenchError::InvalidData(format!(
                "binary task has {} distinct training labels",
                classes.len()
            )));
        }
        log::debug!("Label encoder fitted with {} classes", classes.len());
        Ok(LabelEncoder::Classification { classes })
    }

    pub fn y_info(&self) -> YInfo {
        match self {
            LabelEncoder::Regression { y_info } => *y_info,
            LabelEncoder::Classification { .. } => YInfo::None,
        }
    }

    /// Number of classes, or `None` for regression.
    pub fn n_classes(&self) -> Option<usize> {
        match self {
            LabelEncoder::Regression { .. } => None,
            LabelEncoder::Classification { classes } => Some(classes.len()),
        }
    }

    /// Transform labels of one partition. Class labels absent from the
    /// training partition are rejected.
    pub fn apply(&self, labels: &RawLabels, partition: Partition) -> Result<Target> {
        match (self, labels) {
            (LabelEncoder::Regression { y_info }, RawLabels::Values(y)) => {
                Ok(Target::Continuous(y.mapv(|v| y_info.normalize(v))))
            }
            (LabelEncoder::Regression { .. }, RawLabels::Classes(_)) => Err(
                BenchError::InvalidData(format!("{} targets must be numeric", partition)),
            ),
            (LabelEncoder::Classification { classes }, labels) => {
                let idx = match (classes, labels) {
                    (ClassVocab::Numeric(vocab), RawLabels::Values(y)) => y
                        .iter()
                        .map(|v| {
                            vocab
                                .binary_search_by(|probe| probe.total_cmp(v))
                                .map_err(|_| BenchError::UnseenLabel {
                                    label: v.to_string(),
                                    partition,
                                })
                        })
                        .collect::<Result<Vec<usize>>>()?,
                    (ClassVocab::Text(vocab), RawLabels::Classes(y)) => y
                        .iter()
                        .map(|v| {
                            vocab
                                .binary_search(v)
                                .map_err(|_| BenchError::UnseenLabel {
                                    label: v.clone(),
                                    partition,
                                })
                        })
                        .collect::<Result<Vec<usize>>>()?,
                    _ => {
                        return Err(BenchError::InvalidData(format!(
                            "{} labels are not of the same kind as the training labels",
                            partition
                        )))
                    }
                };
                Ok(Target::Classes(Array1::from_vec(idx)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn numeric_classes_sort_by_value() {
        let train = RawLabels::Values(array![10.0, 2.0, 10.0, 3.0]);
        let enc = LabelEncoder::fit(&train, TaskType::MultiClass, TargetPolicy::MeanStd).unwrap();
        assert_eq!(enc.n_classes(), Some(3));
        let t = enc.apply(&train, Partition::Train).unwrap();
        assert_eq!(t, Target::Classes(array![2, 0, 2, 1]));
        assert_eq!(enc.y_info(), YInfo::None);
    }

    #[test]
    fn min_max_round_trips() {
        let info = YInfo::MinMax { min: 2.0, max: 6.0 };
        assert_eq!(info.normalize(4.0), 0.5);
        assert_eq!(info.denormalize(0.5), 4.0);
        assert_eq!(info.scale(), 4.0);
    }
}
