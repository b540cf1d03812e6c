//! Missing-value imputation for numeric and categorical columns.
use std::collections::BTreeMap;

use ndarray::{Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{CatNanPolicy, NumNanPolicy};
use crate::data_handling::CatMatrix;
use crate::error::{BenchError, Result};

/// Category that stands in for missing values under `CatNanPolicy::New`.
pub const CAT_NAN_SENTINEL: &str = "___null___";

/// Per-column fill values for numeric features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumImputer {
    pub policy: NumNanPolicy,
    pub fill: Vec<f64>,
}

impl NumImputer {
    pub fn fit(x: &Array2<f64>, policy: NumNanPolicy) -> Self {
        let fill = (0..x.ncols())
            .into_par_iter()
            .map(|j| {
                let mut col: Vec<f64> = x
                    .index_axis(Axis(1), j)
                    .iter()
                    .copied()
                    .filter(|v| !v.is_nan())
                    .collect();
                if col.is_empty() {
                    return 0.0;
                }
                match policy {
                    NumNanPolicy::Mean => col.iter().sum::<f64>() / col.len() as f64,
                    NumNanPolicy::Median => median(&mut col),
                }
            })
            .collect();
        NumImputer { policy, fill }
    }

    pub fn apply(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.fill.len() {
            return Err(BenchError::InvalidData(format!(
                "numeric imputer fitted on {} columns, got {}",
                self.fill.len(),
                x.ncols()
            )));
        }
        let mut out = x.clone();
        for (mut col, &fill) in out.axis_iter_mut(Axis(1)).zip(self.fill.iter()) {
            col.mapv_inplace(|v| if v.is_nan() { fill } else { v });
        }
        Ok(out)
    }
}

/// Per-column fill values for categorical features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatImputer {
    pub policy: CatNanPolicy,
    pub fill: Vec<String>,
}

impl CatImputer {
    pub fn fit(x: &CatMatrix, policy: CatNanPolicy) -> Self {
        let fill = x
            .axis_iter(Axis(1))
            .map(|col| match policy {
                CatNanPolicy::New => CAT_NAN_SENTINEL.to_string(),
                CatNanPolicy::MostFrequent => {
                    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
                    for v in col.iter().flatten() {
                        *counts.entry(v.as_str()).or_default() += 1;
                    }
                    // BTreeMap order makes the smallest value win ties
                    let mut best: Option<(&str, usize)> = None;
                    for (value, count) in counts {
                        if best.map_or(true, |(_, c)| count > c) {
                            best = Some((value, count));
                        }
                    }
                    best.map(|(v, _)| v.to_string())
                        .unwrap_or_else(|| CAT_NAN_SENTINEL.to_string())
                }
            })
            .collect();
        CatImputer { policy, fill }
    }

    pub fn apply(&self, x: &CatMatrix) -> Result<Array2<String>> {
        if x.ncols() != self.fill.len() {
            return Err(BenchError::InvalidData(format!(
                "categorical imputer fitted on {} columns, got {}",
                self.fill.len(),
                x.ncols()
            )));
        }
        let mut out = Array2::from_elem(x.raw_dim(), String::new());
        for ((r, c), v) in x.indexed_iter() {
            out[(r, c)] = match v {
                Some(s) => s.clone(),
                None => self.fill[c].clone(),
            };
        }
        Ok(out)
    }
}

/// Median of an unsorted slice; sorts in place.
pub(crate) fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn numeric_fill_uses_train_statistics() {
        let train = array![[1.0, f64::NAN], [3.0, f64::NAN], [f64::NAN, f64::NAN], [8.0, f64::NAN]];
        let mean = NumImputer::fit(&train, NumNanPolicy::Mean);
        assert_eq!(mean.fill, vec![4.0, 0.0]);
        let med = NumImputer::fit(&train, NumNanPolicy::Median);
        assert_eq!(med.fill, vec![3.0, 0.0]);

        let out = med.apply(&array![[f64::NAN, 2.0]]).unwrap();
        assert_eq!(out, array![[3.0, 2.0]]);
    }

    #[test]
    fn most_frequent_breaks_ties_by_value() {
        let s = |v: &str| Some(v.to_string());
        let train = array![[s("b")], [s("a")], [None], [s("b")], [s("a")]];
        let imp = CatImputer::fit(&train, CatNanPolicy::MostFrequent);
        assert_eq!(imp.fill, vec!["a".to_string()]);
        let out = imp.apply(&array![[None]]).unwrap();
        assert_eq!(out[(0, 0)], "a");
    }
}
