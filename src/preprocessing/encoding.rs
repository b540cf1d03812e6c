//! Categorical encoding.
//!
//! Vocabularies are learned from the training partition only and kept
//! sorted. Values never seen at fit time map to a reserved code (`indices`,
//! `ordinal`), an all-zero block (`ohe`, `binary`) or the target prior
//! (`target`); encoding never fails on an unknown category.
use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::CatPolicy;
use crate::error::{BenchError, Result};

const TARGET_MIN_SAMPLES_LEAF: f64 = 20.0;
const TARGET_SMOOTHING: f64 = 10.0;

/// Smoothed per-category target means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEncoding {
    pub prior: f64,
    pub maps: Vec<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEncoder {
    pub policy: CatPolicy,
    pub vocab: Vec<Vec<String>>,
    pub target: Option<TargetEncoding>,
}

/// Output of the encoding stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoded {
    Indices(Array2<usize>),
    Numeric(Array2<f64>),
}

impl CategoryEncoder {
    /// Learn vocabularies (and target statistics for `CatPolicy::Target`)
    /// from imputed training categories. `y_train` holds the training
    /// targets as numbers and is required only by the target policy.
    pub fn fit(x: &Array2<String>, policy: CatPolicy, y_train: Option<&Array1<f64>>) -> Result<Self> {
        let vocab: Vec<Vec<String>> = x
            .axis_iter(Axis(1))
            .map(|col| {
                col.iter()
                    .cloned()
                    .collect::<BTreeSet<String>>()
                    .into_iter()
                    .collect()
            })
            .collect();

        let target = match policy {
            CatPolicy::Target => {
                let y = y_train.ok_or_else(|| {
                    BenchError::InvalidData("target encoding requires training targets".into())
                })?;
                if y.len() != x.nrows() {
                    return Err(BenchError::InvalidData(format!(
                        "target encoding got {} targets for {} rows",
                        y.len(),
                        x.nrows()
                    )));
                }
                Some(fit_target_encoding(x, y))
            }
            _ => None,
        };

        Ok(CategoryEncoder {
            policy,
            vocab,
            target,
        })
    }

    pub fn n_columns(&self) -> usize {
        self.vocab.len()
    }

    /// Number of distinct codes per column including the unknown code.
    pub fn category_sizes(&self) -> Vec<usize> {
        self.vocab.iter().map(|v| v.len() + 1).collect()
    }

    /// Width of the encoded block when folded into the numeric matrix.
    pub fn output_width(&self) -> usize {
        match self.policy {
            CatPolicy::Indices | CatPolicy::Ordinal | CatPolicy::Target => self.vocab.len(),
            CatPolicy::Ohe => self.vocab.iter().map(|v| v.len()).sum(),
            CatPolicy::Binary => self.vocab.iter().map(|v| binary_width(v.len())).sum(),
        }
    }

    fn code(&self, col: usize, value: &str) -> Option<usize> {
        self.vocab[col]
            .binary_search_by(|probe| probe.as_str().cmp(value))
            .ok()
    }

    pub fn encode(&self, x: &Array2<String>) -> Result<Encoded> {
        if x.ncols() != self.vocab.len() {
            return Err(BenchError::InvalidData(format!(
                "encoder fitted on {} categorical columns, got {}",
                self.vocab.len(),
                x.ncols()
            )));
        }
        let n = x.nrows();

        let encoded = match self.policy {
            CatPolicy::Indices => Encoded::Indices(Array2::from_shape_fn(x.raw_dim(), |(r, c)| {
                self.code(c, &x[(r, c)]).unwrap_or(self.vocab[c].len())
            })),
            CatPolicy::Ordinal => Encoded::Numeric(Array2::from_shape_fn(x.raw_dim(), |(r, c)| {
                self.code(c, &x[(r, c)]).unwrap_or(self.vocab[c].len()) as f64
            })),
            CatPolicy::Ohe => {
                let mut out = Array2::<f64>::zeros((n, self.output_width()));
                let mut offset = 0;
                for (c, vocab) in self.vocab.iter().enumerate() {
                    for r in 0..n {
                        if let Some(code) = self.code(c, &x[(r, c)]) {
                            out[(r, offset + code)] = 1.0;
                        }
                    }
                    offset += vocab.len();
                }
                Encoded::Numeric(out)
            }
            CatPolicy::Binary => {
                let mut out = Array2::<f64>::zeros((n, self.output_width()));
                let mut offset = 0;
                for (c, vocab) in self.vocab.iter().enumerate() {
                    let width = binary_width(vocab.len());
                    for r in 0..n {
                        // unknown values keep code 0, an all-zero block
                        let code = self.code(c, &x[(r, c)]).map_or(0, |k| k + 1);
                        for bit in 0..width {
                            if (code >> (width - 1 - bit)) & 1 == 1 {
                                out[(r, offset + bit)] = 1.0;
                            }
                        }
                    }
                    offset += width;
                }
                Encoded::Numeric(out)
            }
            CatPolicy::Target => {
                let te = self.target.as_ref().ok_or_else(|| {
                    BenchError::InvalidState("target encoder has no fitted statistics".into())
                })?;
                Encoded::Numeric(Array2::from_shape_fn(x.raw_dim(), |(r, c)| {
                    te.maps[c].get(&x[(r, c)]).copied().unwrap_or(te.prior)
                }))
            }
        };
        Ok(encoded)
    }
}

fn binary_width(n_categories: usize) -> usize {
    if n_categories == 0 {
        1
    } else {
        (usize::BITS - n_categories.leading_zeros()) as usize
    }
}

fn fit_target_encoding(x: &Array2<String>, y: &Array1<f64>) -> TargetEncoding {
    let prior = if y.is_empty() { 0.0 } else { y.sum() / y.len() as f64 };
    let maps = x
        .axis_iter(Axis(1))
        .map(|col| {
            let mut stats: BTreeMap<String, (usize, f64)> = BTreeMap::new();
            for (value, &target) in col.iter().zip(y.iter()) {
                let entry = stats.entry(value.clone()).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += target;
            }
            stats
                .into_iter()
                .map(|(value, (count, sum))| {
                    let encoded = if count == 1 {
                        prior
                    } else {
                        let mean = sum / count as f64;
                        let smoove = 1.0
                            / (1.0 + (-(count as f64 - TARGET_MIN_SAMPLES_LEAF) / TARGET_SMOOTHING).exp());
                        prior * (1.0 - smoove) + mean * smoove
                    };
                    (value, encoded)
                })
                .collect()
        })
        .collect();
    TargetEncoding { prior, maps }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn strings(rows: &[&[&str]]) -> Array2<String> {
        let ncols = rows[0].len();
        let flat: Vec<String> = rows.iter().flat_map(|r| r.iter().map(|s| s.to_string())).collect();
        Array2::from_shape_vec((rows.len(), ncols), flat).unwrap()
    }

    #[test]
    fn binary_width_counts_bits_of_largest_code() {
        assert_eq!(binary_width(1), 1);
        assert_eq!(binary_width(2), 2);
        assert_eq!(binary_width(3), 2);
        assert_eq!(binary_width(4), 3);
    }

    #[test]
    fn binary_codes_are_offset_by_one() {
        let train = strings(&[&["a"], &["b"], &["c"]]);
        let enc = CategoryEncoder::fit(&train, CatPolicy::Binary, None).unwrap();
        match enc.encode(&strings(&[&["a"], &["c"], &["zzz"]])).unwrap() {
            Encoded::Numeric(m) => {
                assert_eq!(m, array![[0.0, 1.0], [1.0, 1.0], [0.0, 0.0]]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn singleton_categories_fall_back_to_prior() {
        let train = strings(&[&["a"], &["a"], &["b"]]);
        let y = array![1.0, 1.0, 4.0];
        let enc = CategoryEncoder::fit(&train, CatPolicy::Target, Some(&y)).unwrap();
        let te = enc.target.as_ref().unwrap();
        assert_eq!(te.prior, 2.0);
        assert_eq!(te.maps[0]["b"], 2.0);
        assert!(te.maps[0]["a"] < 2.0 && te.maps[0]["a"] > 1.0);
    }
}
