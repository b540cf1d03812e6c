//! Numeric feature scaling fitted on training statistics.
use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand::distributions::Distribution;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::config::Normalization;
use crate::error::{BenchError, Result};
use crate::preprocessing::nan::median;

/// Columns with a scale at or below this threshold are left unscaled.
const MIN_SCALE: f64 = 10.0 * f64::EPSILON;
const QUANTILE_BOUNDS: f64 = 1e-7;
const QUANTILE_NOISE: f64 = 1e-3;

/// Sorted per-column quantiles of the (noised) training matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileParams {
    pub references: Vec<f64>,
    pub quantiles: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalizer {
    None { n_features: usize },
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    Minmax { min: Vec<f64>, scale: Vec<f64> },
    Robust { center: Vec<f64>, scale: Vec<f64> },
    Maxabs { scale: Vec<f64> },
    Quantile(QuantileParams),
}

fn safe_scale(s: f64) -> f64 {
    if s.abs() <= MIN_SCALE || !s.is_finite() {
        1.0
    } else {
        s
    }
}

/// Percentile with linear interpolation over sorted values, `q` in [0, 1].
fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn sorted_column(col: ArrayView1<f64>) -> Vec<f64> {
    let mut v: Vec<f64> = col.iter().copied().collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

/// Piecewise-linear interpolation with constant extrapolation.
fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let last = xp.len() - 1;
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[last] {
        return fp[last];
    }
    let i = xp.partition_point(|&v| v <= x) - 1;
    let t = (x - xp[i]) / (xp[i + 1] - xp[i]);
    fp[i] + t * (fp[i + 1] - fp[i])
}

fn column_stats<F>(x: &Array2<f64>, f: F) -> Vec<(f64, f64)>
where
    F: Fn(ArrayView1<f64>) -> (f64, f64) + Sync,
{
    (0..x.ncols())
        .into_par_iter()
        .map(|j| f(x.index_axis(Axis(1), j)))
        .collect()
}

impl Normalizer {
    pub fn fit(x: &Array2<f64>, policy: Normalization, seed: u64) -> Result<Self> {
        let normalizer = match policy {
            Normalization::None => Normalizer::None {
                n_features: x.ncols(),
            },
            Normalization::Standard => {
                let (mean, scale) = column_stats(x, |col| {
                    let n = col.len().max(1) as f64;
                    let mean = col.sum() / n;
                    let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                    (mean, safe_scale(var.sqrt()))
                })
                .into_iter()
                .unzip();
                Normalizer::Standard { mean, scale }
            }
            Normalization::Minmax => {
                let (min, scale) = column_stats(x, |col| {
                    let min = col.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = col.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    (min, safe_scale(max - min))
                })
                .into_iter()
                .unzip();
                Normalizer::Minmax { min, scale }
            }
            Normalization::Robust => {
                let (center, scale) = column_stats(x, |col| {
                    let mut v: Vec<f64> = col.iter().copied().collect();
                    let center = median(&mut v);
                    let iqr = percentile_sorted(&v, 0.75) - percentile_sorted(&v, 0.25);
                    (center, safe_scale(iqr))
                })
                .into_iter()
                .unzip();
                Normalizer::Robust { center, scale }
            }
            Normalization::Maxabs => {
                let scale = column_stats(x, |col| {
                    let m = col.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
                    (safe_scale(m), 0.0)
                })
                .into_iter()
                .map(|(s, _)| s)
                .collect();
                Normalizer::Maxabs { scale }
            }
            Normalization::Quantile => Normalizer::Quantile(fit_quantiles(x, seed)?),
        };
        Ok(normalizer)
    }

    pub fn n_features(&self) -> usize {
        match self {
            Normalizer::None { n_features } => *n_features,
            Normalizer::Standard { scale, .. }
            | Normalizer::Minmax { scale, .. }
            | Normalizer::Robust { scale, .. }
            | Normalizer::Maxabs { scale } => scale.len(),
            Normalizer::Quantile(q) => q.quantiles.len(),
        }
    }

    pub fn apply(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features() {
            return Err(BenchError::InvalidData(format!(
                "normalizer fitted on {} columns, got {}",
                self.n_features(),
                x.ncols()
            )));
        }
        let mut out = x.clone();
        match self {
            Normalizer::None { .. } => {}
            Normalizer::Standard { mean: shift, scale }
            | Normalizer::Minmax { min: shift, scale }
            | Normalizer::Robust {
                center: shift,
                scale,
            } => {
                for ((mut col, &m), &s) in out.axis_iter_mut(Axis(1)).zip(shift).zip(scale) {
                    col.mapv_inplace(|v| (v - m) / s);
                }
            }
            Normalizer::Maxabs { scale } => {
                for (mut col, &s) in out.axis_iter_mut(Axis(1)).zip(scale) {
                    col.mapv_inplace(|v| v / s);
                }
            }
            Normalizer::Quantile(params) => {
                let normal = standard_normal()?;
                let clip_lo = normal.inverse_cdf(QUANTILE_BOUNDS - f64::EPSILON);
                let clip_hi = normal.inverse_cdf(1.0 - (QUANTILE_BOUNDS - f64::EPSILON));
                let refs = &params.references;
                let neg_refs: Vec<f64> = refs.iter().rev().map(|v| -v).collect();
                for (mut col, q) in out.axis_iter_mut(Axis(1)).zip(&params.quantiles) {
                    let neg_q: Vec<f64> = q.iter().rev().map(|v| -v).collect();
                    let lower = q[0];
                    let upper = q[q.len() - 1];
                    col.mapv_inplace(|v| {
                        let p = if v - QUANTILE_BOUNDS < lower {
                            0.0
                        } else if v + QUANTILE_BOUNDS > upper {
                            1.0
                        } else {
                            // average of forward and backward interpolation handles repeated quantiles
                            0.5 * (interp(v, q, refs) - interp(-v, &neg_q, &neg_refs))
                        };
                        normal.inverse_cdf(p).clamp(clip_lo, clip_hi)
                    });
                }
            }
        }
        Ok(out)
    }
}

fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| BenchError::InvalidData(e.to_string()))
}

fn fit_quantiles(x: &Array2<f64>, seed: u64) -> Result<QuantileParams> {
    let n = x.nrows();
    if n == 0 {
        return Err(BenchError::InvalidData(
            "quantile normalization needs at least one training row".into(),
        ));
    }
    let n_quantiles = (n / 30).clamp(10, 1000).min(n).max(1);
    let references: Vec<f64> = if n_quantiles == 1 {
        vec![0.0]
    } else {
        (0..n_quantiles)
            .map(|i| i as f64 / (n_quantiles - 1) as f64)
            .collect()
    };

    // Noise breaks ties in discrete columns so the quantiles stay distinct.
    let normal = standard_normal()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut noised = x.clone();
    for mut col in noised.axis_iter_mut(Axis(1)) {
        let n_col = col.len() as f64;
        let mean = col.sum() / n_col;
        let std = (col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n_col).sqrt();
        let noise_std = QUANTILE_NOISE / std.max(QUANTILE_NOISE);
        for v in col.iter_mut() {
            *v += noise_std * normal.sample(&mut rng);
        }
    }

    let quantiles = (0..noised.ncols())
        .into_par_iter()
        .map(|j| {
            let sorted = sorted_column(noised.index_axis(Axis(1), j));
            let mut q: Vec<f64> = references
                .iter()
                .map(|&r| percentile_sorted(&sorted, r))
                .collect();
            for i in 1..q.len() {
                q[i] = q[i].max(q[i - 1]);
            }
            q
        })
        .collect();

    Ok(QuantileParams {
        references,
        quantiles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn interp_extrapolates_flat() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [0.0, 10.0, 20.0];
        assert_eq!(interp(-1.0, &xp, &fp), 0.0);
        assert_eq!(interp(0.5, &xp, &fp), 5.0);
        assert_eq!(interp(3.0, &xp, &fp), 20.0);
    }

    #[test]
    fn constant_columns_keep_unit_scale() {
        let x = array![[1.0, 5.0], [1.0, 7.0]];
        let n = Normalizer::fit(&x, Normalization::Standard, 0).unwrap();
        let out = n.apply(&x).unwrap();
        assert_eq!(out.column(0).to_vec(), vec![0.0, 0.0]);
        assert_eq!(out.column(1).to_vec(), vec![-1.0, 1.0]);
    }

    #[test]
    fn quantile_output_is_monotone_and_clipped() {
        let x = Array2::from_shape_fn((200, 1), |(i, _)| (i as f64).powi(2));
        let n = Normalizer::fit(&x, Normalization::Quantile, 3).unwrap();
        let out = n.apply(&x).unwrap();
        let col = out.column(0);
        for w in col.to_vec().windows(2) {
            assert!(w[1] >= w[0]);
        }
        assert!(col.iter().all(|v| v.is_finite() && v.abs() < 5.3));
    }
}
