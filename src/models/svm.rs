use linfa::dataset::Pr;
use linfa::traits::{Fit, Predict};
use linfa::Dataset;
use linfa_svm::{Svm, SvmParams as LinfaSvmParams};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};
use crate::models::classical::{ClassicalMethod, Estimator};
use crate::preprocessing::labels::Target;
use crate::stats::{argmax_rows, Predictions};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    Linear,
    #[serde(alias = "gauss", alias = "gaussian")]
    Rbf,
    Poly,
}

/// Support vector machine hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SvmParams {
    #[serde(alias = "C")]
    pub c: f64,
    pub kernel: Kernel,
    /// RBF width; defaults to `1 / (n_features * var(X))`.
    pub gamma: Option<f64>,
    /// Constant term of the polynomial kernel.
    pub coef0: f64,
    pub degree: f64,
    /// Insensitive-tube width of epsilon-SVR.
    pub epsilon: f64,
    pub tol: f64,
}

impl Default for SvmParams {
    fn default() -> Self {
        SvmParams {
            c: 1.0,
            kernel: Kernel::Rbf,
            gamma: None,
            coef0: 0.0,
            degree: 3.0,
            epsilon: 0.1,
            tol: 1e-3,
        }
    }
}

impl SvmParams {
    fn resolved_gamma(&self, x: &Array2<f64>) -> f64 {
        if let Some(g) = self.gamma {
            return g;
        }
        let n = x.len();
        if n == 0 {
            return 1.0;
        }
        let mean = x.sum() / n as f64;
        let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        if var > 0.0 {
            1.0 / (x.ncols() as f64 * var)
        } else {
            1.0
        }
    }

    fn with_kernel<T>(&self, params: LinfaSvmParams<f64, T>, gamma: f64) -> LinfaSvmParams<f64, T> {
        match self.kernel {
            Kernel::Linear => params.linear_kernel(),
            Kernel::Rbf => params.gaussian_kernel(1.0 / gamma),
            Kernel::Poly => params.polynomial_kernel(self.coef0, self.degree),
        }
    }
}

/// Fitted support vector model: a single calibrated classifier for binary
/// tasks, one calibrated classifier per class otherwise, or a regressor.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SvmModel {
    Binary(Svm<f64, Pr>),
    OneVsRest(Vec<Svm<f64, Pr>>),
    Regressor(Svm<f64, f64>),
}

fn fit_binary(params: &SvmParams, gamma: f64, x: &Array2<f64>, positive: Array1<bool>) -> Result<Svm<f64, Pr>> {
    let base = Svm::<f64, Pr>::params()
        .eps(params.tol)
        .pos_neg_weights(params.c, params.c);
    let svm_params = params.with_kernel(base, gamma);
    let dataset = Dataset::new(x.clone(), positive);
    svm_params
        .fit(&dataset)
        .map_err(|e| BenchError::Estimator(e.to_string()))
}

pub struct SvmEstimator;

impl Estimator for SvmEstimator {
    const NAME: &'static str = "svm";

    type Params = SvmParams;
    type Fitted = SvmModel;

    fn check_task(_is_regression: bool) -> Result<()> {
        Ok(())
    }

    fn fit(params: &SvmParams, x: &Array2<f64>, y: &Target, _seed: u64) -> Result<SvmModel> {
        let gamma = params.resolved_gamma(x);
        log::debug!("SVM kernel {:?}, gamma = {}", params.kernel, gamma);
        match y {
            Target::Continuous(y) => {
                let base = Svm::<f64, f64>::params()
                    .eps(params.tol)
                    .c_svr(params.c, Some(params.epsilon));
                let svr = params.with_kernel(base, gamma);
                let dataset = Dataset::new(x.clone(), y.clone());
                let model = svr
                    .fit(&dataset)
                    .map_err(|e| BenchError::Estimator(e.to_string()))?;
                Ok(SvmModel::Regressor(model))
            }
            Target::Classes(y) => {
                let n_classes = y.iter().copied().max().map_or(0, |m| m + 1);
                if n_classes <= 2 {
                    let positive = y.mapv(|c| c == 1);
                    Ok(SvmModel::Binary(fit_binary(params, gamma, x, positive)?))
                } else {
                    let models = (0..n_classes)
                        .map(|class| fit_binary(params, gamma, x, y.mapv(|c| c == class)))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(SvmModel::OneVsRest(models))
                }
            }
        }
    }

    fn predict(fitted: &SvmModel, x: &Array2<f64>) -> Result<Predictions> {
        let predictions = match fitted {
            SvmModel::Regressor(model) => Predictions::Values(model.predict(x)),
            SvmModel::Binary(model) => {
                let p: Array1<Pr> = model.predict(x);
                Predictions::Labels(p.mapv(|v| usize::from(*v >= 0.5)))
            }
            SvmModel::OneVsRest(models) => {
                let mut scores = Array2::<f64>::zeros((x.nrows(), models.len()));
                for (mut col, model) in scores.axis_iter_mut(Axis(1)).zip(models) {
                    let p: Array1<Pr> = model.predict(x);
                    col.assign(&p.mapv(|v| *v as f64));
                }
                Predictions::Labels(argmax_rows(&scores))
            }
        };
        Ok(predictions)
    }
}

/// Support vector machine behind the method lifecycle.
pub type SvmMethod = ClassicalMethod<SvmEstimator>;
