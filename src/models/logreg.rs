use linfa::traits::Fit;
use linfa::Dataset;
use linfa_logistic::{MultiFittedLogisticRegression, MultiLogisticRegression};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};
use crate::models::classical::{ClassicalMethod, Estimator};
use crate::preprocessing::labels::Target;
use crate::stats::Predictions;

/// Multinomial logistic regression hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LogRegParams {
    /// L2 penalty strength.
    pub alpha: f64,
    #[serde(alias = "max_iter")]
    pub max_iterations: u64,
    #[serde(alias = "tol")]
    pub gradient_tolerance: f64,
    pub fit_intercept: bool,
}

impl Default for LogRegParams {
    fn default() -> Self {
        LogRegParams {
            alpha: 1.0,
            max_iterations: 100,
            gradient_tolerance: 1e-4,
            fit_intercept: true,
        }
    }
}

pub struct LogReg;

impl Estimator for LogReg {
    const NAME: &'static str = "logreg";

    type Params = LogRegParams;
    type Fitted = MultiFittedLogisticRegression<f64, usize>;

    fn check_task(is_regression: bool) -> Result<()> {
        if is_regression {
            return Err(BenchError::PolicyViolation(
                "logreg supports classification tasks only".into(),
            ));
        }
        Ok(())
    }

    fn fit(params: &LogRegParams, x: &Array2<f64>, y: &Target, _seed: u64) -> Result<Self::Fitted> {
        let y = match y {
            Target::Classes(y) => y.clone(),
            Target::Continuous(_) => {
                return Err(BenchError::InvalidData("logreg needs class targets".into()))
            }
        };
        let model = MultiLogisticRegression::<f64>::default()
            .alpha(params.alpha)
            .max_iterations(params.max_iterations)
            .gradient_tolerance(params.gradient_tolerance)
            .with_intercept(params.fit_intercept);
        let dataset = Dataset::new(x.clone(), y);
        model
            .fit(&dataset)
            .map_err(|e| BenchError::Estimator(e.to_string()))
    }

    fn predict(fitted: &Self::Fitted, x: &Array2<f64>) -> Result<Predictions> {
        Ok(Predictions::Probabilities(fitted.predict_probabilities(x)))
    }
}

/// Logistic regression behind the method lifecycle.
pub type LogRegMethod = ClassicalMethod<LogReg>;
