//! Method registry.
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::RunConfig;
use crate::error::{BenchError, Result};
use crate::models::logreg::LogRegMethod;
use crate::models::model_interface::Method;
use crate::models::svm::SvmMethod;
use crate::models::switchtab::SwitchTabMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    LogReg,
    Svm,
    SwitchTab,
}

impl MethodKind {
    pub const ALL: [MethodKind; 3] = [MethodKind::LogReg, MethodKind::Svm, MethodKind::SwitchTab];

    pub fn as_str(&self) -> &'static str {
        match self {
            MethodKind::LogReg => "logreg",
            MethodKind::Svm => "svm",
            MethodKind::SwitchTab => "switchtab",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodKind {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "logreg" | "logistic_regression" => Ok(MethodKind::LogReg),
            "svm" => Ok(MethodKind::Svm),
            "switchtab" => Ok(MethodKind::SwitchTab),
            other => Err(BenchError::InvalidConfig(format!("unknown method: {}", other))),
        }
    }
}

/// Construct a method for a task type. Policy violations (an adapter that
/// cannot take the task or the categorical policy) surface here.
pub fn build_method(kind: MethodKind, config: Arc<RunConfig>, is_regression: bool) -> Result<Box<dyn Method>> {
    log::info!(
        "Building {} for a {} task",
        kind,
        if is_regression { "regression" } else { "classification" }
    );
    let method: Box<dyn Method> = match kind {
        MethodKind::LogReg => Box::new(LogRegMethod::new(config, is_regression)?),
        MethodKind::Svm => Box::new(SvmMethod::new(config, is_regression)?),
        MethodKind::SwitchTab => Box::new(SwitchTabMethod::new(config, is_regression)?),
    };
    Ok(method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in MethodKind::ALL {
            assert_eq!(kind.as_str().parse::<MethodKind>().unwrap(), kind);
        }
        assert!("xgboost".parse::<MethodKind>().is_err());
    }
}
