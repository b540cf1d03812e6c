use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

/// How missing numeric values are filled.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NumNanPolicy {
    Mean,
    Median,
}

/// How missing categorical values are filled.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CatNanPolicy {
    /// Missing values become their own category.
    New,
    MostFrequent,
}

/// Categorical encoding strategy.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CatPolicy {
    /// Keep a separate matrix of category indices.
    Indices,
    Ordinal,
    Ohe,
    Binary,
    Target,
}

impl CatPolicy {
    /// Whether the encoded categories are folded into the numeric matrix.
    pub fn folds_into_numeric(&self) -> bool {
        !matches!(self, CatPolicy::Indices)
    }
}

/// Numeric feature scaling.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    None,
    Standard,
    Minmax,
    Robust,
    Maxabs,
    Quantile,
}

/// Target scaling for regression tasks.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetPolicy {
    MeanStd,
    MinMax,
    None,
}

macro_rules! impl_policy_from_str {
    ($ty:ty, $what:literal, { $($name:literal => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = BenchError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    _ => Err(BenchError::InvalidConfig(format!(
                        "unknown {} `{}`",
                        $what, s
                    ))),
                }
            }
        }
    };
}

impl_policy_from_str!(NumNanPolicy, "numeric nan policy", {
    "mean" => NumNanPolicy::Mean,
    "median" => NumNanPolicy::Median,
});

impl_policy_from_str!(CatNanPolicy, "categorical nan policy", {
    "new" => CatNanPolicy::New,
    "most_frequent" => CatNanPolicy::MostFrequent,
});

impl_policy_from_str!(CatPolicy, "categorical policy", {
    "indices" => CatPolicy::Indices,
    "ordinal" => CatPolicy::Ordinal,
    "ohe" => CatPolicy::Ohe,
    "binary" => CatPolicy::Binary,
    "target" => CatPolicy::Target,
});

impl_policy_from_str!(Normalization, "normalization", {
    "none" => Normalization::None,
    "standard" => Normalization::Standard,
    "minmax" => Normalization::Minmax,
    "robust" => Normalization::Robust,
    "maxabs" => Normalization::Maxabs,
    "quantile" => Normalization::Quantile,
});

impl_policy_from_str!(TargetPolicy, "target policy", {
    "mean_std" => TargetPolicy::MeanStd,
    "min_max" => TargetPolicy::MinMax,
    "none" => TargetPolicy::None,
});

/// Optimizer hyper-parameters for learned methods.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub lr: f64,
    pub weight_decay: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            weight_decay: 0.0,
        }
    }
}

/// Per-method configuration. `model` is forwarded verbatim to the adapter,
/// which deserializes it into its own parameter struct.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MethodConfig {
    pub model: serde_json::Value,
    pub training: TrainingConfig,
}

impl Default for MethodConfig {
    fn default() -> Self {
        Self {
            model: serde_json::Value::Object(serde_json::Map::new()),
            training: TrainingConfig::default(),
        }
    }
}

impl MethodConfig {
    pub fn new(model: serde_json::Value, training: TrainingConfig) -> Self {
        Self { model, training }
    }

    /// Deserialize the model section into a typed parameter struct.
    /// A `null` model section yields the parameter defaults.
    pub fn model_params<P>(&self) -> Result<P>
    where
        P: serde::de::DeserializeOwned + Default,
    {
        if self.model.is_null() {
            return Ok(P::default());
        }
        serde_json::from_value(self.model.clone())
            .map_err(|e| BenchError::InvalidConfig(format!("model parameters: {}", e)))
    }
}

/// Immutable configuration of one experiment run.
///
/// Shared by reference (`Arc<RunConfig>`) with every component a method
/// constructs; nothing reads configuration from ambient state.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub seed: u64,
    pub save_path: PathBuf,
    pub cat_policy: CatPolicy,
    pub num_nan_policy: NumNanPolicy,
    pub cat_nan_policy: CatNanPolicy,
    pub normalization: Normalization,
    pub target_policy: TargetPolicy,
    pub device: String,
    pub batch_size: usize,
    pub max_epoch: usize,
    pub early_stop_patience: usize,
    pub config: MethodConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            seed: 0,
            save_path: PathBuf::from("results"),
            cat_policy: CatPolicy::Ordinal,
            num_nan_policy: NumNanPolicy::Mean,
            cat_nan_policy: CatNanPolicy::New,
            normalization: Normalization::Standard,
            target_policy: TargetPolicy::MeanStd,
            device: String::from("cpu"),
            batch_size: 1024,
            max_epoch: 200,
            early_stop_patience: 20,
            config: MethodConfig::default(),
        }
    }
}

impl RunConfig {
    /// Build a configuration from a partial JSON object. Missing or invalid
    /// fields keep their default value and are reported with a warning.
    pub fn from_json_value(partial: &serde_json::Value) -> Self {
        let mut config = RunConfig::default();

        macro_rules! load_or_default {
            ($field:ident) => {
                if let Some(val) = partial.get(stringify!($field)) {
                    if let Ok(parsed) = serde_json::from_value(val.clone()) {
                        config.$field = parsed;
                    } else {
                        log::warn!(
                            "Config invalid value for '{}', using default: {:?}",
                            stringify!($field),
                            config.$field
                        );
                    }
                } else {
                    log::debug!(
                        "Config missing field '{}', using default: {:?}",
                        stringify!($field),
                        config.$field
                    );
                }
            };
        }

        load_or_default!(seed);
        load_or_default!(save_path);
        load_or_default!(cat_policy);
        load_or_default!(num_nan_policy);
        load_or_default!(cat_nan_policy);
        load_or_default!(normalization);
        load_or_default!(target_policy);
        load_or_default!(device);
        load_or_default!(batch_size);
        load_or_default!(max_epoch);
        load_or_default!(early_stop_patience);
        load_or_default!(config);

        config
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let partial: serde_json::Value = serde_json::from_str(&content)?;
        Ok(Self::from_json_value(&partial))
    }

    /// A copy of this configuration with another seed, used
    /// when several runs of the same experiment go side by side.
    pub fn with_seed(&self, seed: u64) -> Self {
        RunConfig {
            seed,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BenchError::InvalidConfig("batch_size must be > 0".into()));
        }
        if !(self.config.training.lr > 0.0) {
            return Err(BenchError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.config.training.lr
            )));
        }
        Ok(())
    }
}
