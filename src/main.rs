use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use tabench::config::RunConfig;
use tabench::data_handling::Partition;
use tabench::io::{read_partitions, DataSchema};
use tabench::models::factory::{build_method, MethodKind};
use tabench::models::model_interface::{FitOptions, PredictOutput};

/// Experiment-level settings read from the same JSON file as the run configuration.
#[derive(Deserialize, Debug, Clone)]
struct ExperimentConfig {
    method: String,
    data_dir: PathBuf,
    schema: DataSchema,
}

#[derive(Serialize, Debug)]
struct RunResult<'a> {
    method: &'a str,
    seed: u64,
    metric_names: &'a [&'static str],
    metrics: &'a [f64],
}

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("TABENCH_LOG", "error,tabench=info"))
        .init();

    let config_arg = || {
        Arg::new("config")
            .help("Path to the run configuration file (JSON)")
            .required(true)
            .value_parser(clap::value_parser!(PathBuf))
            .value_hint(ValueHint::FilePath)
    };

    let matches = Command::new("tabench")
        .version(clap::crate_version!())
        .about("Train, checkpoint and evaluate tabular prediction methods")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("train")
                .about("Fit the configured method on train/val and evaluate on test")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("predict")
                .about("Evaluate a saved checkpoint on the test partition")
                .arg(config_arg())
                .arg(
                    Arg::new("model_name")
                        .short('m')
                        .long("model_name")
                        .help("Checkpoint stem to load, e.g. 'best-val' or 'epoch-last'")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new()),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("train", sub_m)) => run_train(sub_m),
        Some(("predict", sub_m)) => run_predict(sub_m),
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

fn load_configs(matches: &ArgMatches) -> Result<(RunConfig, ExperimentConfig, MethodKind)> {
    let config_path = matches
        .get_one::<PathBuf>("config")
        .context("Missing configuration path")?;
    log::info!("[tabench] Using config: {:?}", config_path);
    let run = RunConfig::from_json_file(config_path)
        .with_context(|| format!("Failed to load run config {:?}", config_path))?;
    let content = fs::read_to_string(config_path)?;
    let experiment: ExperimentConfig = serde_json::from_str(&content)
        .with_context(|| format!("Config {:?} needs `method`, `data_dir` and `schema`", config_path))?;
    let kind: MethodKind = experiment.method.parse()?;
    Ok((run, experiment, kind))
}

fn run_train(matches: &ArgMatches) -> Result<()> {
    let (run, experiment, kind) = load_configs(matches)?;
    let dataset = read_partitions(&experiment.data_dir, &experiment.schema, &Partition::ALL)?;
    let config = Arc::new(run);
    let mut method = build_method(kind, config.clone(), dataset.is_regression())?;

    let test = if dataset.has_partition(Partition::Test) {
        Some(dataset.select(Partition::Test)?)
    } else {
        None
    };
    method
        .fit(dataset, FitOptions::default())
        .with_context(|| format!("Training {} failed", kind))?;
    log::info!(
        "[tabench] {} trained, best validation result {:?} at epoch {:?}",
        kind,
        method.training_log().best_res,
        method.training_log().best_epoch
    );

    match test {
        Some(test) => {
            let model_name = method.checkpoint_name();
            let output = method.predict(&test, model_name)?;
            report(kind, &config, &output)
        }
        None => {
            log::info!("[tabench] No test partition, skipping evaluation");
            Ok(())
        }
    }
}

fn run_predict(matches: &ArgMatches) -> Result<()> {
    let (run, experiment, kind) = load_configs(matches)?;
    let dataset = read_partitions(&experiment.data_dir, &experiment.schema, &[Partition::Test])?;
    let config = Arc::new(run);
    let mut method = build_method(kind, config.clone(), dataset.is_regression())?;
    let model_name = matches
        .get_one::<String>("model_name")
        .map(String::as_str)
        .unwrap_or_else(|| method.checkpoint_name());
    let output = method
        .predict(&dataset, model_name)
        .with_context(|| format!("Prediction with {} failed", kind))?;
    report(kind, &config, &output)
}

fn report(kind: MethodKind, config: &RunConfig, output: &PredictOutput) -> Result<()> {
    for (name, value) in output.metric_names.iter().zip(&output.metrics) {
        println!("{}: {:.6}", name, value);
    }
    let result = RunResult {
        method: kind.as_str(),
        seed: config.seed,
        metric_names: &output.metric_names,
        metrics: &output.metrics,
    };
    let path = results_path(&config.save_path, config.seed);
    fs::create_dir_all(&config.save_path)?;
    fs::write(&path, serde_json::to_string_pretty(&result)?)
        .with_context(|| format!("Failed to write {:?}", path))?;
    log::info!("[tabench] Results written to {:?}", path);
    Ok(())
}

fn results_path(save_path: &Path, seed: u64) -> PathBuf {
    save_path.join(format!("results-{}.json", seed))
}
