//! CSV partition reader.
//!
//! A dataset directory holds one file per partition (`train.csv`,
//! `val.csv`, `test.csv`) with a header row. The [`DataSchema`] names the
//! numeric, categorical and target columns; every other column is ignored.
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use csv::StringRecord;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data_handling::{CatMatrix, Dataset, Partition, Partitions, RawLabels, TaskInfo, TaskType};

/// Cells read as missing in both numeric and categorical columns.
const MISSING_TOKENS: [&str; 4] = ["", "nan", "na", "null"];

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DataSchema {
    #[serde(default)]
    pub num_columns: Vec<String>,
    #[serde(default)]
    pub cat_columns: Vec<String>,
    pub target_column: String,
    pub task_type: TaskType,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}

fn is_missing(value: &str) -> bool {
    let value = value.trim();
    MISSING_TOKENS.iter().any(|t| value.eq_ignore_ascii_case(t))
}

struct RawPartition {
    num: Array2<f64>,
    cat: CatMatrix,
    target: Vec<String>,
}

/// Read the partitions `parts` from `data_dir`. Partitions whose file does
/// not exist are skipped; at least one must be present.
pub fn read_partitions<P: AsRef<Path>>(data_dir: P, schema: &DataSchema, parts: &[Partition]) -> Result<Dataset> {
    let data_dir = data_dir.as_ref();
    let mut raw: Partitions<RawPartition> = Partitions::new();
    for &part in parts {
        let path = data_dir.join(format!("{}.csv", part));
        if !path.exists() {
            log::debug!("No {} partition at {:?}", part, path);
            continue;
        }
        let partition = read_csv(&path, schema)?;
        log::info!("Read {} rows for {} partition from {:?}", partition.target.len(), part, path);
        raw.insert(part, partition);
    }
    if raw.is_empty() {
        return Err(anyhow!("No partition files found in {}", data_dir.display()));
    }

    // Class labels stay numeric only if every partition parses as numbers.
    let numeric_target = schema.task_type.is_regression()
        || raw
            .values()
            .all(|p| p.target.iter().all(|v| v.trim().parse::<f64>().is_ok()));

    let mut n: Partitions<Array2<f64>> = Partitions::new();
    let mut c: Partitions<CatMatrix> = Partitions::new();
    let mut y: Partitions<RawLabels> = Partitions::new();
    for (part, p) in raw {
        let labels = if numeric_target {
            let values = p
                .target
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    v.trim()
                        .parse::<f64>()
                        .with_context(|| format!("Invalid target '{}' at row {} of {}", v, i + 1, part))
                })
                .collect::<Result<Vec<f64>>>()?;
            RawLabels::Values(Array1::from_vec(values))
        } else {
            RawLabels::Classes(p.target.iter().map(|v| v.trim().to_string()).collect())
        };
        y.insert(part, labels);
        if !schema.num_columns.is_empty() {
            n.insert(part, p.num);
        }
        if !schema.cat_columns.is_empty() {
            c.insert(part, p.cat);
        }
    }

    let info = TaskInfo {
        task_type: schema.task_type,
        n_num_features: schema.num_columns.len(),
        n_cat_features: schema.cat_columns.len(),
    };
    let dataset = Dataset::new(
        if n.is_empty() { None } else { Some(n) },
        if c.is_empty() { None } else { Some(c) },
        y,
        info,
    )?;
    Ok(dataset)
}

fn read_csv(path: &Path, schema: &DataSchema) -> Result<RawPartition> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(schema.delimiter as u8)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open data file: {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header row of {}", path.display()))?
        .clone();

    let target_idx = find_column(&headers, &schema.target_column)
        .ok_or_else(|| anyhow!("Missing target column '{}'", schema.target_column))?;
    let num_idx = resolve_columns(&headers, &schema.num_columns)?;
    let cat_idx = resolve_columns(&headers, &schema.cat_columns)?;

    let mut num = Vec::new();
    let mut cat = Vec::new();
    let mut target = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;
        let field = |idx: usize| {
            record
                .get(idx)
                .ok_or_else(|| anyhow!("Row {} is shorter than the header", row_idx + 1))
        };

        target.push(field(target_idx)?.to_string());
        for &idx in &num_idx {
            let value = field(idx)?;
            let parsed = if is_missing(value) {
                f64::NAN
            } else {
                value.trim().parse::<f64>().with_context(|| {
                    format!(
                        "Invalid numeric value '{}' in column '{}' at row {}",
                        value,
                        headers.get(idx).unwrap_or(""),
                        row_idx + 1
                    )
                })?
            };
            num.push(parsed);
        }
        for &idx in &cat_idx {
            let value = field(idx)?;
            cat.push(if is_missing(value) {
                None
            } else {
                Some(value.trim().to_string())
            });
        }
    }

    let n_rows = target.len();
    Ok(RawPartition {
        num: Array2::from_shape_vec((n_rows, num_idx.len()), num).context("Failed to build numeric matrix")?,
        cat: Array2::from_shape_vec((n_rows, cat_idx.len()), cat)
            .context("Failed to build categorical matrix")?,
        target,
    })
}

fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header.trim() == name)
}

fn resolve_columns(headers: &StringRecord, names: &[String]) -> Result<Vec<usize>> {
    names
        .iter()
        .map(|name| find_column(headers, name).ok_or_else(|| anyhow!("Missing column '{}'", name)))
        .collect()
}
