//! # Delimited data loading and report writing
//!
//! Reads a header-carrying text table (tab separated, or comma separated for
//! `.csv` files) into a [`FeatureTable`] plus outcome and prediction arrays.
//! Numeric feature columns with many distinct values can be cut into
//! equal-frequency bins so the scan treats them as categories. A categorical
//! outcome column can be mapped to 0/1 through a set of favourable labels,
//! and cells holding a missing-value token are either dropped or filled.

use ahash::AHashMap;
use clap::ValueEnum;
use itertools::Itertools;
use ndarray::Array1;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

use crate::table::FeatureTable;
use crate::types::{ScanError, ScanResult};

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse delimited input: {0}")]
    CsvError(#[from] csv::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("Column '{column}' has non-numeric value '{value}' at data row {row}.")]
    NonNumericValue {
        column: String,
        row: usize,
        value: String,
    },
    #[error("The input file contains no data rows.")]
    NoRows,
    #[error("No feature columns remain after removing the outcome and expectation columns.")]
    NoFeatures,
    #[error("The number of bins must be at least 2, got {0}.")]
    InvalidBinCount(usize),
    #[error("Failed to build the feature table: {0}")]
    Table(#[from] ScanError),
    #[error("Failed to serialize the scan report to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// What to do with a feature cell holding the missing-value token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MissingPolicy {
    /// Drop the whole row.
    #[default]
    Drop,
    /// Replace the cell by the most frequent value of its column.
    Mode,
}

/// Which columns of the file play which role.
#[derive(Debug, Clone, Default)]
pub struct DatasetLayout {
    pub outcome_column: String,
    pub expectation_column: String,
    /// Feature columns to scan; every remaining column when `None`.
    pub feature_columns: Option<Vec<String>>,
    /// Cut numeric features with more distinct values than this into
    /// equal-frequency bins.
    pub numeric_bins: Option<usize>,
    /// Outcome labels counted as 1; every other label counts as 0. The outcome
    /// column is read as numbers when `None`.
    pub favorable_labels: Option<Vec<String>>,
    /// Cell text marking a missing value, such as `?`.
    pub missing_token: Option<String>,
    /// Applies to feature cells. Rows missing the outcome or the prediction
    /// are always dropped.
    pub missing_policy: MissingPolicy,
}

#[derive(Debug, Clone)]
pub struct ScanDataset {
    pub table: FeatureTable,
    pub outcomes: Array1<f64>,
    pub expectations: Array1<f64>,
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => b',',
        _ => b'\t',
    }
}

pub fn load_dataset(path: impl AsRef<Path>, layout: &DatasetLayout) -> Result<ScanDataset, DataError> {
    let path = path.as_ref();
    if let Some(bins) = layout.numeric_bins {
        if bins < 2 {
            return Err(DataError::InvalidBinCount(bins));
        }
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let column_index = |name: &str| -> Result<usize, DataError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    };

    let outcome_idx = column_index(&layout.outcome_column)?;
    let expectation_idx = column_index(&layout.expectation_column)?;
    let feature_idx: Vec<usize> = match &layout.feature_columns {
        Some(names) => names
            .iter()
            .map(|name| column_index(name))
            .collect::<Result<_, _>>()?,
        None => (0..headers.len())
            .filter(|&idx| idx != outcome_idx && idx != expectation_idx)
            .collect(),
    };
    if feature_idx.is_empty() {
        return Err(DataError::NoFeatures);
    }

    let is_missing = |raw: &str| layout.missing_token.as_deref() == Some(raw);
    let mut outcomes = Vec::new();
    let mut expectations = Vec::new();
    let mut features: Vec<Vec<String>> = vec![Vec::new(); feature_idx.len()];
    let mut dropped = 0usize;
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or("");
        let numeric = |idx: usize| -> Result<f64, DataError> {
            let raw = field(idx);
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| DataError::NonNumericValue {
                    column: headers[idx].clone(),
                    row: row + 1,
                    value: raw.to_string(),
                })
        };

        let missing_target = is_missing(field(outcome_idx)) || is_missing(field(expectation_idx));
        let missing_feature = layout.missing_policy == MissingPolicy::Drop
            && feature_idx.iter().any(|&idx| is_missing(field(idx)));
        if missing_target || missing_feature {
            dropped += 1;
            continue;
        }

        let outcome = match &layout.favorable_labels {
            Some(labels) => {
                let label = field(outcome_idx);
                if labels.iter().any(|favorable| favorable == label) {
                    1.0
                } else {
                    0.0
                }
            }
            None => numeric(outcome_idx)?,
        };
        outcomes.push(outcome);
        expectations.push(numeric(expectation_idx)?);
        for (slot, &idx) in features.iter_mut().zip(&feature_idx) {
            slot.push(field(idx).to_string());
        }
    }
    if dropped > 0 {
        log::info!("Dropped {dropped} rows with missing values");
    }
    if outcomes.is_empty() {
        return Err(DataError::NoRows);
    }
    if let (Some(token), MissingPolicy::Mode) = (&layout.missing_token, layout.missing_policy) {
        for (values, &idx) in features.iter_mut().zip(&feature_idx) {
            fill_with_mode(values, token, &headers[idx]);
        }
    }

    let columns = feature_idx
        .iter()
        .zip(features)
        .map(|(&idx, values)| {
            let values = match layout.numeric_bins {
                Some(bins) => bin_numeric(&values, bins).unwrap_or(values),
                None => values,
            };
            (headers[idx].clone(), values)
        })
        .collect::<Vec<_>>();

    let table = FeatureTable::from_columns(columns)?;
    log::info!(
        "Loaded {} rows with {} feature columns from {}",
        table.num_rows(),
        table.num_features(),
        path.display()
    );
    Ok(ScanDataset {
        table,
        outcomes: Array1::from_vec(outcomes),
        expectations: Array1::from_vec(expectations),
    })
}

/// Replaces every `token` cell by the column's most frequent other value;
/// ties go to the lexicographically smallest label.
fn fill_with_mode(values: &mut [String], token: &str, column: &str) {
    let mut counts: AHashMap<&str, usize> = AHashMap::new();
    for value in values.iter().filter(|v| v.as_str() != token) {
        *counts.entry(value.as_str()).or_insert(0) += 1;
    }
    let Some(mode) = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(value, _)| value.to_string())
    else {
        log::warn!("Column '{column}' holds only missing values; keeping '{token}' as a category");
        return;
    };
    let mut filled = 0usize;
    for value in values.iter_mut().filter(|v| v.as_str() == token) {
        value.clone_from(&mode);
        filled += 1;
    }
    if filled > 0 {
        log::debug!("Filled {filled} missing cells of '{column}' with '{mode}'");
    }
}

/// Replaces a numeric column by equal-frequency bin labels. Returns `None`
/// when the column is not numeric or already has at most `bins` distinct
/// values.
fn bin_numeric(values: &[String], bins: usize) -> Option<Vec<String>> {
    let parsed: Vec<f64> = values
        .iter()
        .map(|v| v.parse::<f64>().ok().filter(|x| x.is_finite()))
        .collect::<Option<_>>()?;
    let mut sorted = parsed.clone();
    sorted.sort_by(f64::total_cmp);
    let distinct = sorted.iter().dedup().count();
    if distinct <= bins {
        return None;
    }

    // Lower edges of bins 1.. at the interior quantiles; duplicated edges collapse.
    let n = sorted.len();
    let edges: Vec<f64> = (1..bins)
        .map(|k| sorted[(k * n / bins).min(n - 1)])
        .dedup()
        .collect();
    let bin_of = |x: f64| edges.partition_point(|&edge| edge <= x);

    let width = edges.len().to_string().len().max(2);
    let mut lo = vec![f64::INFINITY; edges.len() + 1];
    let mut hi = vec![f64::NEG_INFINITY; edges.len() + 1];
    for &x in &parsed {
        let b = bin_of(x);
        lo[b] = lo[b].min(x);
        hi[b] = hi[b].max(x);
    }
    Some(
        parsed
            .iter()
            .map(|&x| {
                let b = bin_of(x);
                format!("bin{b:0width$} [{}, {}]", lo[b], hi[b])
            })
            .collect(),
    )
}

/// Writes a scan result as a TOML report.
pub fn write_result(path: impl AsRef<Path>, result: &ScanResult) -> Result<(), DataError> {
    let toml_string = toml::to_string_pretty(result)?;
    let mut file = BufWriter::new(fs::File::create(path)?);
    file.write_all(toml_string.as_bytes())?;
    file.flush()?;
    Ok(())
}
