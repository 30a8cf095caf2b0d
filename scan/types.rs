// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// Types used by more than one module. A type with a single user lives next to it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::direction::ScanDirection;
use crate::scoring::ScoringFunction;
use crate::subgroup::Subgroup;

/// Every way a scan or a scoring call can be rejected. All variants are fatal
/// to the call; no partial result is produced.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("{what} has {found} entries, but the feature table has {expected} rows.")]
    LengthMismatch {
        what: String,
        expected: usize,
        found: usize,
    },
    #[error("The feature table is empty. At least one feature and one row are required.")]
    EmptyTable,
    #[error("Non-finite value (NaN or Infinity) in {what} at row {row}.")]
    NonFinite { what: &'static str, row: usize },
    #[error("Predicted probability {value} at row {row} lies outside [0, 1].")]
    ProbabilityOutOfRange { row: usize, value: f64 },
    #[error("Outcome {value} at row {row} is not valid for {scoring} scoring.")]
    InvalidOutcome {
        row: usize,
        value: f64,
        scoring: &'static str,
    },
    #[error("Expected value {value} at row {row} is negative; Poisson scoring requires rates >= 0.")]
    NegativeExpectation { row: usize, value: f64 },
    #[error(
        "Predicted mean {value} at row {row} is not positive; Gaussian scoring scales the mean and requires means > 0."
    )]
    NonPositiveMean { row: usize, value: f64 },
    #[error("Feature '{0}' does not exist in the feature table.")]
    UnknownFeature(String),
    #[error("Feature '{0}' is constrained to an empty set of values.")]
    EmptyConstraint(String),
    #[error("Record {row} has no value for feature '{feature}'.")]
    MissingFeature { row: usize, feature: String },
    #[error("Invalid scan configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("The estimator failed to produce predictions: {0}")]
    Estimator(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Outcome of a bias scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Penalized score of `subgroup`.
    pub score: f64,
    pub direction: ScanDirection,
    /// Restart that produced the subgroup; `None` when nothing beat the whole
    /// dataset.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub best_restart: Option<usize>,
    /// Whether the winning restart reached a local optimum before running out
    /// of passes.
    pub converged: bool,
    pub restarts: usize,
    pub scoring: ScoringFunction,
    pub subgroup: Subgroup,
}

impl ScanResult {
    /// Whether the scan found anything more anomalous than the whole dataset.
    pub fn is_significant(&self) -> bool {
        self.best_restart.is_some() && self.score > 0.0
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (score {:.4}, direction {}, scoring {})",
            self.subgroup, self.score, self.direction, self.scoring
        )
    }
}

/// Descriptive statistics of the observations inside a subgroup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubgroupSummary {
    pub support: usize,
    pub observed_mean: f64,
    pub expected_mean: f64,
}

impl fmt::Display for SubgroupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows, observed mean {:.4}, predicted mean {:.4}",
            self.support, self.observed_mean, self.expected_mean
        )
    }
}
