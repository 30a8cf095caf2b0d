//! # Multi-restart scan driver
//!
//! Validates caller inputs, derives one seed per restart from the caller's
//! random source, runs the restarts concurrently and reduces their immutable
//! outcomes by maximum score. Ties go to the lower restart index, so the
//! result does not depend on thread scheduling.

use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;

use crate::config::ScanConfig;
use crate::direction::ScanDirection;
use crate::estimator::Estimator;
use crate::progress::{NoopScanProgress, ScanProgressObserver, ScanProgressStage};
use crate::scoring::{PROBABILITY_EPSILON, ScoringFunction};
use crate::search::{RestartOutcome, SearchContext, Selection, random_selection};
use crate::subgroup::Subgroup;
use crate::table::FeatureTable;
use crate::types::{ScanError, ScanResult, SubgroupSummary};

/// Caller-owned data for one scan: a feature table plus the parallel arrays
/// of observed outcomes and model predictions.
#[derive(Debug, Clone, Copy)]
pub struct ScanInputs<'a> {
    pub table: &'a FeatureTable,
    pub outcomes: ArrayView1<'a, f64>,
    /// Predicted probabilities (Bernoulli) or expected values.
    pub expectations: ArrayView1<'a, f64>,
}

impl<'a> ScanInputs<'a> {
    pub fn new(
        table: &'a FeatureTable,
        outcomes: ArrayView1<'a, f64>,
        expectations: ArrayView1<'a, f64>,
    ) -> Self {
        Self {
            table,
            outcomes,
            expectations,
        }
    }
}

/// Validated copies of the numeric inputs, with predictions moved away from
/// the boundaries the scoring function cannot evaluate.
struct PreparedInputs {
    outcomes: Vec<f64>,
    expectations: Vec<f64>,
}

fn prepare(inputs: &ScanInputs<'_>, scoring: ScoringFunction) -> Result<PreparedInputs, ScanError> {
    let n = inputs.table.num_rows();
    if n == 0 || inputs.table.num_features() == 0 {
        return Err(ScanError::EmptyTable);
    }
    if inputs.outcomes.len() != n {
        return Err(ScanError::LengthMismatch {
            what: "outcomes".to_string(),
            expected: n,
            found: inputs.outcomes.len(),
        });
    }
    if inputs.expectations.len() != n {
        return Err(ScanError::LengthMismatch {
            what: "expectations".to_string(),
            expected: n,
            found: inputs.expectations.len(),
        });
    }

    let mut outcomes = Vec::with_capacity(n);
    let mut expectations = Vec::with_capacity(n);
    for (row, (&y, &mu)) in inputs
        .outcomes
        .iter()
        .zip(inputs.expectations.iter())
        .enumerate()
    {
        if !y.is_finite() {
            return Err(ScanError::NonFinite {
                what: "outcomes",
                row,
            });
        }
        if !mu.is_finite() {
            return Err(ScanError::NonFinite {
                what: "expectations",
                row,
            });
        }
        let mu = match scoring {
            ScoringFunction::Bernoulli => {
                if y != 0.0 && y != 1.0 {
                    return Err(ScanError::InvalidOutcome {
                        row,
                        value: y,
                        scoring: "bernoulli",
                    });
                }
                if !(0.0..=1.0).contains(&mu) {
                    return Err(ScanError::ProbabilityOutOfRange { row, value: mu });
                }
                mu.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON)
            }
            ScoringFunction::Poisson => {
                if y < 0.0 {
                    return Err(ScanError::InvalidOutcome {
                        row,
                        value: y,
                        scoring: "poisson",
                    });
                }
                if mu < 0.0 {
                    return Err(ScanError::NegativeExpectation { row, value: mu });
                }
                mu.max(PROBABILITY_EPSILON)
            }
            ScoringFunction::Gaussian { .. } => {
                if mu <= 0.0 {
                    return Err(ScanError::NonPositiveMean { row, value: mu });
                }
                mu
            }
        };
        outcomes.push(y);
        expectations.push(mu);
    }
    Ok(PreparedInputs {
        outcomes,
        expectations,
    })
}

/// Entry point for scoring and searching subgroups.
#[derive(Debug, Clone)]
pub struct BiasScanner {
    config: ScanConfig,
}

impl BiasScanner {
    pub fn new(config: ScanConfig) -> Result<Self, ScanError> {
        config
            .validate()
            .map_err(|err| ScanError::InvalidConfig(err.to_string()))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    fn context<'a>(
        &self,
        table: &'a FeatureTable,
        prepared: &'a PreparedInputs,
        direction: ScanDirection,
    ) -> SearchContext<'a> {
        SearchContext {
            table,
            outcomes: &prepared.outcomes,
            expectations: &prepared.expectations,
            scoring: self.config.scoring,
            orientation: direction.orientation(self.config.favorable_high),
            penalty: self.config.penalty,
            max_passes: self.config.max_passes,
            tolerance: self.config.improvement_tolerance,
        }
    }

    /// Penalized bias score of one caller-specified subgroup, floored at zero.
    ///
    /// The whole dataset and a definition that matches no rows (for example
    /// one naming only values absent from the data) both score zero.
    pub fn score_subgroup(
        &self,
        inputs: &ScanInputs<'_>,
        subgroup: &Subgroup,
        direction: ScanDirection,
    ) -> Result<f64, ScanError> {
        let prepared = prepare(inputs, self.config.scoring)?;
        let selection = subgroup.resolve(inputs.table)?;
        let ctx = self.context(inputs.table, &prepared, direction);
        if ctx.collect(&selection, None).is_empty() {
            return Ok(0.0);
        }
        Ok(ctx
            .score_selection(&selection, subgroup.num_values())
            .max(0.0))
    }

    /// Member count and mean observed/predicted outcome inside `subgroup`.
    pub fn summarize(
        &self,
        inputs: &ScanInputs<'_>,
        subgroup: &Subgroup,
    ) -> Result<SubgroupSummary, ScanError> {
        let prepared = prepare(inputs, self.config.scoring)?;
        let selection = subgroup.resolve(inputs.table)?;
        let ctx = self.context(inputs.table, &prepared, ScanDirection::Privileged);
        let stats = ctx.collect(&selection, None);
        let mean = |sum: f64| {
            if stats.count == 0 {
                0.0
            } else {
                sum / stats.count as f64
            }
        };
        Ok(SubgroupSummary {
            support: stats.count,
            observed_mean: mean(stats.observed_sum),
            expected_mean: mean(stats.expected_sum),
        })
    }

    /// Searches for the most anomalous subgroup, seeded from the
    /// configuration.
    pub fn scan(
        &self,
        inputs: &ScanInputs<'_>,
        direction: ScanDirection,
    ) -> Result<ScanResult, ScanError> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.scan_with_rng(inputs, direction, &mut rng, &NoopScanProgress)
    }

    /// Searches for the most anomalous subgroup, drawing every restart's
    /// seed from `rng`.
    pub fn scan_with_rng<R: RngCore>(
        &self,
        inputs: &ScanInputs<'_>,
        direction: ScanDirection,
        rng: &mut R,
        observer: &dyn ScanProgressObserver,
    ) -> Result<ScanResult, ScanError> {
        observer.on_stage_start(ScanProgressStage::Validation, inputs.table.num_rows());
        let prepared = prepare(inputs, self.config.scoring)?;
        observer.on_stage_finish(ScanProgressStage::Validation);

        let ctx = self.context(inputs.table, &prepared, direction);
        let seeds: Vec<u64> = (0..self.config.restarts).map(|_| rng.next_u64()).collect();

        log::info!(
            "Scanning {} rows over {} features ({} scoring, {} direction, {} restarts)",
            inputs.table.num_rows(),
            inputs.table.num_features(),
            self.config.scoring,
            direction,
            self.config.restarts
        );

        observer.on_stage_start(ScanProgressStage::Restarts, seeds.len());
        let outcomes = match self.config.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()?;
                pool.install(|| run_restarts(&ctx, &seeds, observer))
            }
            None => run_restarts(&ctx, &seeds, observer),
        };
        observer.on_stage_finish(ScanProgressStage::Restarts);

        let result = self.reduce(inputs.table, outcomes, direction);
        log::info!("Scan finished: {result}");
        Ok(result)
    }

    /// Predicts with `estimator` and scans its predictions against `outcomes`.
    pub fn scan_estimator<E: Estimator>(
        &self,
        estimator: &E,
        table: &FeatureTable,
        outcomes: ArrayView1<'_, f64>,
        direction: ScanDirection,
    ) -> Result<ScanResult, ScanError> {
        let expectations: Array1<f64> = estimator
            .expectations(table)
            .map_err(|err| ScanError::Estimator(Box::new(err)))?;
        let inputs = ScanInputs::new(table, outcomes.view(), expectations.view());
        self.scan(&inputs, direction)
    }

    fn reduce(
        &self,
        table: &FeatureTable,
        outcomes: Vec<RestartOutcome>,
        direction: ScanDirection,
    ) -> ScanResult {
        let restarts = outcomes.len();
        let best = outcomes
            .into_iter()
            .fold(None::<RestartOutcome>, |best, candidate| match best {
                Some(current) if current.score >= candidate.score => Some(current),
                _ => Some(candidate),
            })
            .filter(|outcome| outcome.score > 0.0);

        match best {
            Some(outcome) => ScanResult {
                score: outcome.score,
                direction,
                best_restart: Some(outcome.restart),
                converged: outcome.converged,
                restarts,
                scoring: self.config.scoring,
                subgroup: Subgroup::from_selection(table, &outcome.selection),
            },
            None => {
                log::info!("No subgroup scored above the whole dataset");
                ScanResult {
                    score: 0.0,
                    direction,
                    best_restart: None,
                    converged: true,
                    restarts,
                    scoring: self.config.scoring,
                    subgroup: Subgroup::whole(),
                }
            }
        }
    }
}

fn run_restarts(
    ctx: &SearchContext<'_>,
    seeds: &[u64],
    observer: &dyn ScanProgressObserver,
) -> Vec<RestartOutcome> {
    seeds
        .par_iter()
        .enumerate()
        .map(|(restart, &seed)| {
            let mut rng = StdRng::seed_from_u64(seed);
            let start: Selection = if restart == 0 {
                vec![None; ctx.table.num_features()]
            } else {
                random_selection(ctx.table, &mut rng)
            };
            let outcome = ctx.coordinate_ascent(restart, start, &mut rng);
            log::debug!(
                "Restart {restart} finished after {} passes with score {:.6}",
                outcome.passes,
                outcome.score
            );
            observer.on_restart_finish(restart, outcome.score);
            outcome
        })
        .collect()
}
