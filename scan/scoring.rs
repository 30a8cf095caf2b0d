//! # Likelihood-ratio scoring
//!
//! Each subgroup is summarised by a [`GroupStats`] aggregate of its members and
//! scored by maximising a one-parameter log-likelihood ratio over the odds (or
//! mean) multiplier `q`. Under the null hypothesis the model is calibrated
//! inside the subgroup (`q = 1`); the alternative lets the subgroup's outcomes
//! deviate by a constant multiplicative factor.
//!
//! Every family's ratio is concave in `q` (Bernoulli: concave in `ln q`) and
//! equal to zero at `q = 1`, so the maximiser over a half-domain is the
//! unconstrained maximiser clamped to that half-domain, and the resulting
//! score is never negative. Both half-domains keep `q` strictly positive, so
//! with positive predictions `q > 1` always means "observed above predicted".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::direction::Orientation;

/// Upper bound on the odds multiplier explored by the optimisers.
pub const Q_MAX: f64 = 1e6;
/// Predictions are kept this far away from the 0/1 boundary.
pub const PROBABILITY_EPSILON: f64 = 1e-9;

const BISECTION_WIDTH: f64 = 1e-12;
const BISECTION_MAX_STEPS: usize = 200;

/// The outcome model the scan assumes inside a subgroup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoringFunction {
    /// Binary outcomes against predicted probabilities; `q` multiplies the odds.
    Bernoulli,
    /// Count outcomes against predicted rates; `q` multiplies the rate.
    Poisson,
    /// Continuous outcomes against predicted means with known variance; `q`
    /// multiplies the mean, so predicted means must be positive.
    Gaussian { variance: f64 },
}

impl fmt::Display for ScoringFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bernoulli => f.write_str("bernoulli"),
            Self::Poisson => f.write_str("poisson"),
            Self::Gaussian { variance } => write!(f, "gaussian(variance={variance})"),
        }
    }
}

/// Sufficient statistics of a set of observations.
///
/// The Bernoulli ratio does not reduce to sums, so member predictions are
/// retained alongside the running sums.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupStats {
    pub count: usize,
    pub observed_sum: f64,
    pub expected_sum: f64,
    pub cross_sum: f64,
    pub expected_sq_sum: f64,
    expectations: Vec<f64>,
}

impl GroupStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, outcome: f64, expectation: f64) {
        self.count += 1;
        self.observed_sum += outcome;
        self.expected_sum += expectation;
        self.cross_sum += outcome * expectation;
        self.expected_sq_sum += expectation * expectation;
        self.expectations.push(expectation);
    }

    pub fn merge(&mut self, other: &GroupStats) {
        self.count += other.count;
        self.observed_sum += other.observed_sum;
        self.expected_sum += other.expected_sum;
        self.cross_sum += other.cross_sum;
        self.expected_sq_sum += other.expected_sq_sum;
        self.expectations.extend_from_slice(&other.expectations);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn expectations(&self) -> &[f64] {
        &self.expectations
    }
}

impl FromIterator<(f64, f64)> for GroupStats {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let mut stats = GroupStats::new();
        for (outcome, expectation) in iter {
            stats.push(outcome, expectation);
        }
        stats
    }
}

impl ScoringFunction {
    /// Log-likelihood ratio of the alternative with multiplier `q` against
    /// the calibrated null.
    pub fn log_likelihood_ratio(&self, stats: &GroupStats, q: f64) -> f64 {
        if stats.is_empty() {
            return 0.0;
        }
        match *self {
            Self::Bernoulli => {
                let q = q.clamp(1.0 / Q_MAX, Q_MAX);
                let normaliser: f64 = stats
                    .expectations
                    .iter()
                    .map(|&p| (1.0 - p + q * p).ln())
                    .sum();
                stats.observed_sum * q.ln() - normaliser
            }
            Self::Poisson => {
                let q = q.clamp(1.0 / Q_MAX, Q_MAX);
                stats.observed_sum * q.ln() - (q - 1.0) * stats.expected_sum
            }
            Self::Gaussian { variance } => {
                (2.0 * (q - 1.0) * stats.cross_sum - (q * q - 1.0) * stats.expected_sq_sum)
                    / (2.0 * variance)
            }
        }
    }

    /// Unconstrained maximum-likelihood multiplier for the group.
    pub fn q_mle(&self, stats: &GroupStats) -> f64 {
        if stats.is_empty() {
            return 1.0;
        }
        match *self {
            Self::Bernoulli => bernoulli_q_mle(stats),
            Self::Poisson => {
                if stats.expected_sum <= 0.0 {
                    return 1.0;
                }
                (stats.observed_sum / stats.expected_sum).clamp(1.0 / Q_MAX, Q_MAX)
            }
            Self::Gaussian { .. } => {
                if stats.expected_sq_sum <= 0.0 {
                    return 1.0;
                }
                (stats.cross_sum / stats.expected_sq_sum).clamp(-Q_MAX, Q_MAX)
            }
        }
    }

    /// Bias score of the group: the ratio maximised over the admissible
    /// half-domain. Zero for empty groups and for groups that deviate only in
    /// the other direction.
    pub fn score(&self, stats: &GroupStats, orientation: Orientation) -> f64 {
        if stats.is_empty() {
            return 0.0;
        }
        let q = orientation.clamp(self.q_mle(stats));
        if q == 1.0 {
            return 0.0;
        }
        self.log_likelihood_ratio(stats, q).max(0.0)
    }
}

/// Solves `sum(y) = sum(q p / (1 - p + q p))` for `t = ln q` by bisection.
///
/// The left-hand derivative in `t` is strictly decreasing, so the root is
/// unique; when it lies outside the bracket the nearer edge is returned.
fn bernoulli_q_mle(stats: &GroupStats) -> f64 {
    let observed = stats.observed_sum;
    let slope = |t: f64| -> f64 {
        let q = t.exp();
        let expected: f64 = stats
            .expectations
            .iter()
            .map(|&p| q * p / (1.0 - p + q * p))
            .sum();
        observed - expected
    };

    let mut lo = -Q_MAX.ln();
    let mut hi = Q_MAX.ln();
    if slope(lo) <= 0.0 {
        return lo.exp();
    }
    if slope(hi) >= 0.0 {
        return hi.exp();
    }

    for _ in 0..BISECTION_MAX_STEPS {
        if hi - lo < BISECTION_WIDTH {
            break;
        }
        let mid = 0.5 * (lo + hi);
        if slope(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (0.5 * (lo + hi)).exp()
}
