use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scoring::Q_MAX;

/// Which kind of deviation the scan looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    /// Subgroups whose observed outcomes are better than the model predicts.
    Privileged,
    /// Subgroups whose observed outcomes are worse than the model predicts.
    Unprivileged,
}

/// The admissible half of the odds-multiplier domain.
///
/// `Increasing` restricts `1 <= q <= Q_MAX` (observed above predicted),
/// `Decreasing` restricts `1 / Q_MAX <= q <= 1` (observed below predicted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Increasing,
    Decreasing,
}

impl ScanDirection {
    /// Maps the named mode onto a `q` half-domain.
    ///
    /// `favorable_high` states whether larger outcomes (label 1 for
    /// classification) are the desirable ones.
    pub fn orientation(self, favorable_high: bool) -> Orientation {
        match (self, favorable_high) {
            (Self::Privileged, true) | (Self::Unprivileged, false) => Orientation::Increasing,
            (Self::Privileged, false) | (Self::Unprivileged, true) => Orientation::Decreasing,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Privileged => "privileged",
            Self::Unprivileged => "unprivileged",
        }
    }
}

impl fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

impl Orientation {
    /// Clamps an unconstrained maximizer onto this half-domain. The result is
    /// always strictly positive, even when the unconstrained maximizer is not.
    #[inline]
    pub fn clamp(self, q: f64) -> f64 {
        match self {
            Self::Increasing => q.clamp(1.0, Q_MAX),
            Self::Decreasing => q.clamp(1.0 / Q_MAX, 1.0),
        }
    }

    /// Ordering used to rank candidate values: the most extreme `q` in the
    /// scanned direction comes first.
    #[inline]
    pub fn rank(self, a: f64, b: f64) -> std::cmp::Ordering {
        match self {
            Self::Increasing => b.total_cmp(&a),
            Self::Decreasing => a.total_cmp(&b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn orientation_flips_with_favorable_label() {
        assert_eq!(
            ScanDirection::Privileged.orientation(true),
            Orientation::Increasing
        );
        assert_eq!(
            ScanDirection::Unprivileged.orientation(true),
            Orientation::Decreasing
        );
        assert_eq!(
            ScanDirection::Privileged.orientation(false),
            Orientation::Decreasing
        );
        assert_eq!(
            ScanDirection::Unprivileged.orientation(false),
            Orientation::Increasing
        );
    }

    #[test]
    fn clamp_pins_wrong_side_to_one() {
        assert_eq!(Orientation::Increasing.clamp(0.4), 1.0);
        assert_eq!(Orientation::Increasing.clamp(3.0), 3.0);
        assert_eq!(Orientation::Decreasing.clamp(3.0), 1.0);
        assert_eq!(Orientation::Decreasing.clamp(0.4), 0.4);
    }

    #[test]
    fn decreasing_half_domain_stays_positive() {
        assert_eq!(Orientation::Decreasing.clamp(-2.0), 1.0 / Q_MAX);
        assert_eq!(Orientation::Decreasing.clamp(0.0), 1.0 / Q_MAX);
        assert_eq!(Orientation::Increasing.clamp(1e9), Q_MAX);
        assert_eq!(Orientation::Increasing.clamp(-2.0), 1.0);
    }

    #[test]
    fn rank_puts_extreme_values_first() {
        assert_eq!(Orientation::Increasing.rank(5.0, 2.0), Ordering::Less);
        assert_eq!(Orientation::Decreasing.rank(5.0, 2.0), Ordering::Greater);
    }
}
