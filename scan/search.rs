//! # Subset search
//!
//! Coordinate ascent over features. With every other feature's constraint
//! held fixed, the best value set for one feature is found in linear time:
//! the feature's values are ranked by their individual odds multiplier and
//! only prefixes of that ranking are scored. The outer loop visits features
//! round-robin until a full pass leaves the subgroup unchanged.

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::direction::Orientation;
use crate::scoring::{GroupStats, ScoringFunction};
use crate::table::FeatureTable;

/// Per-feature category masks; `None` leaves the feature unconstrained.
pub(crate) type Selection = Vec<Option<Vec<bool>>>;

/// Everything a restart needs, borrowed from the validated scan inputs.
pub(crate) struct SearchContext<'a> {
    pub table: &'a FeatureTable,
    pub outcomes: &'a [f64],
    pub expectations: &'a [f64],
    pub scoring: ScoringFunction,
    pub orientation: Orientation,
    pub penalty: f64,
    pub max_passes: usize,
    pub tolerance: f64,
}

/// Immutable record returned by one restart.
#[derive(Debug, Clone)]
pub(crate) struct RestartOutcome {
    pub restart: usize,
    pub selection: Selection,
    pub score: f64,
    pub passes: usize,
    pub converged: bool,
}

fn mask_len(mask: &Option<Vec<bool>>) -> usize {
    mask.as_ref()
        .map_or(0, |m| m.iter().filter(|&&included| included).count())
}

impl SearchContext<'_> {
    #[inline]
    fn row_matches(&self, selection: &Selection, row: usize, skip: Option<usize>) -> bool {
        self.table
            .columns()
            .iter()
            .zip(selection)
            .enumerate()
            .all(|(feature, (column, mask))| match mask {
                Some(mask) if Some(feature) != skip => mask[column.codes()[row] as usize],
                _ => true,
            })
    }

    /// Aggregates the rows matching `selection`, optionally ignoring one
    /// feature's constraint.
    pub(crate) fn collect(&self, selection: &Selection, skip: Option<usize>) -> GroupStats {
        (0..self.table.num_rows())
            .filter(|&row| self.row_matches(selection, row, skip))
            .map(|row| (self.outcomes[row], self.expectations[row]))
            .collect()
    }

    /// Penalized score of a full selection. A selection without any
    /// constraint is the whole dataset and scores zero.
    pub(crate) fn score_selection(&self, selection: &Selection, named_values: usize) -> f64 {
        if selection.iter().all(Option::is_none) {
            return 0.0;
        }
        let stats = self.collect(selection, None);
        self.scoring.score(&stats, self.orientation) - self.penalty * named_values as f64
    }

    /// Best value set for `feature` with every other constraint held fixed.
    ///
    /// Returns the chosen mask (`None` for unconstrained) and the penalized
    /// score of the whole selection with that mask in place.
    pub(crate) fn optimize_feature(
        &self,
        selection: &Selection,
        feature: usize,
    ) -> (Option<Vec<bool>>, f64) {
        let column = &self.table.columns()[feature];
        let others_constrained = selection
            .iter()
            .enumerate()
            .any(|(idx, mask)| idx != feature && mask.is_some());
        let others_values: usize = selection
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != feature)
            .map(|(_, mask)| mask_len(mask))
            .sum();

        let mut buckets: Vec<GroupStats> = vec![GroupStats::new(); column.num_categories()];
        let codes = column.codes();
        for row in 0..self.table.num_rows() {
            if self.row_matches(selection, row, Some(feature)) {
                buckets[codes[row] as usize].push(self.outcomes[row], self.expectations[row]);
            }
        }

        let others_penalty = self.penalty * others_values as f64;
        let mut best_mask: Option<Vec<bool>> = None;
        let mut best_score = if others_constrained {
            let mut all = GroupStats::new();
            for bucket in &buckets {
                all.merge(bucket);
            }
            self.scoring.score(&all, self.orientation) - others_penalty
        } else {
            0.0
        };

        let mut ranked: Vec<(usize, f64)> = buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(code, bucket)| (code, self.scoring.q_mle(bucket)))
            .collect();
        ranked.sort_by(|a, b| self.orientation.rank(a.1, b.1).then(a.0.cmp(&b.0)));

        // Taking every present value reproduces the unconstrained rows.
        let prefix_limit = ranked.len().saturating_sub(1);
        let mut accumulated = GroupStats::new();
        let mut best_prefix = 0usize;
        for (taken, &(code, _)) in ranked.iter().take(prefix_limit).enumerate() {
            accumulated.merge(&buckets[code]);
            let size = taken + 1;
            let candidate = self.scoring.score(&accumulated, self.orientation)
                - others_penalty
                - self.penalty * size as f64;
            if candidate > best_score {
                best_score = candidate;
                best_prefix = size;
            }
        }

        if best_prefix > 0 {
            let mut mask = vec![false; column.num_categories()];
            for &(code, _) in &ranked[..best_prefix] {
                mask[code] = true;
            }
            best_mask = Some(mask);
        }
        (best_mask, best_score)
    }

    /// Round-robin coordinate ascent from `start`.
    pub(crate) fn coordinate_ascent(
        &self,
        restart: usize,
        start: Selection,
        rng: &mut StdRng,
    ) -> RestartOutcome {
        let mut selection = start;
        let mut named_values: usize = selection.iter().map(mask_len).sum();
        let mut score = self.score_selection(&selection, named_values);

        let mut order: Vec<usize> = (0..self.table.num_features()).collect();
        order.shuffle(rng);

        let mut passes = 0usize;
        let mut converged = false;
        while passes < self.max_passes {
            passes += 1;
            let mut changed = false;
            for &feature in &order {
                let (candidate, candidate_score) = self.optimize_feature(&selection, feature);
                if candidate != selection[feature] && candidate_score > score + self.tolerance {
                    log::trace!(
                        "restart {restart}: feature '{}' improves score {score:.6} -> {candidate_score:.6}",
                        self.table.columns()[feature].name()
                    );
                    named_values = named_values - mask_len(&selection[feature]) + mask_len(&candidate);
                    selection[feature] = candidate;
                    score = candidate_score;
                    changed = true;
                }
            }
            if !changed {
                converged = true;
                break;
            }
        }

        if !converged {
            log::warn!(
                "Restart {restart} stopped after {passes} passes without converging; keeping score {score:.6}"
            );
        }

        RestartOutcome {
            restart,
            selection,
            score,
            passes,
            converged,
        }
    }
}

/// Random starting point: each feature draws an inclusion probability and
/// keeps every category with that probability. Features whose draw keeps no
/// category or every category stay unconstrained.
pub(crate) fn random_selection(table: &FeatureTable, rng: &mut StdRng) -> Selection {
    table
        .columns()
        .iter()
        .map(|column| {
            let inclusion: f64 = rng.gen_range(0.0..1.0);
            let mask: Vec<bool> = (0..column.num_categories())
                .map(|_| rng.gen_bool(inclusion))
                .collect();
            let kept = mask.iter().filter(|&&included| included).count();
            (kept > 0 && kept < mask.len()).then_some(mask)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    struct Fixture {
        table: FeatureTable,
        outcomes: Vec<f64>,
        expectations: Vec<f64>,
    }

    impl Fixture {
        /// `group` takes values g0..g3; rows in g0 are always positive, the
        /// rest alternate, and the model predicts 0.5 everywhere.
        fn new() -> Self {
            let mut group = Vec::new();
            let mut other = Vec::new();
            let mut outcomes = Vec::new();
            for row in 0..80 {
                let g = row % 4;
                group.push(format!("g{g}"));
                other.push(format!("o{}", (row / 4) % 2));
                outcomes.push(if g == 0 { 1.0 } else { (row / 4 % 2) as f64 });
            }
            let table =
                FeatureTable::from_columns([("group", group), ("other", other)]).unwrap();
            Self {
                table,
                expectations: vec![0.5; outcomes.len()],
                outcomes,
            }
        }

        fn context(&self, orientation: Orientation, penalty: f64) -> SearchContext<'_> {
            SearchContext {
                table: &self.table,
                outcomes: &self.outcomes,
                expectations: &self.expectations,
                scoring: ScoringFunction::Bernoulli,
                orientation,
                penalty,
                max_passes: 20,
                tolerance: 1e-9,
            }
        }
    }

    #[test]
    fn unconstrained_selection_scores_zero() {
        let fixture = Fixture::new();
        let ctx = fixture.context(Orientation::Increasing, 0.0);
        assert_eq!(ctx.score_selection(&vec![None, None], 0), 0.0);
    }

    #[test]
    fn optimize_feature_picks_the_over_performing_value() {
        let fixture = Fixture::new();
        let ctx = fixture.context(Orientation::Increasing, 0.0);
        let (mask, score) = ctx.optimize_feature(&vec![None, None], 0);
        assert_eq!(mask, Some(vec![true, false, false, false]));
        assert!(score > 0.0);

        let direct = ctx.score_selection(&vec![mask, None], 1);
        assert!((direct - score).abs() < 1e-12);
    }

    #[test]
    fn optimize_feature_score_matches_full_rescoring_under_penalty() {
        let fixture = Fixture::new();
        let ctx = fixture.context(Orientation::Increasing, 0.5);
        let start: Selection = vec![None, Some(vec![false, true])];
        let (mask, score) = ctx.optimize_feature(&start, 0);
        let mut chosen = start.clone();
        chosen[0] = mask;
        let named: usize = chosen.iter().map(mask_len).sum();
        assert!((ctx.score_selection(&chosen, named) - score).abs() < 1e-12);
    }

    #[test]
    fn prefix_scores_never_drop_while_adding_more_favourable_values() {
        // The greedy step only ever extends the ranked prefix with the next
        // most favourable value; with zero penalty and uniform predictions
        // adding an all-positive value never lowers the score.
        let fixture = Fixture::new();
        let ctx = fixture.context(Orientation::Increasing, 0.0);
        let g0 = ctx.score_selection(&vec![Some(vec![true, false, false, false]), None], 1);
        let g0_o1 = ctx.score_selection(
            &vec![Some(vec![true, false, false, false]), Some(vec![false, true])],
            2,
        );
        let g0_g1_o1 = ctx.score_selection(
            &vec![Some(vec![true, true, false, false]), Some(vec![false, true])],
            3,
        );
        assert!(g0 > 0.0);
        assert!(g0_g1_o1 >= g0_o1);
    }

    #[test]
    fn coordinate_ascent_converges_and_is_deterministic() {
        let fixture = Fixture::new();
        let ctx = fixture.context(Orientation::Increasing, 0.0);
        let mut rng_a = StdRng::seed_from_u64(11);
        let mut rng_b = StdRng::seed_from_u64(11);
        let a = ctx.coordinate_ascent(0, vec![None, None], &mut rng_a);
        let b = ctx.coordinate_ascent(0, vec![None, None], &mut rng_b);
        assert!(a.converged);
        assert!(a.score > 0.0);
        assert_eq!(a.selection, b.selection);
        assert_eq!(a.score, b.score);
        assert!(a.passes <= 20);
    }

    #[test]
    fn coordinate_ascent_never_lowers_the_starting_score() {
        let fixture = Fixture::new();
        let ctx = fixture.context(Orientation::Decreasing, 0.1);
        let mut rng = StdRng::seed_from_u64(3);
        for restart in 0..10 {
            let start = random_selection(&fixture.table, &mut rng);
            let named: usize = start.iter().map(mask_len).sum();
            let initial = ctx.score_selection(&start, named);
            let outcome = ctx.coordinate_ascent(restart, start, &mut rng);
            assert!(outcome.score + 1e-12 >= initial);
        }
    }

    #[test]
    fn random_selection_only_produces_proper_subsets() {
        let fixture = Fixture::new();
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..50 {
            let selection = random_selection(&fixture.table, &mut rng);
            for (mask, column) in selection.iter().zip(fixture.table.columns()) {
                if let Some(mask) = mask {
                    let kept = mask.iter().filter(|&&b| b).count();
                    assert!(kept > 0 && kept < column.num_categories());
                }
            }
        }
    }

    #[test]
    fn max_passes_bounds_the_loop() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context(Orientation::Increasing, 0.0);
        ctx.max_passes = 1;
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = ctx.coordinate_ascent(0, vec![None, None], &mut rng);
        assert_eq!(outcome.passes, 1);
        assert!(!outcome.converged);
    }
}
