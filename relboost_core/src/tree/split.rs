//! Candidate splits and the gain formula that scores them (spec §4.5).

use relboost_common::{Column, ColumnData};
use serde::{Deserialize, Serialize};

use crate::agg::{AggEngine, Side};
use crate::criterion::OptimizationCriterion;
use crate::matches::Match;

use super::grid;

/// A fixed, internal leaf-weight clamp. Not exposed as a hyperparameter —
/// spec §6 enumerates the full configuration surface and `max_step` is not
/// in it, so it is a constant here rather than user-tunable (see
/// DESIGN.md).
pub const MAX_STEP: f64 = 5.0;

/// Which column family a candidate split reads from. Same-unit pairs and
/// time-stamp windows (spec §4.5) test `population_value - peripheral_value
/// < critical` rather than a plain column value, so they carry their own
/// variants even though they share `SplitCandidate::critical_value`/
/// `population_column` with the numerical path. `Text` tests word
/// containment in a `StringBag` column (spec §4.5 "text-column splits").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DataUsed {
    Numerical,
    Discrete,
    Categorical,
    SameUnitNumerical,
    TimeStampWindow,
    Text,
}

/// A fully-evaluated candidate: which column, which cut, and what it would
/// buy in loss reduction.
#[derive(Clone, Debug)]
pub struct SplitCandidate {
    pub column_used: usize,
    pub column_name: String,
    pub data_used: DataUsed,
    pub critical_value: f64,
    pub categories_in: Vec<i32>,
    /// The population-side column paired with `column_name`, for
    /// `SameUnitNumerical`/`TimeStampWindow` candidates only.
    pub population_column: Option<String>,
    /// The word tested for containment, for `Text` candidates only.
    pub text_word: Option<String>,
    pub loss_reduction: f64,
    pub weight1: f64,
    pub weight2: f64,
}

/// Whether a match belongs to side 1 ("in") of a candidate.
/// Numerical candidates test `value < critical`; same-unit/time-stamp
/// candidates test `population_value - peripheral_value < critical`;
/// categorical candidates test set membership; text candidates test word
/// containment.
pub enum Membership<'a> {
    LessThan { values: &'a [f64], critical: f64 },
    InSet { categories: &'a [i32], set: &'a [i32] },
    DifferenceLessThan { population: &'a [f64], peripheral: &'a [f64], critical: f64 },
    Contains { flags: &'a [bool] },
}

impl Membership<'_> {
    fn is_in(&self, m: &crate::matches::Match) -> bool {
        let ix_input = m.ix_input as usize;
        match self {
            Membership::LessThan { values, critical } => {
                let v = values[ix_input];
                v.is_finite() && v < *critical
            }
            Membership::InSet { categories, set } => {
                categories[ix_input] >= 0 && set.contains(&categories[ix_input])
            }
            Membership::DifferenceLessThan { population, peripheral, critical } => {
                let d = population[m.ix_output as usize] - peripheral[ix_input];
                d.is_finite() && d < *critical
            }
            Membership::Contains { flags } => flags[ix_input],
        }
    }
}

/// Physically reorders `matches` into `[not-in..., in...]` so the three
/// `calc_all` ranges degenerate to a simple two-way split: `[0,
/// split_begin)` is side2 (not in), `[split_begin, end)` is side1 (in), and
/// the trailing side2 range is empty.
fn partition(matches: &[Match], membership: &Membership) -> (Vec<Match>, usize) {
    let mut side1 = Vec::new();
    let mut side2 = Vec::new();
    for &m in matches {
        if membership.is_in(&m) {
            side1.push(m);
        } else {
            side2.push(m);
        }
    }
    let split_begin = side2.len();
    side2.extend_from_slice(&side1);
    (side2, split_begin)
}

/// Evaluates one candidate membership test against `matches`, scoring it
/// with the generalized line-search gain used uniformly for every
/// aggregation kind (design notes §9: sum-type dispatch over a small
/// capability set).
///
/// The split proposer treats each side's `AggEngine::feature_value` as a
/// candidate "new_feature" column and scores it exactly like
/// `OptimizationCriterion::update_yhat_old`'s line search:
/// `gain = (Σ sw·g·f)² / (Σ sw·h·f² + λ)`, summed across both sides. This
/// is a from-scratch `calc_all` per candidate rather than the source's
/// incremental `calc_diff` sweep across a sorted grid — both are valid
/// under the spec's invariant that `calc_all` and `calc_diff` sequences
/// must agree, so this trades the source's micro-optimization for a
/// simpler, still-correct evaluation loop (see DESIGN.md). The candidate
/// is discarded (not committed) once scored; the caller re-applies the
/// winning candidate via [`commit`].
#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    agg: &mut AggEngine,
    criterion: &OptimizationCriterion,
    sample_weights: &[f32],
    matches: &[Match],
    membership: &Membership,
    values: &[f64],
    timestamps: Option<&[f64]>,
    reg_lambda: f64,
) -> (f64, f64, f64) {
    let (temp, split_begin) = partition(matches, membership);
    let end = temp.len();

    agg.calc_all(false, f64::NAN, &temp, values, timestamps, 0, split_begin, end, end);

    let mut g1 = 0.0;
    let mut h1 = 0.0;
    let mut g2 = 0.0;
    let mut h2 = 0.0;
    for ix_output in agg.touched_indices() {
        let sw = sample_weights[ix_output] as f64;
        let g = criterion.g[ix_output];
        let h = criterion.h[ix_output];
        let f1 = agg.feature_value(ix_output, Side::One);
        let f2 = agg.feature_value(ix_output, Side::Two);
        g1 += sw * g * f1;
        h1 += sw * h * f1 * f1;
        g2 += sw * g * f2;
        h2 += sw * h * f2 * f2;
    }

    let weight1 = (-g1 / (h1 + reg_lambda)).clamp(-MAX_STEP, MAX_STEP);
    let weight2 = (-g2 / (h2 + reg_lambda)).clamp(-MAX_STEP, MAX_STEP);
    let gain1 = g1 * g1 / (h1 + reg_lambda);
    let gain2 = g2 * g2 / (h2 + reg_lambda);

    agg.discard();

    (gain1 + gain2, weight1, weight2)
}

/// Re-applies the winning candidate for real: folds `(weight1, weight2)`
/// into the engine's committed state (old_weight fixed at `0.0` — every
/// split in a freshly grown tree is the row's first weight assignment
/// along this path, so the NULL-weight subtraction term is inert; see
/// DESIGN.md) and accumulates each touched output row's contribution
/// directly into the tree's `weights` transform accumulator. This is the
/// uniform generalization of `Avg::transform`'s blending to every
/// aggregation kind: a population row's final feature value is the sum,
/// over every split it passed through, of `feature_value(side) * weight`.
/// Returns the two children's match sets.
#[allow(clippy::too_many_arguments)]
pub fn commit(
    agg: &mut AggEngine,
    matches: &[Match],
    membership: &Membership,
    values: &[f64],
    timestamps: Option<&[f64]>,
    weights_out: &mut [f64],
    weight1: f64,
    weight2: f64,
) -> (Vec<Match>, Vec<Match>) {
    let (temp, split_begin) = partition(matches, membership);
    let end = temp.len();

    agg.calc_all(false, f64::NAN, &temp, values, timestamps, 0, split_begin, end, end);
    for ix_output in agg.touched_indices() {
        let f1 = agg.feature_value(ix_output, Side::One);
        let f2 = agg.feature_value(ix_output, Side::Two);
        weights_out[ix_output] += f1 * weight1 + f2 * weight2;
    }
    agg.commit(0.0, &temp, 0, split_begin, end, Some(weight1), Some(weight2));

    let side2 = temp[..split_begin].to_vec();
    let side1 = temp[split_begin..end].to_vec();
    (side1, side2)
}

/// Builds every numerical/discrete candidate cut for `column` against the
/// `matches` currently reaching a node.
pub fn numerical_candidates(
    column: &Column,
    matches: &[Match],
    grid_factor: f64,
) -> Vec<f64> {
    let sample: Vec<f64> = matches
        .iter()
        .filter_map(|m| column.data.as_f64(m.ix_input as usize))
        .collect();
    grid::numerical_grid(&sample, grid_factor)
}

/// Builds every categorical candidate category for `column` against the
/// `matches` currently reaching a node, respecting `min_df`.
pub fn categorical_candidates(column: &Column, matches: &[Match], min_df: u32) -> Vec<i32> {
    let sample: Vec<i32> = matches
        .iter()
        .filter_map(|m| column.data.as_category(m.ix_input as usize))
        .collect();
    grid::categorical_candidates(&sample, min_df)
}

/// Builds every candidate cut for the same-unit/time-stamp-window
/// difference `population_column - peripheral_column`, evaluated only over
/// the matches currently reaching a node (spec §4.5 "same-unit pairs" and
/// "time-stamp windows").
pub fn difference_candidates(
    population_column: &Column,
    peripheral_column: &Column,
    matches: &[Match],
    grid_factor: f64,
) -> Vec<f64> {
    let sample: Vec<f64> = matches
        .iter()
        .filter_map(|m| {
            let p = population_column.data.as_f64(m.ix_output as usize)?;
            let q = peripheral_column.data.as_f64(m.ix_input as usize)?;
            let d = p - q;
            d.is_finite().then_some(d)
        })
        .collect();
    grid::numerical_grid(&sample, grid_factor)
}

/// Distinct words appearing in `column` across `matches`, respecting
/// `min_df` (spec §4.5 "text-column splits"), ordered for determinism.
pub fn text_candidates(column: &Column, matches: &[Match], min_df: u32) -> Vec<String> {
    let ColumnData::StringBag(texts) = &column.data else {
        return Vec::new();
    };
    let mut counts: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
    for m in matches {
        let Some(text) = texts.get(m.ix_input as usize) else {
            continue;
        };
        for word in crate::fastprop::tokenize(text) {
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    let mut words: Vec<String> = counts.into_iter().filter(|&(_, n)| n >= min_df).map(|(w, _)| w).collect();
    words.sort_unstable();
    words
}

/// Whether each peripheral row's text column contains `word` (spec §4.5
/// "text-column splits"), used both to evaluate a text candidate and to
/// replay a committed one — a pure function of the column's own content,
/// so it reproduces identically at fit and transform time.
pub fn text_contains_flags(column: &Column, word: &str) -> Vec<bool> {
    match &column.data {
        ColumnData::StringBag(texts) => texts.iter().map(|t| crate::fastprop::tokenize(t).any(|w| w == word)).collect(),
        _ => vec![false; column.len()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relboost_common::{ColumnData, ColumnRole};

    fn mk_matches(n: usize) -> Vec<Match> {
        (0..n as u32)
            .map(|i| Match {
                ix_output: 0,
                ix_input: i,
                sample_weight: 1.0,
                active: false,
            })
            .collect()
    }

    #[test]
    fn numerical_candidates_follow_the_grid() {
        let column = Column::new("x", ColumnRole::Numerical, ColumnData::Float64(vec![1.0, 2.0, 3.0, 4.0]));
        let matches = mk_matches(4);
        let cuts = numerical_candidates(&column, &matches, 2.0);
        assert!(!cuts.is_empty());
    }

    #[test]
    fn categorical_candidates_drops_rare_categories() {
        let column = Column::new("c", ColumnRole::Categorical, ColumnData::CategoryId(vec![0, 0, 1]));
        let matches = mk_matches(3);
        let candidates = categorical_candidates(&column, &matches, 2);
        assert_eq!(candidates, vec![0]);
    }
}
