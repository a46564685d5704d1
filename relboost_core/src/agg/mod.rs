//! Aggregation state engine (spec §4.4).
//!
//! AVG carries the source's full committed/candidate NULL-weight
//! bookkeeping (`avg.rs`, grounded in `Avg.cpp`) because averaging across a
//! tree requires reconstructing what a partial average means once a sibling
//! branch's weight is undefined. Every other aggregation kind computes its
//! result directly from the raw values reaching a node — no cross-node
//! running state is needed, so `GenericEngine` only scopes a scratch buffer
//! to the current node's split search.

mod avg;
mod count;
mod ewma;
mod firstlast;
mod minmax;
mod quantile;
mod sum;
mod trend;

pub use avg::AvgEngine;

use std::collections::HashSet;

use relboost_common::AggKind;

use crate::matches::Match;

/// `(timestamp, value)`. Non-first/last aggregations ignore the timestamp
/// (it is passed as `f64::NAN`).
pub type Item = (f64, f64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    One,
    Two,
}

/// Sum-typed dispatch over the aggregation catalog (design notes §9:
/// "Re-architect as sum types ... plus a small vtable-style capability
/// set").
pub enum AggEngine {
    Avg(AvgEngine),
    Generic(GenericEngine),
}

impl AggEngine {
    pub fn new(kind: AggKind, num_outputs: usize) -> Self {
        match kind {
            AggKind::Avg => Self::Avg(AvgEngine::new(num_outputs)),
            other => Self::Generic(GenericEngine::new(other, num_outputs)),
        }
    }

    pub fn init_count_committed(&mut self, matches: &[Match]) {
        if let Self::Avg(engine) = self {
            engine.init_count_committed(matches);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn calc_all(
        &mut self,
        revert: bool,
        old_weight: f64,
        matches: &[Match],
        values: &[f64],
        timestamps: Option<&[f64]>,
        begin: usize,
        split_begin: usize,
        split_end: usize,
        end: usize,
    ) {
        match self {
            Self::Avg(engine) => engine.calc_all(revert, old_weight, matches, begin, split_begin, split_end, end),
            Self::Generic(engine) => engine.calc_all(revert, matches, values, timestamps, begin, split_begin, split_end, end),
        }
    }

    pub fn calc_diff(
        &mut self,
        old_weight: f64,
        matches: &[Match],
        values: &[f64],
        timestamps: Option<&[f64]>,
        split_begin: usize,
        split_end: usize,
    ) {
        match self {
            Self::Avg(engine) => engine.calc_diff(old_weight, matches, split_begin, split_end),
            Self::Generic(engine) => engine.calc_diff(matches, values, timestamps, split_begin, split_end),
        }
    }

    pub fn revert(&mut self, old_weight: f64) {
        match self {
            Self::Avg(engine) => engine.revert(old_weight),
            Self::Generic(engine) => engine.revert(),
        }
    }

    /// Folds the chosen split into durable state and clears the
    /// per-candidate deltas (spec invariant: `count1 ≡ 0 ∧ count2 ≡ 0`
    /// after commit).
    #[allow(clippy::too_many_arguments)]
    pub fn commit(
        &mut self,
        old_weight: f64,
        matches: &[Match],
        begin: usize,
        split: usize,
        end: usize,
        weight1: Option<f64>,
        weight2: Option<f64>,
    ) {
        match self {
            Self::Avg(engine) => engine.commit(old_weight, matches, begin, split, end, weight1, weight2),
            Self::Generic(engine) => engine.commit(),
        }
    }

    /// The candidate feature value this side of the split would contribute
    /// for `ix_output`, used directly by the split proposer's gain formula
    /// (0.0 when the output row has no active matches on this side).
    pub fn feature_value(&self, ix_output: usize, side: Side) -> f64 {
        match self {
            Self::Avg(engine) => engine.eta(ix_output, side),
            Self::Generic(engine) => engine.feature_value(ix_output, side),
        }
    }

    /// Discards the current candidate's deltas without committing them,
    /// resetting the engine for the next candidate (split proposer only;
    /// see `AvgEngine::discard`).
    pub fn discard(&mut self) {
        match self {
            Self::Avg(engine) => engine.discard(),
            Self::Generic(engine) => engine.commit(),
        }
    }

    pub fn touched_indices(&self) -> Vec<usize> {
        match self {
            Self::Avg(engine) => engine.indices.iter().copied().collect(),
            Self::Generic(engine) => engine.indices.iter().copied().collect(),
        }
    }
}

/// The non-AVG aggregation engine: two scratch buffers of raw `Item`s per
/// output row, rebuilt fresh by `calc_all` for each node's split search.
pub struct GenericEngine {
    kind: AggKind,
    // Each bucket entry additionally carries the match's `ix_input` so that
    // `calc_diff`/`revert` can locate an entry precisely instead of
    // searching by value equality, which breaks once the timestamp
    // component is `NaN` (the case for every non-first/last aggregation).
    side1: Vec<Vec<(u32, Item)>>,
    side2: Vec<Vec<(u32, Item)>>,
    indices: HashSet<usize>,
    indices_current: HashSet<usize>,
    move_log: Vec<(usize, u32, Item)>,
}

impl GenericEngine {
    pub fn new(kind: AggKind, num_outputs: usize) -> Self {
        Self {
            kind,
            side1: vec![Vec::new(); num_outputs],
            side2: vec![Vec::new(); num_outputs],
            indices: HashSet::new(),
            indices_current: HashSet::new(),
            move_log: Vec::new(),
        }
    }

    fn entry_of(values: &[f64], timestamps: Option<&[f64]>, m: &Match) -> (u32, Item) {
        let ix = m.ix_input as usize;
        let ts = timestamps.map(|t| t[ix]).unwrap_or(f64::NAN);
        (m.ix_input, (ts, values[ix]))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn calc_all(
        &mut self,
        revert: bool,
        matches: &[Match],
        values: &[f64],
        timestamps: Option<&[f64]>,
        begin: usize,
        split_begin: usize,
        split_end: usize,
        end: usize,
    ) {
        debug_assert!(self.indices.is_empty());
        for m in &matches[begin..split_begin] {
            let ix = m.ix_output as usize;
            self.side2[ix].push(Self::entry_of(values, timestamps, m));
            self.indices.insert(ix);
        }
        for m in &matches[split_begin..split_end] {
            let ix = m.ix_output as usize;
            self.side1[ix].push(Self::entry_of(values, timestamps, m));
            self.indices.insert(ix);
        }
        for m in &matches[split_end..end] {
            let ix = m.ix_output as usize;
            self.side2[ix].push(Self::entry_of(values, timestamps, m));
            self.indices.insert(ix);
        }
        if revert {
            self.indices_current.clear();
            for m in &matches[split_begin..split_end] {
                self.indices_current.insert(m.ix_output as usize);
            }
        }
    }

    pub fn calc_diff(
        &mut self,
        matches: &[Match],
        values: &[f64],
        timestamps: Option<&[f64]>,
        split_begin: usize,
        split_end: usize,
    ) {
        self.indices_current.clear();
        self.move_log.clear();
        for m in &matches[split_begin..split_end] {
            let ix = m.ix_output as usize;
            let (ix_input, item) = Self::entry_of(values, timestamps, m);
            if let Some(pos) = self.side2[ix].iter().position(|&(candidate, _)| candidate == ix_input) {
                self.side2[ix].swap_remove(pos);
            }
            self.side1[ix].push((ix_input, item));
            self.move_log.push((ix, ix_input, item));
            self.indices_current.insert(ix);
            self.indices.insert(ix);
        }
    }

    pub fn revert(&mut self) {
        for (ix, ix_input, item) in self.move_log.drain(..) {
            if let Some(pos) = self.side1[ix].iter().position(|&(candidate, _)| candidate == ix_input) {
                self.side1[ix].swap_remove(pos);
            }
            self.side2[ix].push((ix_input, item));
        }
        self.indices_current.clear();
    }

    pub fn commit(&mut self) {
        for &ix in &self.indices {
            self.side1[ix].clear();
            self.side2[ix].clear();
        }
        self.indices.clear();
        self.indices_current.clear();
        self.move_log.clear();
    }

    pub fn feature_value(&self, ix_output: usize, side: Side) -> f64 {
        let bucket = match side {
            Side::One => &self.side1[ix_output],
            Side::Two => &self.side2[ix_output],
        };
        let items: Vec<Item> = bucket.iter().map(|&(_, item)| item).collect();
        finalize(self.kind, &items)
    }
}

/// Computes the scalar aggregate of `items` for `kind` (spec §4.4
/// "Numerical semantics").
pub fn finalize(kind: AggKind, items: &[Item]) -> f64 {
    use AggKind::*;
    match kind {
        Count => count::count(items),
        CountDistinct => count::count_distinct(items),
        CountMinusCountDistinct => count::count_minus_count_distinct(items),
        Sum => sum::sum(items),
        // `Avg` is normally served by `AvgEngine`; this branch only runs if
        // a caller asks `finalize` to evaluate it directly (e.g. tests).
        Avg => {
            if items.is_empty() {
                0.0
            } else {
                sum::sum(items) / items.len() as f64
            }
        }
        AvgTimeBetween => trend::avg_time_between(items),
        Min => minmax::min(items),
        Max => minmax::max(items),
        Median => quantile::quantile(items, 0.5),
        Mode => quantile::mode(items),
        NumMax => quantile::num_max(items),
        NumMin => quantile::num_min(items),
        Quantile(p) => quantile::quantile(items, (p as f64) / 100.0),
        Stddev => sum::stddev(items),
        Var => sum::variance(items),
        VariationCoefficient => sum::variation_coefficient(items),
        Skew => sum::skew(items),
        Kurtosis => sum::kurtosis(items),
        First => firstlast::first(items),
        Last => firstlast::last(items),
        Ewma(horizon) => ewma::ewma(items, horizon),
        EwmaTrend(horizon) => ewma::ewma_trend(items, horizon),
        TimeSinceFirstMinimum => firstlast::time_since_first_minimum(items),
        TimeSinceFirstMaximum => firstlast::time_since_first_maximum(items),
        TimeSinceLastMinimum => firstlast::time_since_last_minimum(items),
        TimeSinceLastMaximum => firstlast::time_since_last_maximum(items),
        Trend => trend::trend(items),
    }
}

/// Property-based generalization of S4 (spec §8 "Testable properties",
/// "revert identity"): `calc_diff` then `revert` must restore both sides'
/// feature values, for any committed match set and any candidate sub-range
/// moved speculatively into side1.
#[cfg(test)]
mod proptests {
    use proptest::prelude::*;
    use relboost_common::AggKind;

    use super::{AggEngine, Side};
    use crate::matches::Match;

    fn matches_for(n: usize) -> Vec<Match> {
        (0..n as u32)
            .map(|i| Match { ix_output: 0, ix_input: i, sample_weight: 1.0, active: false })
            .collect()
    }

    fn kind_from_index(index: u8) -> AggKind {
        match index {
            0 => AggKind::Sum,
            1 => AggKind::Count,
            2 => AggKind::Min,
            _ => AggKind::Max,
        }
    }

    proptest! {
        #[test]
        fn revert_restores_committed_feature_values(
            values in proptest::collection::vec(-100.0f64..100.0, 1..16),
            split_begin_frac in 0.0f64..1.0,
            split_len_frac in 0.0f64..1.0,
            kind_index in 0u8..4,
        ) {
            let n = values.len();
            let matches = matches_for(n);
            let kind = kind_from_index(kind_index);

            let mut engine = AggEngine::new(kind, 1);
            engine.init_count_committed(&matches);
            // Everything committed to side2, nothing in side1.
            engine.calc_all(false, 0.0, &matches, &values, None, 0, 0, 0, n);
            let baseline1 = engine.feature_value(0, Side::One);
            let baseline2 = engine.feature_value(0, Side::Two);

            let split_begin = ((n as f64) * split_begin_frac) as usize;
            let split_begin = split_begin.min(n);
            let remaining = n - split_begin;
            let split_len = ((remaining as f64) * split_len_frac) as usize;
            let split_end = (split_begin + split_len).min(n);

            engine.calc_diff(0.0, &matches, &values, None, split_begin, split_end);
            engine.revert(0.0);

            prop_assert_eq!(engine.feature_value(0, Side::One), baseline1);
            prop_assert_eq!(engine.feature_value(0, Side::Two), baseline2);
        }
    }
}
