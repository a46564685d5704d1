//! AVG aggregation state, ported from the source's `Avg.cpp`: the one
//! aggregation kind that needs cross-node bookkeeping, because the mean of
//! a subset of matches cannot be reconstructed from the subset alone once a
//! sibling branch's weight goes undefined (spec §4.4 "NULL-weight
//! handling").

use std::collections::HashSet;

use super::Side;
use crate::matches::Match;

pub struct AvgEngine {
    count_committed: Vec<f64>,
    count1: Vec<f64>,
    count2: Vec<f64>,
    eta1: Vec<f64>,
    eta2: Vec<f64>,
    eta_old: Vec<f64>,
    eta1_2_null: Vec<f64>,
    eta2_1_null: Vec<f64>,
    w_fixed_1: Vec<f64>,
    w_fixed_2: Vec<f64>,
    w_fixed_committed: Vec<f64>,
    pub(super) indices: HashSet<usize>,
    indices_current: HashSet<usize>,
}

impl AvgEngine {
    pub fn new(num_outputs: usize) -> Self {
        Self {
            count_committed: vec![0.0; num_outputs],
            count1: vec![0.0; num_outputs],
            count2: vec![0.0; num_outputs],
            eta1: vec![0.0; num_outputs],
            eta2: vec![0.0; num_outputs],
            eta_old: vec![0.0; num_outputs],
            eta1_2_null: vec![0.0; num_outputs],
            eta2_1_null: vec![0.0; num_outputs],
            w_fixed_1: vec![0.0; num_outputs],
            w_fixed_2: vec![0.0; num_outputs],
            w_fixed_committed: vec![0.0; num_outputs],
            indices: HashSet::new(),
            indices_current: HashSet::new(),
        }
    }

    /// Total matches ever assigned to each output row; fixed for the whole
    /// tree fit once initialized at the root.
    pub fn init_count_committed(&mut self, matches: &[Match]) {
        for m in matches {
            self.count_committed[m.ix_output as usize] += 1.0;
        }
    }

    pub fn eta(&self, ix_output: usize, side: Side) -> f64 {
        match side {
            Side::One => self.eta1[ix_output],
            Side::Two => self.eta2[ix_output],
        }
    }

    fn activate(&mut self, indices: &HashSet<usize>) {
        for &ix in indices {
            debug_assert!(self.count_committed[ix] >= 0.0);
            if self.count_committed[ix] + self.count1[ix] == 0.0 {
                self.eta1_2_null[ix] = 0.0;
                self.w_fixed_1[ix] = 0.0;
            } else {
                self.eta1_2_null[ix] = self.count1[ix] / (self.count_committed[ix] + self.count1[ix]);
                self.w_fixed_1[ix] = self.w_fixed_committed[ix] * self.count_committed[ix]
                    / (self.count_committed[ix] + self.count1[ix]);
            }
            if self.count_committed[ix] + self.count2[ix] == 0.0 {
                self.eta2_1_null[ix] = 0.0;
                self.w_fixed_2[ix] = 0.0;
            } else {
                self.eta2_1_null[ix] = self.count2[ix] / (self.count_committed[ix] + self.count2[ix]);
                self.w_fixed_2[ix] = self.w_fixed_committed[ix] * self.count_committed[ix]
                    / (self.count_committed[ix] + self.count2[ix]);
            }
        }
    }

    fn deactivate(&mut self, old_weight: f64, indices: &HashSet<usize>) {
        for &ix in indices {
            debug_assert!(self.count_committed[ix] >= self.count1[ix] + self.count2[ix]);
            if self.count_committed[ix] == self.count2[ix] {
                self.eta1_2_null[ix] = 0.0;
                self.w_fixed_1[ix] = 0.0;
            } else {
                self.eta1_2_null[ix] = self.count1[ix] / (self.count_committed[ix] - self.count2[ix]);
                self.w_fixed_1[ix] = (self.w_fixed_committed[ix] * self.count_committed[ix]
                    - old_weight * self.eta_old[ix])
                    / (self.count_committed[ix] - self.count2[ix]);
            }
            if self.count_committed[ix] == self.count1[ix] {
                self.eta2_1_null[ix] = 0.0;
                self.w_fixed_2[ix] = 0.0;
            } else {
                self.eta2_1_null[ix] = self.count2[ix] / (self.count_committed[ix] - self.count1[ix]);
                self.w_fixed_2[ix] = (self.w_fixed_committed[ix] * self.count_committed[ix]
                    - old_weight * self.eta_old[ix])
                    / (self.count_committed[ix] - self.count1[ix]);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn calc_all(
        &mut self,
        revert: bool,
        old_weight: f64,
        matches: &[Match],
        begin: usize,
        split_begin: usize,
        split_end: usize,
        end: usize,
    ) {
        debug_assert!(self.indices.is_empty());

        if !old_weight.is_nan() {
            for m in &matches[begin..split_begin] {
                let ix = m.ix_output as usize;
                self.eta2[ix] += 1.0 / self.count_committed[ix];
                self.count2[ix] += 1.0;
                self.indices.insert(ix);
            }
            for m in &matches[split_begin..split_end] {
                let ix = m.ix_output as usize;
                self.eta1[ix] += 1.0 / self.count_committed[ix];
                self.count1[ix] += 1.0;
                self.indices.insert(ix);
            }
            for m in &matches[split_end..end] {
                let ix = m.ix_output as usize;
                self.eta2[ix] += 1.0 / self.count_committed[ix];
                self.count2[ix] += 1.0;
                self.indices.insert(ix);
            }
            for &ix in &self.indices {
                self.eta_old[ix] = self.count1[ix] + self.count2[ix];
            }
        } else {
            for m in &matches[begin..split_begin] {
                let ix = m.ix_output as usize;
                self.count2[ix] += 1.0;
                self.indices.insert(ix);
            }
            for m in &matches[split_begin..split_end] {
                let ix = m.ix_output as usize;
                self.count1[ix] += 1.0;
                self.indices.insert(ix);
            }
            for m in &matches[split_end..end] {
                let ix = m.ix_output as usize;
                self.count2[ix] += 1.0;
                self.indices.insert(ix);
            }
            for &ix in &self.indices {
                self.eta_old[ix] = 0.0;
            }
        }

        if revert {
            self.indices_current.clear();
            for m in &matches[split_begin..split_end] {
                self.indices_current.insert(m.ix_output as usize);
            }
        }

        let touched = self.indices.clone();
        if old_weight.is_nan() {
            self.activate(&touched);
        } else {
            self.deactivate(old_weight, &touched);
        }
    }

    pub fn calc_diff(&mut self, old_weight: f64, matches: &[Match], split_begin: usize, split_end: usize) {
        self.indices_current.clear();

        if !old_weight.is_nan() {
            for m in &matches[split_begin..split_end] {
                let ix = m.ix_output as usize;
                self.eta1[ix] += 1.0 / self.count_committed[ix];
                self.eta2[ix] -= 1.0 / self.count_committed[ix];
                self.count1[ix] += 1.0;
                self.count2[ix] -= 1.0;
                debug_assert!(self.count2[ix] >= 0.0);
                self.indices_current.insert(ix);
            }
        } else {
            for m in &matches[split_begin..split_end] {
                let ix = m.ix_output as usize;
                self.count1[ix] += 1.0;
                self.count2[ix] -= 1.0;
                debug_assert!(self.count2[ix] >= 0.0);
                self.indices_current.insert(ix);
            }
        }
        self.indices.extend(self.indices_current.iter().copied());

        let touched = self.indices_current.clone();
        if old_weight.is_nan() {
            self.activate(&touched);
        } else {
            self.deactivate(old_weight, &touched);
        }
    }

    pub fn revert(&mut self, old_weight: f64) {
        if !old_weight.is_nan() {
            for &ix in &self.indices_current {
                self.eta2[ix] += self.eta1[ix];
                self.eta1[ix] = 0.0;
            }
        }
        for &ix in &self.indices_current {
            self.count2[ix] += self.count1[ix];
            self.count1[ix] = 0.0;
        }

        let touched = self.indices_current.clone();
        if old_weight.is_nan() {
            self.activate(&touched);
        } else {
            self.deactivate(old_weight, &touched);
        }
        self.indices_current.clear();
    }

    /// Folds the chosen `(weight1, weight2)` into `w_fixed_committed` and
    /// zeroes the candidate deltas. Exactly one of `weight1`/`weight2` may
    /// be `None` (the "other side undefined" NULL cases); both present is
    /// the ordinary two-child split.
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
        self.calc_all(false, old_weight, matches, begin, begin, split, end);

        match (weight1, weight2) {
            (Some(w1), None) => {
                if old_weight.is_nan() {
                    for &ix in &self.indices {
                        self.count_committed[ix] += self.count1[ix];
                    }
                } else {
                    for &ix in &self.indices {
                        self.count_committed[ix] -= self.count2[ix];
                    }
                }
                for &ix in &self.indices {
                    self.w_fixed_committed[ix] = self.eta1_2_null[ix] * w1 + self.w_fixed_1[ix];
                }
            }
            (None, Some(w2)) => {
                if old_weight.is_nan() {
                    for &ix in &self.indices {
                        self.count_committed[ix] += self.count2[ix];
                    }
                } else {
                    for &ix in &self.indices {
                        self.count_committed[ix] -= self.count1[ix];
                    }
                }
                for &ix in &self.indices {
                    self.w_fixed_committed[ix] = self.eta2_1_null[ix] * w2 + self.w_fixed_2[ix];
                }
            }
            (Some(w1), Some(w2)) => {
                debug_assert!(!old_weight.is_nan());
                for &ix in &self.indices {
                    self.w_fixed_committed[ix] +=
                        self.eta1[ix] * w1 + self.eta2[ix] * w2 - (self.eta1[ix] + self.eta2[ix]) * old_weight;
                }
            }
            (None, None) => {}
        }

        for &ix in &self.indices {
            self.count1[ix] = 0.0;
            self.count2[ix] = 0.0;
        }
        self.indices.clear();
    }

    /// Discards the current candidate's deltas without folding them into
    /// `w_fixed_committed` (used by the split proposer to try a candidate
    /// and back out of it without re-allocating a fresh engine per
    /// candidate; the source evaluates each candidate against its own
    /// engine instance, this port reuses one mutable engine per tree and
    /// relies on `discard` to reset it between candidates).
    pub fn discard(&mut self) {
        for &ix in &self.indices {
            self.eta1[ix] = 0.0;
            self.eta2[ix] = 0.0;
            self.count1[ix] = 0.0;
            self.count2[ix] = 0.0;
        }
        self.indices.clear();
        self.indices_current.clear();
    }

    /// The committed running average contributed to `ix_output`, combining
    /// every leaf whose split path included it (spec's `Avg::transform`:
    /// the mean of the non-NaN per-leaf weights).
    pub fn committed_weight(&self, ix_output: usize) -> f64 {
        self.w_fixed_committed[ix_output]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(ix_output: u32) -> Match {
        Match {
            ix_output,
            ix_input: 0,
            sample_weight: 1.0,
            active: false,
        }
    }

    #[test]
    fn commit_zeroes_candidate_deltas() {
        let mut engine = AvgEngine::new(2);
        let matches = vec![m(0), m(0), m(1)];
        engine.init_count_committed(&matches);
        engine.commit(f64::NAN, &matches, 0, 2, 3, Some(1.0), Some(2.0));
        assert_eq!(engine.count1, vec![0.0, 0.0]);
        assert_eq!(engine.count2, vec![0.0, 0.0]);
        assert!(engine.indices.is_empty());
    }

    #[test]
    fn calc_diff_then_revert_restores_state() {
        let mut engine = AvgEngine::new(1);
        let matches = vec![m(0), m(0), m(0), m(0)];
        engine.init_count_committed(&matches);
        engine.calc_all(true, f64::NAN, &matches, 0, 0, 2, 4);

        let before_eta1 = engine.eta1.clone();
        let before_eta2 = engine.eta2.clone();
        let before_count1 = engine.count1.clone();
        let before_count2 = engine.count2.clone();

        engine.calc_diff(f64::NAN, &matches, 2, 3);
        engine.revert(f64::NAN);

        assert_eq!(engine.eta1, before_eta1);
        assert_eq!(engine.eta2, before_eta2);
        assert_eq!(engine.count1, before_count1);
        assert_eq!(engine.count2, before_count2);
    }
}
