//! Critical-value grids for the split proposer (spec §4.5).

use std::collections::HashMap;

/// Number of equally-spaced quantile cut points to try for a numerical or
/// discrete column at the given sample count: `max(grid_factor * sqrt(n), 1)`.
pub fn grid_size(grid_factor: f64, num_samples: usize) -> usize {
    ((grid_factor * (num_samples as f64).sqrt()).floor() as i64).max(1) as usize
}

/// Sorts `values` once and returns `grid_size` quantile cut points spanning
/// the sorted range, deduplicated and filtered to finite values (NaNs are
/// treated as "column is NULL on this row" and never produce a cut point).
pub fn numerical_grid(values: &[f64], grid_factor: f64) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return Vec::new();
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let n = sorted.len();
    let size = grid_size(grid_factor, n).min(n);
    let mut cuts = Vec::with_capacity(size);
    for i in 1..=size {
        let rank = (i as f64 / (size + 1) as f64) * (n - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let frac = rank - lo as f64;
        let value = sorted[lo] + (sorted[hi] - sorted[lo]) * frac;
        cuts.push(value);
    }
    cuts.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
    cuts
}

/// Unique categories whose document frequency is at least `min_df`, ordered
/// by descending frequency so the greedy subset search in `split.rs` tries
/// the most informative categories first.
pub fn categorical_candidates(categories: &[i32], min_df: u32) -> Vec<i32> {
    let mut counts: HashMap<i32, u32> = HashMap::new();
    for &c in categories {
        if c >= 0 {
            *counts.entry(c).or_insert(0) += 1;
        }
    }
    let mut candidates: Vec<i32> = counts
        .into_iter()
        .filter(|&(_, count)| count >= min_df)
        .map(|(category, _)| category)
        .collect();
    candidates.sort_unstable();
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_size_never_returns_zero() {
        assert_eq!(grid_size(10.0, 0), 1);
        assert_eq!(grid_size(0.5, 4), 1);
        assert_eq!(grid_size(10.0, 100), 100);
    }

    #[test]
    fn numerical_grid_spans_the_sorted_range() {
        let values = [1.0, 5.0, 3.0, 2.0, 4.0];
        let cuts = numerical_grid(&values, 1.0);
        assert!(!cuts.is_empty());
        assert!(cuts.iter().all(|&c| (1.0..=5.0).contains(&c)));
    }

    #[test]
    fn categorical_candidates_respects_min_df() {
        let categories = [0, 0, 0, 1, 2, 2];
        let candidates = categorical_candidates(&categories, 2);
        assert_eq!(candidates, vec![0, 2]);
    }
}
