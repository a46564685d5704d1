//! MEDIAN, MODE, quantiles (Q1..Q99), NUM_MAX, NUM_MIN.

use std::collections::HashMap;

use super::Item;
use super::minmax;

fn sorted_values(items: &[Item]) -> Vec<f64> {
    let mut values: Vec<f64> = items.iter().map(|&(_, v)| v).filter(|v| !v.is_nan()).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    values
}

/// Linear interpolation of the two order statistics straddling
/// `(n-1) * p` (spec §4.4 "Quantile uses linear interpolation").
pub fn quantile(items: &[Item], p: f64) -> f64 {
    let values = sorted_values(items);
    if values.is_empty() {
        return f64::NAN;
    }
    if values.len() == 1 {
        return values[0];
    }
    let rank = (values.len() - 1) as f64 * p;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    values[lo] + (values[hi] - values[lo]) * frac
}

/// Most frequent value; ties broken by the smallest value for determinism.
pub fn mode(items: &[Item]) -> f64 {
    let mut counts: HashMap<u64, (f64, usize)> = HashMap::new();
    for &(_, v) in items {
        if v.is_nan() {
            continue;
        }
        let entry = counts.entry(v.to_bits()).or_insert((v, 0));
        entry.1 += 1;
    }
    counts
        .values()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.partial_cmp(&a.0).unwrap()))
        .map(|&(v, _)| v)
        .unwrap_or(f64::NAN)
}

pub fn num_max(items: &[Item]) -> f64 {
    let m = minmax::max(items);
    if m.is_nan() {
        return 0.0;
    }
    items.iter().filter(|&&(_, v)| v == m).count() as f64
}

pub fn num_min(items: &[Item]) -> f64 {
    let m = minmax::min(items);
    if m.is_nan() {
        return 0.0;
    }
    items.iter().filter(|&&(_, v)| v == m).count() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_even_count_interpolates() {
        let items = [(f64::NAN, 1.0), (f64::NAN, 2.0), (f64::NAN, 3.0), (f64::NAN, 4.0)];
        assert_eq!(quantile(&items, 0.5), 2.5);
    }

    #[test]
    fn mode_breaks_ties_by_smallest_value() {
        let items = [(f64::NAN, 2.0), (f64::NAN, 1.0), (f64::NAN, 2.0), (f64::NAN, 1.0)];
        assert_eq!(mode(&items), 1.0);
    }

    #[test]
    fn num_max_counts_every_occurrence_of_the_maximum() {
        let items = [(f64::NAN, 5.0), (f64::NAN, 5.0), (f64::NAN, 1.0)];
        assert_eq!(num_max(&items), 2.0);
    }
}
