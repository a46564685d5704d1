//! MIN, MAX. Empty or all-NaN inputs map to `f64::NAN`, filtered out of the
//! aggregation before the caller ever sees it (spec §4.4 "Numerical
//! semantics": "NaN filtered out before aggregation for min/max/quantile").

use super::Item;

fn values(items: &[Item]) -> impl Iterator<Item = f64> + '_ {
    items.iter().map(|&(_, v)| v).filter(|v| !v.is_nan())
}

pub fn min(items: &[Item]) -> f64 {
    values(items).fold(f64::NAN, |acc, v| if acc.is_nan() || v < acc { v } else { acc })
}

pub fn max(items: &[Item]) -> f64 {
    values(items).fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_of_mixed_series() {
        let items = [(f64::NAN, 3.0), (f64::NAN, 1.0), (f64::NAN, 2.0)];
        assert_eq!(min(&items), 1.0);
        assert_eq!(max(&items), 3.0);
    }

    #[test]
    fn empty_input_is_nan() {
        let items: [Item; 0] = [];
        assert!(min(&items).is_nan());
        assert!(max(&items).is_nan());
    }
}
