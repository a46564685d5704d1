//! FIRST, LAST, and the four TIME SINCE {FIRST,LAST} {MINIMUM,MAXIMUM}
//! aggregations.
//!
//! These consume `(elapsed, value)` pairs where `elapsed` is the time
//! already rebased by the caller to `ts_output − ts_input` (spec §4.8
//! "rebased to `ts_output − ts_input`"): larger `elapsed` means further in
//! the population row's past, so "first" (chronologically earliest) is the
//! item with the *largest* elapsed time and "last" (most recent) the one
//! with the *smallest*.

use super::Item;

fn valid(items: &[Item]) -> impl Iterator<Item = &Item> {
    items.iter().filter(|(t, v)| !t.is_nan() && !v.is_nan())
}

pub fn first(items: &[Item]) -> f64 {
    valid(items)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap())
        .map(|&(_, v)| v)
        .unwrap_or(0.0)
}

pub fn last(items: &[Item]) -> f64 {
    valid(items)
        .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap())
        .map(|&(_, v)| v)
        .unwrap_or(0.0)
}

fn extremum_elapsed(items: &[Item], want_max_value: bool, want_earliest: bool) -> f64 {
    let extreme_value = valid(items).fold(f64::NAN, |acc, &(_, v)| {
        if acc.is_nan() || (want_max_value && v > acc) || (!want_max_value && v < acc) {
            v
        } else {
            acc
        }
    });
    if extreme_value.is_nan() {
        return 0.0;
    }
    valid(items)
        .filter(|&&(_, v)| v == extreme_value)
        .map(|&(t, _)| t)
        .fold(None, |acc: Option<f64>, t| match acc {
            None => Some(t),
            Some(best) => {
                if (want_earliest && t > best) || (!want_earliest && t < best) {
                    Some(t)
                } else {
                    Some(best)
                }
            }
        })
        .unwrap_or(0.0)
}

pub fn time_since_first_minimum(items: &[Item]) -> f64 {
    extremum_elapsed(items, false, true)
}

pub fn time_since_first_maximum(items: &[Item]) -> f64 {
    extremum_elapsed(items, true, true)
}

pub fn time_since_last_minimum(items: &[Item]) -> f64 {
    extremum_elapsed(items, false, false)
}

pub fn time_since_last_maximum(items: &[Item]) -> f64 {
    extremum_elapsed(items, true, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_is_the_most_elapsed_and_last_the_least() {
        let items = [(5.0, 1.0), (2.0, 2.0), (8.0, 3.0)];
        assert_eq!(first(&items), 3.0);
        assert_eq!(last(&items), 2.0);
    }

    #[test]
    fn time_since_first_minimum_picks_the_oldest_tie() {
        let items = [(5.0, 1.0), (2.0, 1.0), (8.0, 9.0)];
        assert_eq!(time_since_first_minimum(&items), 5.0);
        assert_eq!(time_since_last_minimum(&items), 2.0);
    }
}
