//! SUM and the central-moment family (STDDEV, VAR, VARIATION COEFFICIENT,
//! SKEW, KURTOSIS) — all computable from running power sums.

use super::Item;

pub fn sum(items: &[Item]) -> f64 {
    items.iter().map(|&(_, v)| v).sum()
}

fn mean(items: &[Item]) -> f64 {
    if items.is_empty() {
        0.0
    } else {
        sum(items) / items.len() as f64
    }
}

pub fn variance(items: &[Item]) -> f64 {
    if items.len() < 2 {
        return 0.0;
    }
    let m = mean(items);
    let n = items.len() as f64;
    items.iter().map(|&(_, v)| (v - m).powi(2)).sum::<f64>() / n
}

pub fn stddev(items: &[Item]) -> f64 {
    variance(items).sqrt()
}

pub fn variation_coefficient(items: &[Item]) -> f64 {
    let m = mean(items);
    if m == 0.0 {
        0.0
    } else {
        stddev(items) / m
    }
}

pub fn skew(items: &[Item]) -> f64 {
    let n = items.len() as f64;
    let sd = stddev(items);
    if items.len() < 2 || sd == 0.0 {
        return 0.0;
    }
    let m = mean(items);
    let third_moment = items.iter().map(|&(_, v)| ((v - m) / sd).powi(3)).sum::<f64>() / n;
    third_moment
}

pub fn kurtosis(items: &[Item]) -> f64 {
    let n = items.len() as f64;
    let sd = stddev(items);
    if items.len() < 2 || sd == 0.0 {
        return 0.0;
    }
    let m = mean(items);
    let fourth_moment = items.iter().map(|&(_, v)| ((v - m) / sd).powi(4)).sum::<f64>() / n;
    fourth_moment - 3.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_and_moments_of_constant_series_are_degenerate() {
        let items = [(f64::NAN, 5.0), (f64::NAN, 5.0), (f64::NAN, 5.0)];
        assert_eq!(sum(&items), 15.0);
        assert_eq!(variance(&items), 0.0);
        assert_eq!(skew(&items), 0.0);
        assert_eq!(kurtosis(&items), 0.0);
    }

    #[test]
    fn empty_input_maps_to_zero() {
        let items: [Item; 0] = [];
        assert_eq!(sum(&items), 0.0);
        assert_eq!(variance(&items), 0.0);
    }
}
