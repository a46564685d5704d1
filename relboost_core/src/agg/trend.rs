//! TREND (unweighted linear-regression slope) and AVG_TIME_BETWEEN (mean
//! gap between consecutive peripheral events).

use super::Item;

pub fn trend(items: &[Item]) -> f64 {
    let valid: Vec<(f64, f64)> = items
        .iter()
        .copied()
        .filter(|(t, v)| !t.is_nan() && !v.is_nan())
        .collect();
    if valid.len() < 2 {
        return 0.0;
    }
    let n = valid.len() as f64;
    let mean_t = valid.iter().map(|&(t, _)| t).sum::<f64>() / n;
    let mean_v = valid.iter().map(|&(_, v)| v).sum::<f64>() / n;
    let covariance: f64 = valid.iter().map(|&(t, v)| (t - mean_t) * (v - mean_v)).sum();
    let variance: f64 = valid.iter().map(|&(t, _)| (t - mean_t).powi(2)).sum();
    if variance == 0.0 {
        0.0
    } else {
        covariance / variance
    }
}

/// Mean gap between consecutive distinct elapsed times, in chronological
/// order (spec §4.4 "AVG TIME BETWEEN").
pub fn avg_time_between(items: &[Item]) -> f64 {
    let mut elapsed: Vec<f64> = items
        .iter()
        .map(|&(t, _)| t)
        .filter(|t| !t.is_nan())
        .collect();
    if elapsed.len() < 2 {
        return 0.0;
    }
    elapsed.sort_by(|a, b| b.partial_cmp(a).unwrap()); // chronological: largest elapsed first
    let gaps: Vec<f64> = elapsed.windows(2).map(|w| w[0] - w[1]).collect();
    gaps.iter().sum::<f64>() / gaps.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_of_linear_series_recovers_the_slope() {
        let items = [(0.0, 0.0), (1.0, 2.0), (2.0, 4.0), (3.0, 6.0)];
        assert!((trend(&items) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn avg_time_between_of_evenly_spaced_events() {
        let items = [(0.0, 0.0), (10.0, 0.0), (20.0, 0.0), (30.0, 0.0)];
        assert!((avg_time_between(&items) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn fewer_than_two_points_is_zero() {
        let items = [(1.0, 1.0)];
        assert_eq!(trend(&items), 0.0);
        assert_eq!(avg_time_between(&items), 0.0);
    }
}
