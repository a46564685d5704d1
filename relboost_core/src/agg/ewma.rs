//! EWMA_{1S,1M,1H,1D,7D,30D,90D,365D} and their EWMA_TREND counterparts.
//!
//! Operates on the same rebased `(elapsed, value)` pairs as `firstlast.rs`.
//! Weight decays as `exp(-elapsed / horizon_seconds)`, so more recent
//! observations (smaller `elapsed`) dominate.

use relboost_common::EwmaHorizon;

use super::Item;

fn weight(elapsed: f64, horizon: &EwmaHorizon) -> f64 {
    (-elapsed.max(0.0) / horizon.seconds()).exp()
}

pub fn ewma(items: &[Item], horizon: EwmaHorizon) -> f64 {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for &(t, v) in items {
        if t.is_nan() || v.is_nan() {
            continue;
        }
        let w = weight(t, &horizon);
        weighted_sum += w * v;
        weight_total += w;
    }
    if weight_total == 0.0 {
        0.0
    } else {
        weighted_sum / weight_total
    }
}

/// Exponentially-weighted linear regression slope of `value` against
/// `elapsed`, used as a decay-weighted trend indicator.
pub fn ewma_trend(items: &[Item], horizon: EwmaHorizon) -> f64 {
    let valid: Vec<(f64, f64, f64)> = items
        .iter()
        .filter(|(t, v)| !t.is_nan() && !v.is_nan())
        .map(|&(t, v)| (t, v, weight(t, &horizon)))
        .collect();
    if valid.len() < 2 {
        return 0.0;
    }
    let weight_total: f64 = valid.iter().map(|&(_, _, w)| w).sum();
    if weight_total == 0.0 {
        return 0.0;
    }
    let mean_t: f64 = valid.iter().map(|&(t, _, w)| t * w).sum::<f64>() / weight_total;
    let mean_v: f64 = valid.iter().map(|&(_, v, w)| v * w).sum::<f64>() / weight_total;
    let covariance: f64 = valid.iter().map(|&(t, v, w)| w * (t - mean_t) * (v - mean_v)).sum();
    let variance: f64 = valid.iter().map(|&(t, _, w)| w * (t - mean_t).powi(2)).sum();
    if variance == 0.0 {
        0.0
    } else {
        covariance / variance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_of_constant_series_returns_the_constant() {
        let items = [(0.0, 4.0), (3600.0, 4.0), (7200.0, 4.0)];
        let value = ewma(&items, EwmaHorizon::OneHour);
        assert!((value - 4.0).abs() < 1e-9);
    }

    #[test]
    fn ewma_empty_input_is_zero() {
        let items: [Item; 0] = [];
        assert_eq!(ewma(&items, EwmaHorizon::OneDay), 0.0);
    }
}
