//! Optimization criterion (spec §4.3): gradients, line search, sample
//! weights.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};
use relboost_common::{LossFunction, RelboostError, Result};

/// Per-sample gradient/Hessian state plus the running prediction.
pub struct OptimizationCriterion {
    pub loss: LossFunction,
    pub targets: Vec<f64>,
    pub yhat_old: Vec<f64>,
    pub g: Vec<f64>,
    pub h: Vec<f64>,
}

impl OptimizationCriterion {
    /// `init` validates targets against the loss function and seeds
    /// `yhat_old` at zero (spec: "computes initial `yhat_old` and
    /// residuals").
    pub fn init(targets: Vec<f64>, loss: LossFunction) -> Result<Self> {
        if targets.is_empty() {
            return Err(RelboostError::invalid("init: empty target vector"));
        }
        if loss == LossFunction::Logistic {
            for &t in &targets {
                if t != 0.0 && t != 1.0 {
                    return Err(RelboostError::invalid(
                        "logistic loss requires targets in {0, 1}",
                    ));
                }
            }
        }
        for &t in &targets {
            if !t.is_finite() {
                return Err(RelboostError::invalid("target contains NaN or infinite value"));
            }
        }
        let n = targets.len();
        let mut criterion = Self {
            loss,
            targets,
            yhat_old: vec![0.0; n],
            g: vec![0.0; n],
            h: vec![0.0; n],
        };
        criterion.calc_residuals();
        Ok(criterion)
    }

    /// Refreshes per-row `g, h` from the current `yhat_old`.
    pub fn calc_residuals(&mut self) {
        match self.loss {
            LossFunction::SquaredError => {
                for i in 0..self.targets.len() {
                    self.g[i] = self.yhat_old[i] - self.targets[i];
                    self.h[i] = 1.0;
                }
            }
            LossFunction::Logistic => {
                for i in 0..self.targets.len() {
                    let p = sigmoid(self.yhat_old[i]);
                    self.g[i] = p - self.targets[i];
                    self.h[i] = (p * (1.0 - p)).max(1e-12);
                }
            }
        }
    }

    /// Line search minimizing `Σ sw (g·p + ½ h·p²)` along `new_feature`,
    /// reduced to `−Σ g·p / Σ h·p²` (spec §4.3 "Line-search semantics").
    /// Commits the step into `yhat_old` and returns the chosen rate.
    pub fn update_yhat_old(&mut self, sample_weights: &[f32], new_feature: &[f64]) -> f64 {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for i in 0..self.targets.len() {
            let sw = sample_weights[i] as f64;
            let p = new_feature[i];
            numerator += sw * self.g[i] * p;
            denominator += sw * self.h[i] * p * p;
        }
        let update_rate = if denominator == 0.0 {
            0.0
        } else {
            -numerator / denominator
        };
        for i in 0..self.targets.len() {
            self.yhat_old[i] += update_rate * new_feature[i];
        }
        update_rate
    }

    /// The loss reduction `new_feature` would buy if committed via
    /// `update_yhat_old`, without mutating `yhat_old` — used by the
    /// ensemble driver's candidate-tree tournament (spec §4.6 "keep the one
    /// whose root produced the largest loss-reduction").
    pub fn projected_reduction(&self, sample_weights: &[f32], new_feature: &[f64]) -> f64 {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for i in 0..self.targets.len() {
            let sw = sample_weights[i] as f64;
            let p = new_feature[i];
            numerator += sw * self.g[i] * p;
            denominator += sw * self.h[i] * p * p;
        }
        if denominator == 0.0 {
            0.0
        } else {
            numerator * numerator / denominator
        }
    }

    /// Bootstrap weights for the next boosting round. `sampling_factor <= 0`
    /// uses every row with weight 1; otherwise each row's weight is drawn
    /// from `Poisson(sampling_factor)`, matching the source's row-level
    /// bootstrap (spec: "returns the next bootstrap weights when
    /// `sampling_factor > 0`").
    pub fn make_sample_weights(&self, sampling_factor: f64, seed: u64) -> Vec<f32> {
        let n = self.targets.len();
        if sampling_factor <= 0.0 {
            return vec![1.0; n];
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Poisson::new(sampling_factor).expect("sampling_factor validated positive");
        (0..n).map(|_| dist.sample(&mut rng) as f32).collect()
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squared_error_gradient_is_residual() {
        let mut c = OptimizationCriterion::init(vec![1.0, 2.0, 3.0], LossFunction::SquaredError).unwrap();
        assert_eq!(c.g, vec![-1.0, -2.0, -3.0]);
        c.yhat_old = vec![1.0, 1.0, 1.0];
        c.calc_residuals();
        assert_eq!(c.g, vec![0.0, -1.0, -2.0]);
    }

    #[test]
    fn zero_denominator_yields_zero_update_rate() {
        let mut c = OptimizationCriterion::init(vec![1.0, 1.0], LossFunction::SquaredError).unwrap();
        let sw = [1.0, 1.0];
        let feature = [0.0, 0.0];
        let rate = c.update_yhat_old(&sw, &feature);
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn logistic_requires_binary_targets() {
        let err = OptimizationCriterion::init(vec![0.0, 0.5], LossFunction::Logistic).unwrap_err();
        assert_eq!(err.tag(), "InvalidInput");
    }

    #[test]
    fn zero_sampling_factor_gives_uniform_weights() {
        let c = OptimizationCriterion::init(vec![0.0, 1.0, 0.0], LossFunction::SquaredError).unwrap();
        let w = c.make_sample_weights(0.0, 42);
        assert_eq!(w, vec![1.0, 1.0, 1.0]);
    }
}
