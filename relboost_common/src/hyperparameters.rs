//! Hyperparameters (spec §6 "Configuration").

use serde::{Deserialize, Serialize};

use crate::error::{RelboostError, Result};

/// The aggregation catalog enumerated in spec §4.4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggKind {
    Count,
    CountDistinct,
    CountMinusCountDistinct,
    Sum,
    Avg,
    AvgTimeBetween,
    Min,
    Max,
    Median,
    Mode,
    NumMax,
    NumMin,
    Quantile(u8), // Q1..Q99
    Stddev,
    Var,
    VariationCoefficient,
    Skew,
    Kurtosis,
    First,
    Last,
    Ewma(EwmaHorizon),
    EwmaTrend(EwmaHorizon),
    TimeSinceFirstMinimum,
    TimeSinceFirstMaximum,
    TimeSinceLastMinimum,
    TimeSinceLastMaximum,
    Trend,
}

/// The fixed set of half-life windows for the EWMA family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EwmaHorizon {
    OneSecond,
    OneMinute,
    OneHour,
    OneDay,
    SevenDays,
    ThirtyDays,
    NinetyDays,
    ThreeSixtyFiveDays,
}

impl EwmaHorizon {
    /// The horizon expressed in seconds, used as the decay constant.
    pub fn seconds(self) -> f64 {
        match self {
            Self::OneSecond => 1.0,
            Self::OneMinute => 60.0,
            Self::OneHour => 3_600.0,
            Self::OneDay => 86_400.0,
            Self::SevenDays => 7.0 * 86_400.0,
            Self::ThirtyDays => 30.0 * 86_400.0,
            Self::NinetyDays => 90.0 * 86_400.0,
            Self::ThreeSixtyFiveDays => 365.0 * 86_400.0,
        }
    }
}

impl AggKind {
    /// Whether this aggregation consumes `(timestamp, value)` pairs rather
    /// than a scalar value stream (spec §4.4).
    pub fn is_first_last_family(self) -> bool {
        matches!(
            self,
            Self::First
                | Self::Last
                | Self::Ewma(_)
                | Self::EwmaTrend(_)
                | Self::TimeSinceFirstMinimum
                | Self::TimeSinceFirstMaximum
                | Self::TimeSinceLastMinimum
                | Self::TimeSinceLastMaximum
                | Self::Trend
        )
    }
}

/// Loss function used by the optimization criterion (spec §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossFunction {
    SquaredError,
    Logistic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub num_features: u32,
    pub max_depth: u8,
    pub min_num_samples: u32,
    pub min_df: u32,
    pub grid_factor: f64,
    pub shrinkage: f64,
    pub sampling_factor: f64,
    pub share_conditions: f64,
    pub reg_lambda: f64,
    pub num_threads: u32,
    pub seed: i64,
    pub use_timestamps: bool,
    pub allow_lagged_targets: bool,
    pub silent: bool,
    pub horizon: f64,
    pub memory: f64,
    pub ts_name: String,
    pub self_join_keys: Vec<String>,
    pub loss_function: LossFunction,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            num_features: 20,
            max_depth: 3,
            min_num_samples: 1,
            min_df: 30,
            grid_factor: 10.0,
            shrinkage: 0.1,
            sampling_factor: 1.0,
            share_conditions: 1.0,
            reg_lambda: 0.0,
            num_threads: 1,
            seed: 5849,
            use_timestamps: true,
            allow_lagged_targets: false,
            silent: false,
            horizon: 0.0,
            memory: 0.0,
            ts_name: String::new(),
            self_join_keys: Vec::new(),
            loss_function: LossFunction::SquaredError,
        }
    }
}

impl Hyperparameters {
    /// Rejects the malformed configurations enumerated in spec §6/§7.
    pub fn validate(&self) -> Result<()> {
        if self.seed < 0 {
            return Err(RelboostError::invalid("seed must not be negative"));
        }
        if !(self.share_conditions > 0.0 && self.share_conditions <= 1.0) {
            return Err(RelboostError::invalid(
                "share_conditions must lie in (0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.shrinkage) {
            return Err(RelboostError::invalid("shrinkage must lie in [0, 1]"));
        }
        if self.sampling_factor < 0.0 {
            return Err(RelboostError::invalid(
                "sampling_factor must be non-negative",
            ));
        }
        if self.reg_lambda < 0.0 {
            return Err(RelboostError::invalid("reg_lambda must be non-negative"));
        }
        Ok(())
    }
}
