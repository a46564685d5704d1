//! Shared foundations for the `relboost` feature-engineering engine:
//! the typed column store and data frame, byte-level persistence, the
//! hyperparameter set, and the error taxonomy every other crate builds on.

pub mod column;
pub mod dataframe;
pub mod error;
pub mod hyperparameters;
pub mod persist;

pub use column::{Column, ColumnData, ColumnRole, Encoding, EncodingHandle};
pub use dataframe::{ColumnSchema, DataFrame};
pub use error::{RelboostError, Result};
pub use hyperparameters::{AggKind, EwmaHorizon, Hyperparameters, LossFunction};
