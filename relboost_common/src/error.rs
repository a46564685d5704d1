//! Error taxonomy shared by every `relboost_*` crate.
//!
//! Mirrors the kinds described in the design's error-handling section:
//! each variant carries a human message and is distinguishable by its
//! discriminant (the "machine tag").

use thiserror::Error;

/// The crate-wide result alias, in the style of `risingwave_common::error::Result`.
pub type Result<T> = std::result::Result<T, RelboostError>;

#[derive(Debug, Error)]
pub enum RelboostError {
    /// Schema mismatch, NULL/inf targets, negative seed, empty population,
    /// bad quantile, and similar caller mistakes.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A column, pipeline, data frame, or project could not be located.
    #[error("not found: {kind} {name:?}")]
    NotFound { kind: &'static str, name: String },

    /// `fit` was called on an ensemble that already holds trees.
    #[error("already fit: {0}")]
    AlreadyFit(String),

    /// A cooperative cancellation request was observed at a barrier.
    #[error("interrupted")]
    Interrupted,

    /// A lock could not be acquired within the requested timeout.
    #[error("lock timeout after {millis}ms")]
    LockTimeout { millis: u64 },

    /// An error surfaced by a SQL backend, with the vendor code preserved.
    #[error("database error ({vendor_code:?}): {message}")]
    DatabaseError {
        vendor_code: Option<i64>,
        message: String,
    },

    /// The on-disk representation failed a length or byte-order check.
    #[error("corrupted data: {0}")]
    Corrupted(String),
}

impl RelboostError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn lock_timeout(millis: u64) -> Self {
        Self::LockTimeout { millis }
    }

    /// The machine-readable tag used by callers that need to branch on
    /// error kind without matching the whole enum (e.g. the RPC layer this
    /// core is embedded in).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidInput",
            Self::NotFound { .. } => "NotFound",
            Self::AlreadyFit(_) => "AlreadyFit",
            Self::Interrupted => "Interrupted",
            Self::LockTimeout { .. } => "LockTimeout",
            Self::DatabaseError { .. } => "DatabaseError",
            Self::Corrupted(_) => "Corrupted",
        }
    }
}
