//! Decision-tree feature learner, aggregation engine, and
//! fast-propositionalization aggregator for relboost (spec §4.2-§4.9).

pub mod agg;
pub mod concurrency;
pub mod criterion;
pub mod ensemble;
pub mod fastprop;
pub mod matches;
pub mod placeholder;
pub mod sql;
pub mod tree;

pub use ensemble::{feature_matrix, fit, transform, FittedEnsemble, FittedTree, SnowflakeSubensembles};
pub use fastprop::{evaluate as evaluate_fastprop, AbstractFeature, Condition, DataUsed as FastPropDataUsed, Vocabulary};
pub use matches::{make_matches, Match, Matches};
pub use placeholder::{JoinKeyPair, Placeholder, Propositionalization, TimeStampBound};
pub use sql::{to_sql, CategoryNames, Dialect};
