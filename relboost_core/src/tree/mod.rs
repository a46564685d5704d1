//! Decision-tree node, split proposer, and critical-value grids (spec §4.5).

pub mod grid;
pub mod node;
pub mod split;

pub use node::{CommittedSplit, Node};
pub use split::DataUsed;
