//! Concurrency & reduction layer (spec §4.7): barrier, communicator,
//! read/write lock. Split search itself (`tree::node`) runs single-threaded
//! in this crate's current fit/transform paths; these primitives are the
//! building blocks a multi-threaded driver would compose them with, ported
//! faithfully from the source's own hand-rolled atomics rather than a
//! higher-level executor (see DESIGN.md).

pub mod barrier;
pub mod communicator;
pub mod rwlock;

pub use barrier::Barrier;
pub use communicator::Communicator;
pub use rwlock::ReadWriteLock;
