//! Per-invocation thread coordinator: barrier, checkpoint/cancellation,
//! and the spinlock-guarded shared buffer behind `all_reduce`/`broadcast`
//! (spec §4.7).

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use relboost_common::{RelboostError, Result};

use super::barrier::Barrier;

/// One communicator per fit/transform invocation, shared by every worker
/// thread (spec §4.7 "Scheduling model": "one communicator per
/// fit/transform invocation").
pub struct Communicator {
    barrier: Barrier,
    checkpoint_ok: AtomicBool,
    num_threads: usize,
    buffer: Mutex<Vec<f64>>,
}

impl Communicator {
    pub fn new(num_threads: usize) -> Self {
        Self {
            barrier: Barrier::new(num_threads),
            checkpoint_ok: AtomicBool::new(true),
            num_threads,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Waits until every thread sharing this communicator has reached
    /// this point.
    pub fn barrier(&self) -> &Barrier {
        &self.barrier
    }

    /// Forces every thread to observe `Interrupted` at the next
    /// checkpoint if any caller passes `ok = false` (spec §4.7
    /// "Cancellation").
    pub fn checkpoint(&self, ok: bool) -> Result<()> {
        if !ok {
            tracing::warn!("checkpoint observed cancellation, broadcasting to peers");
            self.checkpoint_ok.store(false, Ordering::Release);
        }
        tracing::trace!("entering checkpoint barrier");
        self.barrier.wait();
        tracing::trace!("released from checkpoint barrier");
        if self.checkpoint_ok.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RelboostError::Interrupted)
        }
    }

    /// Combines `contribution` across every thread under `op`, seeded by
    /// thread 0, and returns the folded result to every caller (spec
    /// §4.7 "all_reduce"). Each thread must call this exactly once per
    /// round with its own contribution.
    pub fn all_reduce(&self, rank: usize, contribution: &[f64], op: impl Fn(f64, f64) -> f64) -> Vec<f64> {
        {
            let mut buffer = self.buffer.lock();
            if rank == 0 {
                *buffer = contribution.to_vec();
            } else {
                if buffer.len() < contribution.len() {
                    buffer.resize(contribution.len(), 0.0);
                }
                for (slot, &value) in buffer.iter_mut().zip(contribution) {
                    *slot = op(*slot, value);
                }
            }
        }
        self.barrier.wait();
        let result = self.buffer.lock().clone();
        self.barrier.wait();
        result
    }

    /// Copies `values` from `root`'s caller into every other thread (spec
    /// §4.7 "broadcast").
    pub fn broadcast(&self, rank: usize, root: usize, values: &[f64]) -> Vec<f64> {
        if rank == root {
            *self.buffer.lock() = values.to_vec();
        }
        self.barrier.wait();
        let result = self.buffer.lock().clone();
        self.barrier.wait();
        result
    }

    /// Specialised `all_reduce` folding `(lo, hi)` pairs into the global
    /// min/max, used when splitting critical-value grids across threads
    /// (spec §4.7 "reduce_min_max").
    pub fn reduce_min_max(&self, rank: usize, lo: f64, hi: f64) -> (f64, f64) {
        let folded = self.all_reduce(rank, &[lo, hi], |a, b| a.min(b));
        let folded_hi = self.all_reduce(rank, &[hi], |a, b| a.max(b));
        (folded[0], folded_hi[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn all_reduce_sums_every_thread() {
        let comm = Arc::new(Communicator::new(4));
        let handles: Vec<_> = (0..4)
            .map(|rank| {
                let comm = comm.clone();
                thread::spawn(move || comm.all_reduce(rank, &[1.0], |a, b| a + b))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![4.0]);
        }
    }

    #[test]
    fn checkpoint_propagates_interruption() {
        let comm = Arc::new(Communicator::new(2));
        let comm2 = comm.clone();
        let h = thread::spawn(move || comm2.checkpoint(false));
        let result = comm.checkpoint(true);
        h.join().unwrap().unwrap_err();
        assert_eq!(result.unwrap_err().tag(), "Interrupted");
    }
}
