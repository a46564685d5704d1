//! Generation-counter two-phase barrier (spec §4.7 "Reduction primitives").

use std::sync::atomic::{AtomicUsize, Ordering};

/// Blocks every caller until `num_threads` callers have reached `wait()`,
/// then releases them all together. Spins rather than parking, matching
/// the source's lock-free barrier — split-search barrier waits are
/// expected to be short (one column's worth of candidates).
pub struct Barrier {
    generation: AtomicUsize,
    num_threads: usize,
    num_threads_left: AtomicUsize,
}

impl Barrier {
    pub fn new(num_threads: usize) -> Self {
        Self {
            generation: AtomicUsize::new(0),
            num_threads,
            num_threads_left: AtomicUsize::new(num_threads),
        }
    }

    /// Waits until every thread sharing this barrier has called `wait()`.
    pub fn wait(&self) {
        let generation = self.generation.load(Ordering::Acquire);
        if self.num_threads_left.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.num_threads_left.store(self.num_threads, Ordering::Release);
            self.generation.fetch_add(1, Ordering::Release);
        } else {
            while self.generation.load(Ordering::Acquire) == generation {
                std::hint::spin_loop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn releases_all_threads_together() {
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                thread::spawn(move || barrier.wait())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
