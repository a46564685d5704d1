//! Three-mode read/write lock (spec §4.7 "Locking"): read, weak-write,
//! strong-write. A weak writer tolerates concurrent readers but excludes
//! other weak/strong writers, and can be upgraded to strong-write, which
//! excludes everyone. Fairness: waiting strong writers are preferred over
//! weak writers over readers.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use relboost_common::{RelboostError, Result};

struct State {
    active_weak_writer: bool,
    active_writer: bool,
    active_readers: usize,
    waiting_weak_writers: usize,
    waiting_writers: usize,
}

/// Guards a single resource shared across the split-search threads of one
/// fit/transform invocation.
pub struct ReadWriteLock {
    state: Mutex<State>,
    readers: Condvar,
    weak_writers: Condvar,
    writers: Condvar,
}

impl Default for ReadWriteLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadWriteLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                active_weak_writer: false,
                active_writer: false,
                active_readers: 0,
                waiting_weak_writers: 0,
                waiting_writers: 0,
            }),
            readers: Condvar::new(),
            weak_writers: Condvar::new(),
            writers: Condvar::new(),
        }
    }

    pub fn read_lock(&self) {
        let mut state = self.state.lock();
        self.readers.wait_while(&mut state, |s| s.active_writer);
        state.active_readers += 1;
    }

    pub fn read_lock_timeout(&self, duration: Duration) -> Result<()> {
        let mut state = self.state.lock();
        let deadline = Instant::now() + duration;
        while state.active_writer {
            if self.readers.wait_until(&mut state, deadline).timed_out() {
                return Err(RelboostError::lock_timeout(duration.as_millis() as u64));
            }
        }
        state.active_readers += 1;
        Ok(())
    }

    pub fn read_unlock(&self) {
        let mut state = self.state.lock();
        state.active_readers -= 1;
        self.notify_after_unlock(&state);
    }

    pub fn weak_write_lock(&self) {
        let mut state = self.state.lock();
        state.waiting_weak_writers += 1;
        self.weak_writers
            .wait_while(&mut state, |s| s.active_writer || s.active_weak_writer);
        state.waiting_weak_writers -= 1;
        state.active_weak_writer = true;
    }

    pub fn weak_write_lock_timeout(&self, duration: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.waiting_weak_writers += 1;
        let deadline = Instant::now() + duration;
        while state.active_writer || state.active_weak_writer {
            if self.weak_writers.wait_until(&mut state, deadline).timed_out() {
                state.waiting_weak_writers -= 1;
                return Err(RelboostError::lock_timeout(duration.as_millis() as u64));
            }
        }
        state.waiting_weak_writers -= 1;
        state.active_weak_writer = true;
        Ok(())
    }

    /// Upgrades a held weak-write lock to a strong-write lock.
    pub fn upgrade_weak_write_lock(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.active_weak_writer);
        state.waiting_writers += 1;
        self.writers
            .wait_while(&mut state, |s| s.active_readers > 0 || s.active_writer);
        state.waiting_writers -= 1;
        state.active_weak_writer = false;
        state.active_writer = true;
    }

    pub fn weak_write_unlock(&self) {
        let mut state = self.state.lock();
        state.active_weak_writer = false;
        self.notify_after_unlock(&state);
    }

    pub fn write_lock(&self) {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        self.writers.wait_while(&mut state, |s| {
            s.active_readers > 0 || s.active_writer || s.active_weak_writer
        });
        state.waiting_writers -= 1;
        state.active_writer = true;
    }

    pub fn write_lock_timeout(&self, duration: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        let deadline = Instant::now() + duration;
        while state.active_readers > 0 || state.active_writer || state.active_weak_writer {
            if self.writers.wait_until(&mut state, deadline).timed_out() {
                state.waiting_writers -= 1;
                return Err(RelboostError::lock_timeout(duration.as_millis() as u64));
            }
        }
        state.waiting_writers -= 1;
        state.active_writer = true;
        Ok(())
    }

    pub fn write_unlock(&self) {
        let mut state = self.state.lock();
        state.active_writer = false;
        self.notify_after_unlock(&state);
    }

    /// Fairness order: waiting strong writers first, then weak writers,
    /// then readers (spec §4.7 "Locking").
    fn notify_after_unlock(&self, state: &State) {
        if state.waiting_writers > 0 {
            self.writers.notify_one();
        } else if state.waiting_weak_writers > 0 {
            self.weak_writers.notify_one();
        } else {
            self.readers.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_do_not_block_each_other() {
        let lock = ReadWriteLock::new();
        lock.read_lock();
        lock.read_lock();
        lock.read_unlock();
        lock.read_unlock();
    }

    #[test]
    fn weak_write_upgrades_to_strong() {
        let lock = ReadWriteLock::new();
        lock.weak_write_lock();
        lock.upgrade_weak_write_lock();
        lock.write_unlock();
    }

    #[test]
    fn write_lock_times_out_while_held() {
        let lock = ReadWriteLock::new();
        lock.write_lock();
        let err = lock.write_lock_timeout(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.tag(), "LockTimeout");
        lock.write_unlock();
    }
}
