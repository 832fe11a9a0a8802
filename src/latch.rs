//! One-shot countdown barrier.
//!
//! Workers count down once each when they exit. Auxiliary threads (status
//! reporter, rate scheduler) use [`CountDownLatch::await_for`] as an
//! interruptible sleep: it returns `true` as soon as the last worker is done.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct CountDownLatch {
    count: Mutex<usize>,
    released: Condvar,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            released: Condvar::new(),
        }
    }

    /// Decrement once. Each participant must call this at most once.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.released.notify_all();
        }
    }

    /// Wait up to `timeout` for the count to reach zero.
    ///
    /// Returns `true` iff the latch is released; `false` means the timeout
    /// elapsed first. A zero timeout just polls.
    pub fn await_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut count = self.count.lock();
        while *count > 0 {
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut count, deadline).timed_out() {
                        return *count == 0;
                    }
                }
                // Past the clock's range: nothing but the release can end the wait
                None => self.released.wait(&mut count),
            }
        }
        true
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}
