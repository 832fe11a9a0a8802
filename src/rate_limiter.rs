//! Per-worker token-bucket admission control
//!
//! Each worker owns one [`RateLimiter`] and calls [`RateLimiter::acquire`]
//! before every operation. The bucket refills continuously at `rate` tokens
//! per second and never holds more than `capacity` tokens, so over any window
//! of `T` seconds at most `rate * T + capacity` acquisitions are granted.
//!
//! # Key Concepts
//!
//! - **Blocking wait**: `acquire` parks the worker on a condition variable,
//!   it never spins.
//! - **Live rate changes**: [`RateLimiter::set_rate`] (called from the rate
//!   scheduler thread) wakes any waiter, which re-plans at the new rate.
//!   Time already elapsed is credited at the old rate only.
//! - **Unlimited**: a rate of zero or less disables throttling, as does a
//!   NaN or infinite rate.
//!
//! # Example
//!
//! ```rust
//! use kv_bench::rate_limiter::RateLimiter;
//!
//! // 1000 ops/sec split across 4 workers
//! let limiter = RateLimiter::new(250.0, 250.0);
//! limiter.acquire();
//! limiter.set_rate(500.0);
//! ```

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::constants::MAX_ACQUIRE_WAIT;

#[derive(Debug)]
struct Bucket {
    /// Tokens per second; <= 0 means unthrottled
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        if self.rate > 0.0 {
            let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        }
        self.last_refill = now;
    }
}

/// Non-finite rates collapse to 0 (unthrottled).
fn effective_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        0.0
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    wakeup: Condvar,
    granted: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter refilling at `rate` tokens/sec up to `capacity`.
    ///
    /// The bucket starts empty. Capacity is raised to one token if smaller,
    /// otherwise no acquisition could ever succeed.
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                rate: effective_rate(rate),
                capacity: capacity.max(1.0),
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
            wakeup: Condvar::new(),
            granted: AtomicU64::new(0),
        }
    }

    /// Block until one token is available, then consume it.
    pub fn acquire(&self) {
        let mut bucket = self.bucket.lock();
        loop {
            if bucket.rate <= 0.0 {
                break;
            }
            bucket.refill(Instant::now());
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                break;
            }
            let deficit = 1.0 - bucket.tokens;
            let wait = Duration::try_from_secs_f64(deficit / bucket.rate)
                .unwrap_or(MAX_ACQUIRE_WAIT)
                .min(MAX_ACQUIRE_WAIT);
            self.wakeup.wait_for(&mut bucket, wait);
        }
        self.granted.fetch_add(1, Ordering::Relaxed);
    }

    /// Change the refill rate; waiters re-plan immediately.
    pub fn set_rate(&self, rate: f64) {
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        bucket.rate = effective_rate(rate);
        drop(bucket);
        self.wakeup.notify_all();
    }

    pub fn rate(&self) -> f64 {
        self.bucket.lock().rate
    }

    pub fn capacity(&self) -> f64 {
        self.bucket.lock().capacity
    }

    pub fn is_throttled(&self) -> bool {
        self.rate() > 0.0
    }

    /// Acquisitions granted so far.
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }
}
