//! Timed rate changes during the run phase
//!
//! A rate schedule file lists `<timestamp> <total_ops_per_sec>` pairs, one
//! per line, with strictly increasing timestamps measured from the start of
//! the run phase. [`DynamicRateScheduler`] sleeps until each timestamp on the
//! workers' latch (so it exits as soon as the workers finish) and then splits
//! the new total rate evenly across every worker's [`RateLimiter`].
//!
//! Example file:
//!
//! ```text
//! # ramp up, then back off
//! 10 2000
//! 20 8000
//! 60 1000
//! ```

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::DEFAULT_SCHEDULE_TIME_UNIT;
use crate::error::{BenchError, BenchResult};
use crate::latch::CountDownLatch;
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateChange {
    /// Offset from phase start, in scheduler time units
    pub timestamp: u64,
    /// Total ops/sec across all workers; 0 removes the limit
    pub rate: u64,
}

/// Ordered stream of rate changes.
pub trait RateScheduleSource: Send {
    fn next_change(&mut self) -> Option<RateChange>;
}

/// In-memory rate schedule, typically loaded from `limit.file`.
///
/// Ordering is not checked here; the scheduler rejects non-increasing
/// timestamps when it reaches them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateSchedule {
    changes: VecDeque<RateChange>,
}

impl RateSchedule {
    pub fn new(changes: impl IntoIterator<Item = RateChange>) -> Self {
        Self {
            changes: changes.into_iter().collect(),
        }
    }

    /// Build from `(timestamp, rate)` pairs
    pub fn from_pairs(pairs: &[(u64, u64)]) -> Self {
        Self::new(pairs.iter().map(|&(timestamp, rate)| RateChange { timestamp, rate }))
    }

    pub fn parse<R: BufRead>(reader: R) -> BenchResult<Self> {
        let mut changes = VecDeque::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let parsed = match fields.as_slice() {
                [t, r] => t.parse::<u64>().ok().zip(r.parse::<u64>().ok()),
                _ => None,
            };
            let (timestamp, rate) = parsed.ok_or_else(|| {
                BenchError::config(format!(
                    "rate schedule line {}: expected \"<timestamp> <rate>\", got {:?}",
                    lineno + 1,
                    line
                ))
            })?;
            changes.push_back(RateChange { timestamp, rate });
        }
        Ok(Self { changes })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| BenchError::config(format!("failed to open rate schedule {}: {}", path.display(), e)))?;
        let schedule = Self::parse(BufReader::new(file))?;
        info!("Loaded {} rate changes from {}", schedule.len(), path.display());
        Ok(schedule)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl RateScheduleSource for RateSchedule {
    fn next_change(&mut self) -> Option<RateChange> {
        self.changes.pop_front()
    }
}

/// Applies a rate schedule to a phase's rate limiters.
pub struct DynamicRateScheduler {
    limiters: Vec<Arc<RateLimiter>>,
    latch: Arc<CountDownLatch>,
    time_unit: Duration,
}

impl DynamicRateScheduler {
    pub fn new(limiters: Vec<Arc<RateLimiter>>, latch: Arc<CountDownLatch>) -> Self {
        Self {
            limiters,
            latch,
            time_unit: DEFAULT_SCHEDULE_TIME_UNIT,
        }
    }

    /// Length of one timestamp tick (one second unless overridden)
    pub fn with_time_unit(mut self, unit: Duration) -> Self {
        self.time_unit = unit;
        self
    }

    /// Span of `n` ticks, saturating at the longest representable wait
    fn ticks(&self, n: u64) -> Duration {
        let nanos = self.time_unit.as_nanos().saturating_mul(u128::from(n));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Replay `source` until it is exhausted or the workers finish.
    ///
    /// Returns the number of rate changes applied. A timestamp that does not
    /// strictly follow its predecessor stops the scheduler with
    /// `InvalidSchedule` before any later change is applied; limiters keep
    /// their current rate.
    pub fn run(&self, source: &mut dyn RateScheduleSource) -> BenchResult<usize> {
        let mut last = 0u64;
        let mut applied = 0usize;
        let workers = self.limiters.len().max(1) as f64;

        while let Some(change) = source.next_change() {
            if change.timestamp <= last {
                return Err(BenchError::InvalidSchedule {
                    timestamp: change.timestamp,
                    previous: last,
                });
            }
            let wait = self.ticks(change.timestamp - last);
            if self.latch.await_for(wait) {
                debug!("Workers finished; rate scheduler exiting after {} changes", applied);
                return Ok(applied);
            }

            let per_worker = change.rate as f64 / workers;
            for limiter in &self.limiters {
                limiter.set_rate(per_worker);
            }
            info!(
                "t={}: rate set to {} ops/s ({:.1} per worker)",
                change.timestamp, change.rate, per_worker
            );
            last = change.timestamp;
            applied += 1;
        }
        Ok(applied)
    }
}
