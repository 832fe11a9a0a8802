//! Phase execution: spawn one OS thread per worker, join, summarize
//!
//! [`PhaseOrchestrator::run_phase`] splits the phase's operation total across
//! the configured workers, starts a [`ClientRunner`] thread for each, plus the
//! optional status reporter and (run phase only) rate scheduler threads, and
//! waits for every worker before computing the [`PhaseResult`].
//!
//! Failure handling: the first worker to hit a fatal error raises a shared
//! abort flag, siblings stop before their next operation, and the phase
//! returns that first error. No partial result is reported for a failed phase.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::adapter::{SharedEngine, StorageAdapter};
use crate::client::{ClientOutcome, ClientRunner};
use crate::config::BenchConfig;
use crate::constants::DEFAULT_SCHEDULE_TIME_UNIT;
use crate::error::{BenchError, BenchResult};
use crate::latch::CountDownLatch;
use crate::live_stats::StatusReporter;
use crate::metrics::{LatencyHists, LatencySummary, OperationKind, StatsAggregator, StatsSnapshot};
use crate::rate_limiter::RateLimiter;
use crate::report::ReportSink;
use crate::scheduler::{DynamicRateScheduler, RateScheduleSource};
use crate::workload::WorkloadGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Load,
    Run,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Load => "load",
            Phase::Run => "run",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-worker shares of `total`: `total / workers` each, plus one for each of
/// the first `total % workers` workers.
pub fn split_ops(total: u64, workers: usize) -> Vec<u64> {
    if workers == 0 {
        return Vec::new();
    }
    let n = workers as u64;
    let base = total / n;
    let remainder = total % n;
    (0..n).map(|i| base + u64::from(i < remainder)).collect()
}

fn per_sec(count: u64, secs: f64) -> f64 {
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

fn micros_per_op(micros: f64, count: u64) -> f64 {
    if count > 0 {
        micros / count as f64
    } else {
        0.0
    }
}

/// Summary of one operation kind within a phase.
#[derive(Debug, Clone, PartialEq)]
pub struct KindResult {
    pub kind: OperationKind,
    pub count: u64,
    pub not_found: u64,
    /// Cumulative time spent in this kind's operations, summed over workers
    pub elapsed_secs: f64,
    pub iops: f64,
    pub us_per_op: f64,
    pub latency: Option<LatencySummary>,
}

/// Immutable outcome of a completed phase.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase: Phase,
    pub total_ops: u64,
    /// Wall time from first worker spawn to last worker join
    pub elapsed: Duration,
    pub stats: StatsSnapshot,
    pub latencies: LatencyHists,
}

impl PhaseResult {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    pub fn iops(&self) -> f64 {
        per_sec(self.total_ops, self.elapsed_secs())
    }

    pub fn us_per_op(&self) -> f64 {
        micros_per_op(self.elapsed.as_micros() as f64, self.total_ops)
    }

    /// Kinds with a non-zero count, in report order
    pub fn kinds(&self) -> Vec<KindResult> {
        self.stats
            .active()
            .map(|(kind, entry)| {
                let secs = entry.micros as f64 / 1e6;
                KindResult {
                    kind,
                    count: entry.count,
                    not_found: entry.not_found,
                    elapsed_secs: secs,
                    iops: per_sec(entry.count, secs),
                    us_per_op: entry.avg_micros(),
                    latency: self.latencies.summary(kind),
                }
            })
            .collect()
    }
}

/// Counts the worker out of the latch on every exit path, panics included.
struct WorkerGuard {
    latch: Arc<CountDownLatch>,
    abort: Arc<AtomicBool>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.abort.store(true, Ordering::Release);
        }
        self.latch.count_down();
    }
}

/// Keep the first real failure; a sibling's `Aborted` never displaces it.
fn keep_first(slot: &mut Option<BenchError>, err: BenchError) {
    match slot {
        None => *slot = Some(err),
        Some(prev) if prev.is_abort() && !err.is_abort() => *slot = Some(err),
        Some(_) => {}
    }
}

pub struct PhaseOrchestrator {
    shared: Arc<SharedEngine>,
    config: BenchConfig,
    workload: Arc<dyn WorkloadGenerator>,
    stats: Arc<StatsAggregator>,
    schedule: Option<Box<dyn RateScheduleSource>>,
    schedule_unit: Duration,
    seed: Option<u64>,
}

impl PhaseOrchestrator {
    pub fn new(
        shared: Arc<SharedEngine>,
        config: BenchConfig,
        workload: Arc<dyn WorkloadGenerator>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            shared,
            config,
            workload,
            stats,
            schedule: None,
            schedule_unit: DEFAULT_SCHEDULE_TIME_UNIT,
            seed: None,
        }
    }

    /// Rate schedule replayed during the next run phase
    pub fn with_rate_schedule(mut self, schedule: Box<dyn RateScheduleSource>) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_schedule_time_unit(mut self, unit: Duration) -> Self {
        self.schedule_unit = unit;
        self
    }

    /// Worker `i` draws from a generator seeded with `seed + i`
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Run `total_ops` operations of `phase` and hand the result to `sink`.
    pub fn run_phase(&mut self, phase: Phase, total_ops: u64, sink: &mut dyn ReportSink) -> BenchResult<PhaseResult> {
        let num_workers = self.config.thread_count;
        let shares = split_ops(total_ops, num_workers);
        info!(
            "Starting {} phase: {} operations across {} workers",
            phase, total_ops, num_workers
        );

        self.stats.reset();
        let abort = Arc::new(AtomicBool::new(false));
        let latch = Arc::new(CountDownLatch::new(num_workers));

        let schedule = if phase == Phase::Run { self.schedule.take() } else { None };
        let limiters: Vec<Arc<RateLimiter>> = if phase == Phase::Run && (self.config.rate_limited() || schedule.is_some()) {
            let per_worker = self.config.limit_ops.ops() as f64 / num_workers as f64;
            info!("Rate limiting: {:.1} ops/s per worker", per_worker);
            (0..num_workers)
                .map(|_| Arc::new(RateLimiter::new(per_worker, per_worker)))
                .collect()
        } else {
            Vec::new()
        };

        // Attach every adapter before any thread starts so open failures abort cleanly
        let mut runners = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let adapter = StorageAdapter::open(&self.shared, &self.config)?;
            let mut runner = ClientRunner::new(
                id,
                phase,
                adapter,
                Arc::clone(&self.workload),
                Arc::clone(&self.stats),
                Arc::clone(&abort),
            );
            if let Some(limiter) = limiters.get(id) {
                runner = runner.with_rate_limiter(Arc::clone(limiter));
            }
            if let Some(seed) = self.seed {
                runner = runner.with_seed(seed.wrapping_add(id as u64));
            }
            runners.push(runner);
        }

        let start = Instant::now();
        let mut first_error = None;
        let mut handles: Vec<(usize, JoinHandle<BenchResult<ClientOutcome>>)> = Vec::with_capacity(num_workers);
        for (runner, share) in runners.into_iter().zip(shares) {
            let id = runner.id();
            if first_error.is_some() {
                // Never started; still owes the latch its count
                latch.count_down();
                continue;
            }
            let guard = WorkerGuard {
                latch: Arc::clone(&latch),
                abort: Arc::clone(&abort),
            };
            debug!("Spawning worker {} with {} operations", id, share);
            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{}", phase, id))
                .spawn(move || {
                    let _guard = guard;
                    runner.run(share)
                });
            match spawned {
                Ok(handle) => handles.push((id, handle)),
                Err(e) => {
                    error!("Failed to spawn worker {}: {}", id, e);
                    abort.store(true, Ordering::Release);
                    keep_first(&mut first_error, e.into());
                }
            }
        }

        let status_handle = if self.config.status {
            let reporter = StatusReporter::new(Arc::clone(&self.stats), Arc::clone(&latch), self.config.status_interval);
            spawn_aux("status", move || reporter.run())
        } else {
            None
        };

        let scheduler_handle = schedule.and_then(|mut source| {
            let scheduler =
                DynamicRateScheduler::new(limiters.clone(), Arc::clone(&latch)).with_time_unit(self.schedule_unit);
            spawn_aux("rate-scheduler", move || scheduler.run(source.as_mut()))
        });

        let mut outcomes = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            match handle.join() {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => keep_first(&mut first_error, e),
                Err(panic) => {
                    error!("Worker {} thread panicked: {:?}", id, panic);
                    keep_first(&mut first_error, BenchError::WorkerPanicked(id));
                }
            }
        }
        let elapsed = start.elapsed();

        if let Some(handle) = status_handle {
            if handle.join().is_err() {
                warn!("Status reporter thread panicked");
            }
        }
        if let Some(handle) = scheduler_handle {
            match handle.join() {
                Ok(Ok(applied)) => debug!("Rate scheduler applied {} changes", applied),
                Ok(Err(e)) => error!("Rate scheduler stopped: {}", e),
                Err(_) => warn!("Rate scheduler thread panicked"),
            }
        }

        if let Some(e) = first_error {
            error!("{} phase failed: {}", phase, e);
            return Err(e);
        }

        let mut latencies = LatencyHists::new();
        for outcome in &outcomes {
            latencies.merge(&outcome.latencies);
        }
        let result = PhaseResult {
            phase,
            total_ops: outcomes.iter().map(|o| o.ops).sum(),
            elapsed,
            stats: self.stats.snapshot(),
            latencies,
        };
        info!(
            "{} phase complete: {} ops in {:.3}s ({:.2} ops/s)",
            phase,
            result.total_ops,
            result.elapsed_secs(),
            result.iops()
        );
        sink.report_phase(&result)?;
        Ok(result)
    }
}

fn spawn_aux<T, F>(name: &str, f: F) -> Option<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match thread::Builder::new().name(name.to_string()).spawn(f) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Failed to spawn {} thread, continuing without it: {}", name, e);
            None
        }
    }
}
