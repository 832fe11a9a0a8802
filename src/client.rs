//! Per-worker operation loop
//!
//! A [`ClientRunner`] executes its assigned share of a phase: draw the next
//! operation, wait for a rate-limiter token, time the adapter call and record
//! the outcome. `NotFound` is an ordinary counted result. Any error is fatal:
//! the runner raises the shared abort flag so sibling workers stop before
//! their next operation, then returns the error.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

use crate::adapter::StorageAdapter;
use crate::error::{BenchError, BenchResult, OpStatus};
use crate::metrics::{LatencyHists, OperationKind, StatsAggregator};
use crate::phase::Phase;
use crate::rate_limiter::RateLimiter;
use crate::workload::{Operation, WorkloadGenerator};

/// Result of a worker that ran to completion.
#[derive(Debug)]
pub struct ClientOutcome {
    pub ops: u64,
    pub latencies: LatencyHists,
}

pub struct ClientRunner {
    id: usize,
    phase: Phase,
    adapter: StorageAdapter,
    workload: Arc<dyn WorkloadGenerator>,
    stats: Arc<StatsAggregator>,
    limiter: Option<Arc<RateLimiter>>,
    abort: Arc<AtomicBool>,
    rng: StdRng,
}

impl ClientRunner {
    pub fn new(
        id: usize,
        phase: Phase,
        adapter: StorageAdapter,
        workload: Arc<dyn WorkloadGenerator>,
        stats: Arc<StatsAggregator>,
        abort: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            phase,
            adapter,
            workload,
            stats,
            limiter: None,
            abort,
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Deterministic operation stream, for tests
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Execute exactly `num_ops` operations, or stop at the first fatal error.
    pub fn run(mut self, num_ops: u64) -> BenchResult<ClientOutcome> {
        debug!("Worker {} starting {} {} operations", self.id, num_ops, self.phase);
        let mut latencies = LatencyHists::new();

        for _ in 0..num_ops {
            if self.abort.load(Ordering::Acquire) {
                debug!("Worker {} stopping: phase aborted", self.id);
                return Err(BenchError::Aborted(self.id));
            }
            let op = self.workload.next_operation(self.phase, &mut self.rng);
            if let Some(limiter) = &self.limiter {
                limiter.acquire();
            }

            let started = Instant::now();
            let status = match self.execute(&op) {
                Ok(status) => status,
                Err(e) => {
                    self.abort.store(true, Ordering::Release);
                    error!("Worker {} {} on key {:?} failed: {}", self.id, op.kind, op.key, e);
                    return Err(e);
                }
            };
            let latency = started.elapsed();

            self.stats.record(op.kind, latency, status);
            latencies.record(op.kind, latency);
        }

        debug!("Worker {} finished {} operations", self.id, num_ops);
        Ok(ClientOutcome {
            ops: num_ops,
            latencies,
        })
    }

    fn execute(&self, op: &Operation) -> BenchResult<OpStatus> {
        let filter = op.filter.as_deref();
        match op.kind {
            OperationKind::Insert => self.adapter.insert(&op.key, &op.values),
            OperationKind::Read => Ok(found(self.adapter.read(&op.key, filter)?.is_some())),
            OperationKind::Update => self.adapter.update(&op.key, &op.values),
            OperationKind::Scan => {
                self.adapter.scan(&op.key, op.scan_len, filter)?;
                Ok(OpStatus::Ok)
            }
            OperationKind::ReadModifyWrite => match self.adapter.read(&op.key, filter)? {
                Some(_) => self.adapter.update(&op.key, &op.values),
                None => Ok(OpStatus::NotFound),
            },
        }
    }
}

fn found(present: bool) -> OpStatus {
    if present {
        OpStatus::Ok
    } else {
        OpStatus::NotFound
    }
}
