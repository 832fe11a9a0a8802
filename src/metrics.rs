//! Per-operation-kind statistics
//!
//! Two layers, both keyed by [`OperationKind`]:
//!
//! - [`StatsAggregator`]: count, cumulative latency and not-found tallies as
//!   plain atomics. Shared by every worker of a phase and polled by the status
//!   reporter; reset between phases.
//! - [`LatencyHists`]: HDR histograms owned by a single worker (no locking on
//!   the hot path), merged by the orchestrator once the workers have joined.

use hdrhistogram::Histogram;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::constants::{HISTOGRAM_MAX_MICROS, HISTOGRAM_SIGFIGS};
use crate::error::OpStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Read,
    Update,
    Scan,
    ReadModifyWrite,
}

impl OperationKind {
    pub const COUNT: usize = 5;

    /// Report order
    pub const ALL: [OperationKind; Self::COUNT] = [
        OperationKind::Insert,
        OperationKind::Read,
        OperationKind::Update,
        OperationKind::Scan,
        OperationKind::ReadModifyWrite,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            OperationKind::Insert => "INSERT",
            OperationKind::Read => "READ",
            OperationKind::Update => "UPDATE",
            OperationKind::Scan => "SCAN",
            OperationKind::ReadModifyWrite => "READMODIFYWRITE",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn as_micros(latency: Duration) -> u64 {
    latency.as_micros().min(u64::MAX as u128) as u64
}

// -----------------------------------------------------------------------------
// Shared counters
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct KindCounters {
    count: AtomicU64,
    micros: AtomicU64,
    not_found: AtomicU64,
}

/// Lock-free per-kind counters shared by all workers of a phase.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    kinds: [KindCounters; OperationKind::COUNT],
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed operation
    #[inline]
    pub fn record(&self, kind: OperationKind, latency: Duration, status: OpStatus) {
        let c = &self.kinds[kind.index()];
        c.count.fetch_add(1, Ordering::Relaxed);
        c.micros.fetch_add(as_micros(latency), Ordering::Relaxed);
        if status == OpStatus::NotFound {
            c.not_found.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Zero every counter. Only call between phases.
    pub fn reset(&self) {
        for c in &self.kinds {
            c.count.store(0, Ordering::Relaxed);
            c.micros.store(0, Ordering::Relaxed);
            c.not_found.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut snap = StatsSnapshot::default();
        for (entry, c) in snap.entries.iter_mut().zip(&self.kinds) {
            *entry = StatsEntry {
                count: c.count.load(Ordering::Relaxed),
                micros: c.micros.load(Ordering::Relaxed),
                not_found: c.not_found.load(Ordering::Relaxed),
            };
        }
        snap
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsEntry {
    pub count: u64,
    /// Cumulative latency
    pub micros: u64,
    pub not_found: u64,
}

impl StatsEntry {
    pub fn avg_micros(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.micros as f64 / self.count as f64
        }
    }
}

/// Point-in-time copy of a [`StatsAggregator`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    entries: [StatsEntry; OperationKind::COUNT],
}

impl StatsSnapshot {
    pub fn get(&self, kind: OperationKind) -> StatsEntry {
        self.entries[kind.index()]
    }

    pub fn total_ops(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    pub fn total_not_found(&self) -> u64 {
        self.entries.iter().map(|e| e.not_found).sum()
    }

    /// Kinds with a non-zero count, in report order
    pub fn active(&self) -> impl Iterator<Item = (OperationKind, StatsEntry)> + '_ {
        OperationKind::ALL
            .iter()
            .map(move |k| (*k, self.get(*k)))
            .filter(|(_, e)| e.count > 0)
    }
}

// -----------------------------------------------------------------------------
// Per-worker latency histograms
// -----------------------------------------------------------------------------

fn new_histogram() -> Histogram<u64> {
    // Bounds are compile-time constants, so allocation cannot be rejected
    Histogram::<u64>::new_with_bounds(1, HISTOGRAM_MAX_MICROS, HISTOGRAM_SIGFIGS)
        .expect("failed to allocate histogram")
}

/// Latency histograms (microseconds), one per operation kind.
#[derive(Debug, Clone)]
pub struct LatencyHists {
    hists: Vec<Histogram<u64>>,
}

impl LatencyHists {
    pub fn new() -> Self {
        Self {
            hists: (0..OperationKind::COUNT).map(|_| new_histogram()).collect(),
        }
    }

    #[inline]
    pub fn record(&mut self, kind: OperationKind, latency: Duration) {
        self.hists[kind.index()].saturating_record(as_micros(latency));
    }

    /// Merge another worker's histograms into this one
    pub fn merge(&mut self, other: &LatencyHists) {
        for (kind, (mine, theirs)) in OperationKind::ALL.iter().zip(self.hists.iter_mut().zip(&other.hists)) {
            if let Err(e) = mine.add(theirs) {
                warn!("Dropping {} latency samples during merge: {:?}", kind, e);
            }
        }
    }

    pub fn len(&self, kind: OperationKind) -> u64 {
        self.hists[kind.index()].len()
    }

    /// `None` when no samples were recorded for `kind`
    pub fn summary(&self, kind: OperationKind) -> Option<LatencySummary> {
        let h = &self.hists[kind.index()];
        if h.is_empty() {
            return None;
        }
        Some(LatencySummary {
            mean_us: h.mean(),
            p50_us: h.value_at_quantile(0.50),
            p95_us: h.value_at_quantile(0.95),
            p99_us: h.value_at_quantile(0.99),
            max_us: h.max(),
        })
    }
}

impl Default for LatencyHists {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}
