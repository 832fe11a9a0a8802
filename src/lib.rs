// src/lib.rs

pub mod adapter; // Layout strategies over the shared engine handle
pub mod client; // Per-worker operation loop
pub mod codec; // Record encoding and composite keys
pub mod config;
pub mod constants;
pub mod driver; // Load/run sequencing and shutdown
pub mod engine; // StorageEngine trait and the in-memory engine
pub mod error;
pub mod latch;
pub mod live_stats; // Periodic status lines
pub mod metrics; // Per-kind counters and latency histograms
pub mod phase; // Worker spawn/join and phase summaries
pub mod rate_limiter;
pub mod report;
pub mod scheduler; // Rate schedule replay
pub mod tsv_export; // TSV export for machine-readable results
pub mod workload;

pub use driver::{run_benchmark, Benchmark, BenchmarkOutcome};
pub use error::{BenchError, BenchResult, OpStatus};
