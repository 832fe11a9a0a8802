//! Top-level load/run sequencing
//!
//! [`Benchmark::run`] drives a whole invocation: load phase, pause, run phase,
//! optional engine statistics after each, and the single engine shutdown at
//! the end, which happens even when a phase fails.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapter::{SharedEngine, StorageAdapter};
use crate::config::BenchConfig;
use crate::engine::StorageEngine;
use crate::error::{BenchError, BenchResult};
use crate::metrics::StatsAggregator;
use crate::phase::{Phase, PhaseOrchestrator, PhaseResult};
use crate::report::ReportSink;
use crate::scheduler::RateSchedule;
use crate::workload::{CoreWorkload, WorkloadGenerator};

/// Results of the phases that ran.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkOutcome {
    pub load: Option<PhaseResult>,
    pub run: Option<PhaseResult>,
}

pub struct Benchmark {
    config: BenchConfig,
    shared: Arc<SharedEngine>,
    workload: Option<Arc<dyn WorkloadGenerator>>,
    schedule_unit: Option<Duration>,
}

impl Benchmark {
    /// Engine is opened by `dbname` when the first worker attaches.
    pub fn new(config: BenchConfig) -> Self {
        Self {
            config,
            shared: SharedEngine::new(),
            workload: None,
            schedule_unit: None,
        }
    }

    /// Use an already-open engine instead of the `dbname` factory.
    pub fn with_engine(mut self, engine: Arc<dyn StorageEngine>) -> Self {
        self.shared = SharedEngine::with_engine(engine);
        self
    }

    /// Replace the default `CoreWorkload`.
    pub fn with_workload(mut self, workload: Arc<dyn WorkloadGenerator>) -> Self {
        self.workload = Some(workload);
        self
    }

    pub fn with_schedule_time_unit(mut self, unit: Duration) -> Self {
        self.schedule_unit = Some(unit);
        self
    }

    pub fn shared_engine(&self) -> &Arc<SharedEngine> {
        &self.shared
    }

    pub fn run(self, sink: &mut dyn ReportSink) -> BenchResult<BenchmarkOutcome> {
        let cfg = &self.config;
        if !cfg.do_load && !cfg.do_transaction {
            return Err(BenchError::config("No operation to do"));
        }
        cfg.validate()?;

        let schedule = match &cfg.limit_file {
            Some(path) => Some(RateSchedule::load(path)?),
            None => None,
        };
        let workload: Arc<dyn WorkloadGenerator> = match &self.workload {
            Some(w) => Arc::clone(w),
            None => Arc::new(CoreWorkload::new(cfg)?),
        };

        let mut orchestrator = PhaseOrchestrator::new(
            Arc::clone(&self.shared),
            cfg.clone(),
            workload,
            Arc::new(StatsAggregator::new()),
        );
        if let Some(schedule) = schedule {
            orchestrator = orchestrator.with_rate_schedule(Box::new(schedule));
        }
        if let Some(unit) = self.schedule_unit {
            orchestrator = orchestrator.with_schedule_time_unit(unit);
        }

        let outcome = self.run_phases(&mut orchestrator, sink);
        // Shut down even after a failed phase; the phase error takes precedence
        let shutdown = self.shared.shutdown();
        let outcome = outcome?;
        shutdown?;
        Ok(outcome)
    }

    fn run_phases(&self, orchestrator: &mut PhaseOrchestrator, sink: &mut dyn ReportSink) -> BenchResult<BenchmarkOutcome> {
        let cfg = &self.config;
        let mut outcome = BenchmarkOutcome::default();

        if cfg.do_load {
            outcome.load = Some(orchestrator.run_phase(Phase::Load, cfg.record_count, sink)?);
            self.dump_engine_stats(Phase::Load, sink)?;
        }

        if !cfg.sleep_after_load.is_zero() {
            info!("Sleeping {:?} after load", cfg.sleep_after_load);
            thread::sleep(cfg.sleep_after_load);
        }

        if cfg.do_transaction {
            outcome.run = Some(orchestrator.run_phase(Phase::Run, cfg.operation_count, sink)?);
            self.dump_engine_stats(Phase::Run, sink)?;
        }
        Ok(outcome)
    }

    fn dump_engine_stats(&self, phase: Phase, sink: &mut dyn ReportSink) -> BenchResult<()> {
        if !self.config.db_statistics {
            return Ok(());
        }
        let adapter = StorageAdapter::open(&self.shared, &self.config)?;
        match adapter.stats() {
            Some(stats) => sink.report_engine_stats(phase, &stats),
            None => {
                warn!("Engine exposes no statistics");
                Ok(())
            }
        }
    }
}

/// Run with the default engine factory and workload.
pub fn run_benchmark(config: BenchConfig, sink: &mut dyn ReportSink) -> BenchResult<BenchmarkOutcome> {
    debug!("Running benchmark with {} threads", config.thread_count);
    Benchmark::new(config).run(sink)
}
