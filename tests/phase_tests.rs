//! Phase orchestration against scripted workloads and fake engines

use kv_bench::adapter::SharedEngine;
use kv_bench::codec::{Field, Layout, RecordCodec};
use kv_bench::config::BenchConfig;
use kv_bench::engine::{EngineIterator, MemEngine, StorageEngine, WriteBatch};
use kv_bench::error::{BenchError, BenchResult, EngineError};
use kv_bench::metrics::{OperationKind, StatsAggregator};
use kv_bench::phase::{split_ops, Phase, PhaseOrchestrator, PhaseResult};
use kv_bench::report::ReportSink;
use kv_bench::workload::{Operation, WorkloadGenerator};
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const LOADED_ROWS: u64 = 50;

#[derive(Default)]
struct Collect {
    results: Vec<PhaseResult>,
}

impl ReportSink for Collect {
    fn report_phase(&mut self, result: &PhaseResult) -> BenchResult<()> {
        self.results.push(result.clone());
        Ok(())
    }
}

/// Reads where every tenth key is absent
#[derive(Default)]
struct TenPercentMisses {
    issued: AtomicU64,
    misses: AtomicU64,
}

impl WorkloadGenerator for TenPercentMisses {
    fn next_operation(&self, _phase: Phase, _rng: &mut dyn RngCore) -> Operation {
        let n = self.issued.fetch_add(1, Ordering::Relaxed);
        if n % 10 == 0 {
            self.misses.fetch_add(1, Ordering::Relaxed);
            Operation::new(OperationKind::Read, format!("missing{}", n))
        } else {
            Operation::new(OperationKind::Read, format!("user{}", n % LOADED_ROWS))
        }
    }
}

fn config(threads: usize) -> BenchConfig {
    BenchConfig {
        db_path: "/tmp/phase-tests".into(),
        thread_count: threads,
        field_count: 2,
        layout: Layout::SingleEntry,
        ..BenchConfig::default()
    }
}

fn loaded_engine() -> Arc<MemEngine> {
    let engine = Arc::new(MemEngine::new("/tmp/phase-tests"));
    for i in 0..LOADED_ROWS {
        let record = vec![Field::new("field0", "a"), Field::new("field1", "b")];
        engine
            .put(format!("user{}", i).as_bytes(), &RecordCodec::encode(&record))
            .unwrap();
    }
    engine
}

#[test]
fn test_worker_shares() {
    assert_eq!(split_ops(100, 4), vec![25, 25, 25, 25]);
    assert_eq!(split_ops(101, 4), vec![26, 25, 25, 25]);
    assert_eq!(split_ops(200, 5).iter().sum::<u64>(), 200);
}

#[test]
fn test_absent_reads_are_counted_not_fatal() {
    let workload = Arc::new(TenPercentMisses::default());
    let shared = SharedEngine::with_engine(loaded_engine());
    let mut orchestrator = PhaseOrchestrator::new(
        shared.clone(),
        config(5),
        workload.clone(),
        Arc::new(StatsAggregator::new()),
    );
    let mut sink = Collect::default();

    let result = orchestrator.run_phase(Phase::Run, 200, &mut sink).unwrap();
    assert_eq!(result.total_ops, 200);
    let read = result.stats.get(OperationKind::Read);
    assert_eq!(read.count, 200);
    assert_eq!(read.not_found, workload.misses.load(Ordering::Relaxed));
    assert_eq!(read.not_found, 20);

    assert_eq!(sink.results.len(), 1);
    assert_eq!(result.kinds().len(), 1);
    assert_eq!(result.latencies.len(OperationKind::Read), 200);

    // Every adapter detached; shutdown is still the orchestrator's caller's job
    assert_eq!(shared.holders(), 0);
    assert!(shared.is_open());
    shared.shutdown().unwrap();
}

#[test]
fn test_stats_do_not_leak_between_phases() {
    let shared = SharedEngine::with_engine(loaded_engine());
    let stats = Arc::new(StatsAggregator::new());
    let mut orchestrator =
        PhaseOrchestrator::new(shared, config(2), Arc::new(TenPercentMisses::default()), stats.clone());
    let mut sink = Collect::default();

    orchestrator.run_phase(Phase::Load, 30, &mut sink).unwrap();
    let second = orchestrator.run_phase(Phase::Run, 10, &mut sink).unwrap();
    assert_eq!(second.stats.total_ops(), 10);
    assert_eq!(stats.snapshot().total_ops(), 10);
}

/// Delegates to a MemEngine but fails every `get` after the first `budget`.
struct FlakyEngine {
    inner: MemEngine,
    budget: AtomicU64,
}

impl StorageEngine for FlakyEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let left = self.budget.fetch_sub(1, Ordering::AcqRel);
        if left == 0 || left > u64::MAX / 2 {
            return Err(EngineError::new("get", "I/O error: device unavailable"));
        }
        self.inner.get(key)
    }
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.inner.put(key, value)
    }
    fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.inner.delete(key)
    }
    fn write(&self, batch: WriteBatch) -> Result<(), EngineError> {
        self.inner.write(batch)
    }
    fn iter(&self) -> Result<Box<dyn EngineIterator + '_>, EngineError> {
        self.inner.iter()
    }
    fn get_stat(&self, name: &str) -> Option<String> {
        self.inner.get_stat(name)
    }
    fn destroy(&self) -> Result<(), EngineError> {
        self.inner.destroy()
    }
    fn close(&self) -> Result<(), EngineError> {
        self.inner.close()
    }
}

#[test]
fn test_engine_failure_aborts_phase() {
    let engine = Arc::new(FlakyEngine {
        inner: MemEngine::new("/tmp/flaky"),
        budget: AtomicU64::new(25),
    });
    let shared = SharedEngine::with_engine(engine);
    let mut orchestrator = PhaseOrchestrator::new(
        shared.clone(),
        config(4),
        Arc::new(TenPercentMisses::default()),
        Arc::new(StatsAggregator::new()),
    );
    let mut sink = Collect::default();

    let err = orchestrator.run_phase(Phase::Run, 10_000, &mut sink).unwrap_err();
    match err {
        BenchError::Engine(e) => assert!(e.message.contains("device unavailable")),
        other => panic!("expected the engine error, got {:?}", other),
    }
    // A failed phase produces no report, and stops well short of its total
    assert!(sink.results.is_empty());
    assert!(orchestrator.stats().snapshot().total_ops() < 10_000);
    assert_eq!(shared.holders(), 0);
}

struct PanicsOnce {
    issued: AtomicU64,
}

impl WorkloadGenerator for PanicsOnce {
    fn next_operation(&self, _phase: Phase, _rng: &mut dyn RngCore) -> Operation {
        if self.issued.fetch_add(1, Ordering::Relaxed) == 5 {
            panic!("generator bug");
        }
        Operation::new(OperationKind::Read, "user1")
    }
}

#[test]
fn test_worker_panic_is_reported() {
    let shared = SharedEngine::with_engine(loaded_engine());
    let mut orchestrator = PhaseOrchestrator::new(
        shared,
        config(1),
        Arc::new(PanicsOnce {
            issued: AtomicU64::new(0),
        }),
        Arc::new(StatsAggregator::new()),
    );
    let err = orchestrator.run_phase(Phase::Run, 100, &mut Collect::default()).unwrap_err();
    assert!(matches!(err, BenchError::WorkerPanicked(0)));
}

#[test]
fn test_status_reporter_terminates_with_phase() {
    let cfg = BenchConfig {
        status: true,
        status_interval: std::time::Duration::from_millis(5),
        ..config(3)
    };
    let shared = SharedEngine::with_engine(loaded_engine());
    let mut orchestrator = PhaseOrchestrator::new(
        shared,
        cfg,
        Arc::new(TenPercentMisses::default()),
        Arc::new(StatsAggregator::new()),
    );
    let result = orchestrator.run_phase(Phase::Run, 300, &mut Collect::default()).unwrap();
    assert_eq!(result.total_ops, 300);
}
