//! End-to-end load/run invocations against the in-memory engine

use kv_bench::codec::Layout;
use kv_bench::config::{BenchConfig, Properties};
use kv_bench::engine::MemEngine;
use kv_bench::metrics::OperationKind;
use kv_bench::phase::Phase;
use kv_bench::report::{ConsoleReport, ReportSinks};
use kv_bench::tsv_export::{TsvReport, TSV_HEADER};
use kv_bench::{run_benchmark, BenchError, Benchmark};
use std::sync::Arc;

fn config() -> BenchConfig {
    BenchConfig {
        db_path: "/tmp/driver-tests".into(),
        thread_count: 4,
        record_count: 100,
        operation_count: 400,
        field_count: 3,
        field_length: 16,
        do_load: true,
        do_transaction: true,
        ..BenchConfig::default()
    }
}

#[test]
fn test_nothing_to_do_is_rejected() {
    let cfg = BenchConfig {
        do_load: false,
        do_transaction: false,
        ..config()
    };
    let engine = Arc::new(MemEngine::new("/tmp/driver-tests"));
    let err = Benchmark::new(cfg)
        .with_engine(engine.clone())
        .run(&mut ReportSinks::new())
        .unwrap_err();
    assert!(matches!(&err, BenchError::Config(msg) if msg == "No operation to do"));
    assert!(engine.is_empty());
}

#[test]
fn test_load_then_run_and_shutdown() {
    let engine = Arc::new(MemEngine::new("/tmp/driver-tests"));
    let mut console = ConsoleReport::new(Vec::new());
    let outcome = Benchmark::new(config())
        .with_engine(engine.clone())
        .run(&mut console)
        .unwrap();

    let load = outcome.load.unwrap();
    assert_eq!(load.total_ops, 100);
    assert_eq!(load.stats.get(OperationKind::Insert).count, 100);
    assert_eq!(engine.len(), 100);

    let run = outcome.run.unwrap();
    assert_eq!(run.total_ops, 400);
    assert_eq!(run.stats.total_ops(), 400);
    // Every run-phase read targets a loaded key
    assert_eq!(run.stats.total_not_found(), 0);

    assert!(engine.is_closed());

    let text = String::from_utf8(console.into_inner()).unwrap();
    assert!(text.contains("********** load result **********"));
    assert!(text.contains("loading records: 100"));
    assert!(text.contains("********** run result **********"));
    assert!(text.contains("all operation records: 400"));
    assert!(!text.contains("db statistics"));
}

#[test]
fn test_row_major_load_writes_one_entry_per_field() {
    let cfg = BenchConfig {
        layout: Layout::RowMajor,
        do_transaction: false,
        ..config()
    };
    let engine = Arc::new(MemEngine::new("/tmp/driver-tests"));
    let outcome = Benchmark::new(cfg)
        .with_engine(engine.clone())
        .run(&mut ReportSinks::new())
        .unwrap();
    assert!(outcome.run.is_none());
    assert_eq!(engine.len(), 300);
    assert!(engine.keys().iter().all(|k| k.contains(":field")));
}

#[test]
fn test_row_major_mixed_run() {
    let mut cfg = BenchConfig {
        layout: Layout::RowMajor,
        field_count: 12,
        ..config()
    };
    cfg.workload.read_proportion = 0.4;
    cfg.workload.update_proportion = 0.2;
    cfg.workload.scan_proportion = 0.2;
    cfg.workload.read_modify_write_proportion = 0.2;
    cfg.workload.read_all_fields = false;
    cfg.workload.max_scan_length = 10;

    let engine = Arc::new(MemEngine::new("/tmp/driver-tests"));
    let outcome = Benchmark::new(cfg)
        .with_engine(engine.clone())
        .run(&mut ReportSinks::new())
        .unwrap();

    let run = outcome.run.unwrap();
    assert_eq!(run.total_ops, 400);
    assert_eq!(run.stats.total_not_found(), 0);
    for kind in [
        OperationKind::Read,
        OperationKind::Update,
        OperationKind::Scan,
        OperationKind::ReadModifyWrite,
    ] {
        assert!(run.stats.get(kind).count > 0, "no {} operations ran", kind);
    }
    assert_eq!(run.stats.get(OperationKind::Insert).count, 0);
    // Updates rewrite existing composite keys only
    assert_eq!(engine.len(), 100 * 12);
}

#[test]
fn test_engine_statistics_after_each_phase() {
    let cfg = BenchConfig {
        db_statistics: true,
        ..config()
    };
    let mut console = ConsoleReport::new(Vec::new());
    Benchmark::new(cfg)
        .with_engine(Arc::new(MemEngine::new("/tmp/driver-tests")))
        .run(&mut console)
        .unwrap();

    let text = String::from_utf8(console.into_inner()).unwrap();
    assert!(text.contains("-------------- db statistics after load--------------"));
    assert!(text.contains("-------------- db statistics after run--------------"));
    assert!(text.contains("entries: 100"));
}

#[test]
fn test_tsv_export_per_phase() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("bench");
    let mut tsv = TsvReport::new(&base);
    Benchmark::new(config())
        .with_engine(Arc::new(MemEngine::new("/tmp/driver-tests")))
        .run(&mut tsv)
        .unwrap();

    assert_eq!(tsv.written().len(), 2);
    let load = std::fs::read_to_string(tsv.path_for(Phase::Load)).unwrap();
    let mut lines = load.lines();
    assert_eq!(lines.next(), Some(TSV_HEADER));
    let row: Vec<&str> = lines.next().unwrap().split('\t').collect();
    assert_eq!(row[0], "load");
    assert_eq!(row[1], "INSERT");
    assert_eq!(row[2], "100");
    assert!(lines.next().is_none());

    let run = std::fs::read_to_string(tsv.path_for(Phase::Run)).unwrap();
    assert!(run.lines().skip(1).any(|l| l.starts_with("run\tREAD\t")));
}

#[test]
fn test_run_benchmark_from_properties() {
    let mut props = Properties::new();
    props.set_property("dbname", "memory");
    props.set_property("dbpath", "/tmp/driver-props");
    props.set_property("threadcount", "2");
    props.set_property("recordcount", "20");
    props.set_property("operationcount", "40");
    props.set_property("fieldcount", "2");
    props.set_property("dbstatistics", "false");
    props.set_property("doload", "true");
    props.set_property("dotransaction", "true");
    let cfg = BenchConfig::from_source(&props).unwrap();

    let outcome = run_benchmark(cfg, &mut ReportSinks::new()).unwrap();
    assert_eq!(outcome.load.unwrap().total_ops, 20);
    assert_eq!(outcome.run.unwrap().total_ops, 40);
}

#[test]
fn test_unknown_engine_fails_before_reporting() {
    let cfg = BenchConfig {
        db_name: "nosuchdb".into(),
        ..config()
    };
    let mut tsv = TsvReport::new("/tmp/driver-tests-unused");
    let err = run_benchmark(cfg, &mut tsv).unwrap_err();
    assert!(matches!(err, BenchError::Config(_)));
    assert!(tsv.written().is_empty());
}
