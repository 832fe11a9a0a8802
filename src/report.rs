//! Phase result sinks
//!
//! The orchestrator hands each completed [`PhaseResult`] to a [`ReportSink`].
//! [`ConsoleReport`] prints the classic text block; [`ReportSinks`] fans out
//! to several sinks (console plus TSV, for example).

use std::fmt::Write as _;
use std::io::{self, Write};

use crate::error::BenchResult;
use crate::metrics::OperationKind;
use crate::phase::{KindResult, Phase, PhaseResult};

pub trait ReportSink: Send {
    fn report_phase(&mut self, result: &PhaseResult) -> BenchResult<()>;

    /// Engine statistics text, sent after a phase when `dbstatistics` is set.
    fn report_engine_stats(&mut self, _phase: Phase, _stats: &str) -> BenchResult<()> {
        Ok(())
    }
}

/// Fan-out to every contained sink, in insertion order.
#[derive(Default)]
pub struct ReportSinks {
    sinks: Vec<Box<dyn ReportSink>>,
}

impl ReportSinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn ReportSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ReportSink for ReportSinks {
    fn report_phase(&mut self, result: &PhaseResult) -> BenchResult<()> {
        for sink in &mut self.sinks {
            sink.report_phase(result)?;
        }
        Ok(())
    }

    fn report_engine_stats(&mut self, phase: Phase, stats: &str) -> BenchResult<()> {
        for sink in &mut self.sinks {
            sink.report_engine_stats(phase, stats)?;
        }
        Ok(())
    }
}

fn kind_label(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Insert => "insert ops",
        OperationKind::Read => "read ops",
        OperationKind::Update => "update ops",
        OperationKind::Scan => "scan ops",
        OperationKind::ReadModifyWrite => "rmw ops",
    }
}

fn write_kind(out: &mut String, k: &KindResult) {
    let _ = writeln!(out, "{}: {}", kind_label(k.kind), k.count);
    let _ = writeln!(out, "use time: {:.3} s", k.elapsed_secs);
    let _ = writeln!(out, "IOPS: {:.2} iops ({:.2} us/op)", k.iops, k.us_per_op);
    if k.not_found > 0 {
        let _ = writeln!(out, "not found: {}", k.not_found);
    }
    if let Some(lat) = &k.latency {
        let _ = writeln!(
            out,
            "latency (us): p50={} p95={} p99={} max={}",
            lat.p50_us, lat.p95_us, lat.p99_us, lat.max_us
        );
    }
}

/// Text block for one phase, as printed by [`ConsoleReport`].
pub fn format_phase(result: &PhaseResult) -> String {
    let (title, total_label, rule) = match result.phase {
        Phase::Load => ("load", "loading records", "*********************************"),
        Phase::Run => ("run", "all operation records", "********************************"),
    };
    let mut out = String::new();
    let _ = writeln!(out, "********** {} result **********", title);
    let _ = writeln!(out, "{}: {}", total_label, result.total_ops);
    let _ = writeln!(out, "use time: {:.3} s", result.elapsed_secs());
    let _ = writeln!(out, "IOPS: {:.2} iops ({:.2} us/op)", result.iops(), result.us_per_op());
    for kind in result.kinds() {
        write_kind(&mut out, &kind);
    }
    let _ = writeln!(out, "{}", rule);
    out
}

/// Human-readable report on stdout (or any writer).
pub struct ConsoleReport<W: Write + Send = io::Stdout> {
    out: W,
}

impl ConsoleReport<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write + Send> ConsoleReport<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> ReportSink for ConsoleReport<W> {
    fn report_phase(&mut self, result: &PhaseResult) -> BenchResult<()> {
        self.out.write_all(format_phase(result).as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    fn report_engine_stats(&mut self, phase: Phase, stats: &str) -> BenchResult<()> {
        writeln!(self.out, "-------------- db statistics after {}--------------", phase)?;
        writeln!(self.out, "{}", stats.trim_end())?;
        writeln!(self.out, "----------------------------------------------------")?;
        self.out.flush()?;
        Ok(())
    }
}
