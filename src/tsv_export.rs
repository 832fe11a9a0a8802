//! TSV export for machine-readable benchmark results

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::BenchResult;
use crate::phase::{Phase, PhaseResult};
use crate::report::ReportSink;

pub const TSV_HEADER: &str =
    "phase\tkind\tcount\tnot_found\telapsed_s\tiops\tus_per_op\tp50_us\tp95_us\tp99_us\tmax_us";

/// Writes `<base>-<phase>-results.tsv`, one row per operation kind that ran.
pub struct TsvReport {
    basename: String,
    written: Vec<PathBuf>,
}

impl TsvReport {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            basename: path.as_ref().to_string_lossy().to_string(),
            written: Vec::new(),
        }
    }

    pub fn path_for(&self, phase: Phase) -> PathBuf {
        PathBuf::from(format!("{}-{}-results.tsv", self.basename, phase))
    }

    /// Files written so far
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ReportSink for TsvReport {
    fn report_phase(&mut self, result: &PhaseResult) -> BenchResult<()> {
        let path = self.path_for(result.phase);
        let mut f = BufWriter::new(File::create(&path)?);

        writeln!(f, "{}", TSV_HEADER)?;
        for k in result.kinds() {
            let lat = k.latency.map(|l| (l.p50_us, l.p95_us, l.p99_us, l.max_us)).unwrap_or_default();
            writeln!(
                f,
                "{}\t{}\t{}\t{}\t{:.3}\t{:.2}\t{:.2}\t{}\t{}\t{}\t{}",
                result.phase, k.kind, k.count, k.not_found, k.elapsed_secs, k.iops, k.us_per_op, lat.0, lat.1, lat.2, lat.3
            )?;
        }
        f.flush()?;

        info!("TSV results exported to: {}", path.display());
        self.written.push(path);
        Ok(())
    }
}
