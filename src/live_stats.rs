// Periodic status output while a phase runs.
//
// The reporter thread reads the shared StatsAggregator every interval and
// logs one timestamped line. It waits on the workers' latch rather than
// sleeping, so it emits a final line and exits as soon as the phase ends.

use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::latch::CountDownLatch;
use crate::metrics::{StatsAggregator, StatsSnapshot};

/// Format one status line:
/// `<date> <time> <elapsed> sec: <ops> operations; [KIND: Count=.. Avg=..us] ...`
pub fn status_line(now: DateTime<Local>, elapsed: Duration, snap: &StatsSnapshot) -> String {
    let mut line = format!(
        "{} {} sec: {} operations;",
        now.format("%F %T"),
        elapsed.as_secs(),
        snap.total_ops()
    );
    for (kind, entry) in snap.active() {
        // Writing to a String cannot fail
        let _ = write!(line, " [{}: Count={} Avg={:.2}us]", kind, entry.count, entry.avg_micros());
    }
    line
}

pub struct StatusReporter {
    stats: Arc<StatsAggregator>,
    latch: Arc<CountDownLatch>,
    interval: Duration,
}

impl StatusReporter {
    pub fn new(stats: Arc<StatsAggregator>, latch: Arc<CountDownLatch>, interval: Duration) -> Self {
        Self { stats, latch, interval }
    }

    /// Report until the latch is released; returns the number of lines logged.
    ///
    /// One line is logged at start, one per elapsed interval, and a final one
    /// once the workers are done.
    pub fn run(&self) -> usize {
        let start = Instant::now();
        let mut lines = 0;
        let mut done = false;
        loop {
            info!("{}", status_line(Local::now(), start.elapsed(), &self.stats.snapshot()));
            lines += 1;
            if done {
                break;
            }
            done = self.latch.await_for(self.interval);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpStatus;
    use crate::metrics::OperationKind;
    use chrono::TimeZone;
    use std::thread;

    #[test]
    fn test_status_line_format() {
        let stats = StatsAggregator::new();
        stats.record(OperationKind::Read, Duration::from_micros(10), OpStatus::Ok);
        stats.record(OperationKind::Read, Duration::from_micros(20), OpStatus::Ok);
        stats.record(OperationKind::Update, Duration::from_micros(5), OpStatus::Ok);

        let now = Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let line = status_line(now, Duration::from_millis(7900), &stats.snapshot());
        assert_eq!(
            line,
            "2024-03-01 12:30:05 7 sec: 3 operations; [READ: Count=2 Avg=15.00us] [UPDATE: Count=1 Avg=5.00us]"
        );
    }

    #[test]
    fn test_status_line_without_ops() {
        let now = Local.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let line = status_line(now, Duration::ZERO, &StatsSnapshot::default());
        assert!(line.ends_with("0 sec: 0 operations;"));
    }

    #[test]
    fn test_reporter_exits_when_latch_released() {
        let stats = Arc::new(StatsAggregator::new());
        let latch = Arc::new(CountDownLatch::new(1));
        let reporter = StatusReporter::new(stats, latch.clone(), Duration::from_millis(10));
        let handle = thread::spawn(move || reporter.run());
        thread::sleep(Duration::from_millis(55));
        latch.count_down();
        let lines = handle.join().unwrap();
        // Initial line, a few interval lines and the final line
        assert!(lines >= 3, "only {} lines", lines);
    }

    #[test]
    fn test_reporter_on_released_latch_logs_start_and_final() {
        let latch = Arc::new(CountDownLatch::new(0));
        let reporter = StatusReporter::new(Arc::new(StatsAggregator::new()), latch, Duration::from_secs(60));
        assert_eq!(reporter.run(), 2);
    }
}
