// -----------------------------------------------------------------------------
// kvbench - YCSB-style load/run benchmark for ordered key-value engines
// -----------------------------------------------------------------------------

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};

use kv_bench::config::{BenchConfig, Properties};
use kv_bench::constants::{
    PROP_DB_NAME, PROP_DB_PATH, PROP_DB_STATISTICS, PROP_DO_LOAD, PROP_DO_TRANSACTION, PROP_STATUS,
    PROP_THREAD_COUNT,
};
use kv_bench::driver::run_benchmark;
use kv_bench::report::{ConsoleReport, ReportSinks};
use kv_bench::tsv_export::TsvReport;

// -----------------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------------
#[derive(Parser, Debug)]
#[command(name = "kvbench", version, about = "Multi-threaded load/run benchmark for key-value engines")]
struct Cli {
    /// Run the load phase (inserts recordcount records)
    #[arg(long)]
    load: bool,

    /// Run the transaction phase (operationcount mixed operations)
    #[arg(short = 't', long = "run")]
    run: bool,

    /// Worker thread count (overrides threadcount)
    #[arg(long)]
    threads: Option<usize>,

    /// Engine name (overrides dbname)
    #[arg(long)]
    db: Option<String>,

    /// Engine location (overrides dbpath)
    #[arg(long)]
    dbpath: Option<String>,

    /// Workload property file; repeatable, later files override earlier ones
    #[arg(short = 'P', value_name = "FILE")]
    property_files: Vec<PathBuf>,

    /// Single property override, e.g. -p operationcount=99999
    #[arg(short = 'p', value_name = "KEY=VALUE")]
    properties: Vec<String>,

    /// Log a status line every status.interval seconds
    #[arg(short = 's', long = "status")]
    status: bool,

    /// Print engine statistics after each phase
    #[arg(long)]
    dbstatistics: bool,

    /// Also export results to <BASE>-<phase>-results.tsv
    #[arg(long, value_name = "BASE")]
    results_tsv: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Property files first, then -p overrides, then explicit flags.
    fn properties(&self) -> Result<Properties> {
        let mut props = Properties::new();
        for file in &self.property_files {
            props
                .load_file(file)
                .with_context(|| format!("Failed to load property file {}", file.display()))?;
        }
        for kv in &self.properties {
            props.set_from_arg(kv)?;
        }
        if let Some(threads) = self.threads {
            props.set_property(PROP_THREAD_COUNT, threads.to_string());
        }
        if let Some(db) = &self.db {
            props.set_property(PROP_DB_NAME, db.as_str());
        }
        if let Some(path) = &self.dbpath {
            props.set_property(PROP_DB_PATH, path.as_str());
        }
        if self.load {
            props.set_property(PROP_DO_LOAD, "true");
        }
        if self.run {
            props.set_property(PROP_DO_TRANSACTION, "true");
        }
        if self.status {
            props.set_property(PROP_STATUS, "true");
        }
        if self.dbstatistics {
            props.set_property(PROP_DB_STATISTICS, "true");
        }
        Ok(props)
    }
}

fn init_logging(verbose: u8, status: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = match verbose {
        0 => "warn",  // Default: only warnings and errors
        1 => "info",  // -v
        2 => "debug", // -vv
        _ => "trace", // -vvv+
    };
    let mut directives = format!("kv_bench={},kvbench={}", level, level);
    // Status lines are logged at info; keep them visible without -v
    if status && verbose == 0 {
        directives.push_str(",kv_bench::live_stats=info");
    }
    fmt().with_env_filter(EnvFilter::new(directives)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.status);

    let props = cli.properties()?;
    debug!("Properties:\n{}", props.debug_string());
    let config = BenchConfig::from_source(&props).context("Invalid configuration")?;
    info!("---- dbname:{}  dbpath:{} ----", config.db_name, config.db_path);
    info!("Effective configuration:\n{}", serde_yaml::to_string(&config)?);

    let mut sinks = ReportSinks::new();
    sinks.push(Box::new(ConsoleReport::stdout()));
    if let Some(base) = &cli.results_tsv {
        sinks.push(Box::new(TsvReport::new(base)));
    }

    run_benchmark(config, &mut sinks).context("Benchmark failed")?;
    Ok(())
}
