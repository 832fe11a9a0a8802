// src/config.rs
//
// Property-based configuration. A `ConfigSource` answers string lookups; the
// harness resolves everything it needs into a typed `BenchConfig` once,
// before any phase starts, so bad settings fail early as `BenchError::Config`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::codec::Layout;
use crate::constants::*;
use crate::error::{BenchError, BenchResult};

/// Read-only string property lookup.
pub trait ConfigSource {
    fn get_property(&self, name: &str, default: &str) -> String;
}

/// Mutable property set loaded from `.properties` text and command-line overrides.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Merge `key=value` lines. `#` and `!` start comments; later values win.
    pub fn load<R: BufRead>(&mut self, reader: R) -> BenchResult<()> {
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| BenchError::config(format!("reading properties: {}", e)))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                BenchError::config(format!("line {}: expected key=value, got {:?}", lineno + 1, line))
            })?;
            self.set_property(key.trim(), value.trim());
        }
        Ok(())
    }

    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> BenchResult<()> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| BenchError::config(format!("failed to open {}: {}", path.display(), e)))?;
        self.load(BufReader::new(file))
    }

    /// `key=value` pair as given on the command line.
    pub fn set_from_arg(&mut self, arg: &str) -> BenchResult<()> {
        let (key, value) = arg.split_once('=').ok_or_else(|| {
            BenchError::config(format!(
                "property {:?} must be key=value (e.g. operationcount=99999)",
                arg
            ))
        })?;
        self.set_property(key.trim(), value.trim());
        Ok(())
    }

    /// Sorted `key=value` lines, for logging.
    pub fn debug_string(&self) -> String {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        keys.iter()
            .map(|k| format!("{}={}\n", k, self.values[*k]))
            .collect()
    }
}

impl ConfigSource for Properties {
    fn get_property(&self, name: &str, default: &str) -> String {
        self.values
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

// -----------------------------------------------------------------------------
// Typed configuration
// -----------------------------------------------------------------------------

/// Target operations per second across all workers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum IopsTarget {
    /// No rate limiting
    Max,
    Fixed(u64),
}

impl IopsTarget {
    pub fn from_ops(ops: u64) -> Self {
        if ops == 0 {
            IopsTarget::Max
        } else {
            IopsTarget::Fixed(ops)
        }
    }

    pub fn ops(&self) -> u64 {
        match self {
            IopsTarget::Max => 0,
            IopsTarget::Fixed(n) => *n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDistribution {
    Uniform,
    Zipfian,
}

impl FromStr for RequestDistribution {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(RequestDistribution::Uniform),
            "zipfian" => Ok(RequestDistribution::Zipfian),
            other => Err(BenchError::config(format!("unknown request distribution {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertOrder {
    /// Key numbers are FNV-hashed, spreading inserts across the key space
    Hashed,
    Ordered,
}

impl FromStr for InsertOrder {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hashed" => Ok(InsertOrder::Hashed),
            "ordered" => Ok(InsertOrder::Ordered),
            other => Err(BenchError::config(format!("unknown insert order {:?}", other))),
        }
    }
}

/// Operation mix and key selection for the run phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub read_proportion: f64,
    pub update_proportion: f64,
    pub insert_proportion: f64,
    pub scan_proportion: f64,
    pub read_modify_write_proportion: f64,
    pub read_all_fields: bool,
    pub write_all_fields: bool,
    pub request_distribution: RequestDistribution,
    pub max_scan_length: usize,
    pub insert_order: InsertOrder,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            read_proportion: DEFAULT_READ_PROPORTION,
            update_proportion: DEFAULT_UPDATE_PROPORTION,
            insert_proportion: 0.0,
            scan_proportion: 0.0,
            read_modify_write_proportion: 0.0,
            read_all_fields: true,
            write_all_fields: false,
            request_distribution: RequestDistribution::Uniform,
            max_scan_length: DEFAULT_MAX_SCAN_LENGTH,
            insert_order: InsertOrder::Hashed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    pub db_name: String,
    pub db_path: String,
    pub layout: Layout,
    pub destroy: bool,

    pub thread_count: usize,
    pub record_count: u64,
    pub operation_count: u64,
    pub do_load: bool,
    pub do_transaction: bool,

    pub field_count: usize,
    pub field_prefix: String,
    pub field_length: usize,
    pub workload: WorkloadConfig,

    /// Initial rate split evenly across workers (run phase only)
    pub limit_ops: IopsTarget,
    /// Rate schedule replayed during the run phase
    pub limit_file: Option<PathBuf>,

    pub status: bool,
    #[serde(with = "humantime_serde")]
    pub status_interval: Duration,
    pub db_statistics: bool,
    #[serde(with = "humantime_serde")]
    pub sleep_after_load: Duration,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            db_name: DEFAULT_DB_NAME.to_string(),
            db_path: String::new(),
            layout: Layout::SingleEntry,
            destroy: false,
            thread_count: DEFAULT_THREAD_COUNT,
            record_count: DEFAULT_RECORD_COUNT,
            operation_count: DEFAULT_OPERATION_COUNT,
            do_load: false,
            do_transaction: false,
            field_count: DEFAULT_FIELD_COUNT,
            field_prefix: DEFAULT_FIELD_NAME_PREFIX.to_string(),
            field_length: DEFAULT_FIELD_LENGTH,
            workload: WorkloadConfig::default(),
            limit_ops: IopsTarget::Max,
            limit_file: None,
            status: false,
            status_interval: DEFAULT_STATUS_INTERVAL,
            db_statistics: false,
            sleep_after_load: Duration::ZERO,
        }
    }
}

impl BenchConfig {
    /// Resolve and validate every setting from `src`.
    pub fn from_source(src: &dyn ConfigSource) -> BenchResult<Self> {
        let d = BenchConfig::default();
        let limit_file = src.get_property(PROP_LIMIT_FILE, "");

        let cfg = BenchConfig {
            db_name: src.get_property(PROP_DB_NAME, DEFAULT_DB_NAME),
            db_path: src.get_property(PROP_DB_PATH, ""),
            layout: src.get_property(PROP_FORMAT, DEFAULT_FORMAT).parse()?,
            destroy: get_bool(src, PROP_DESTROY, false)?,
            thread_count: get_parsed(src, PROP_THREAD_COUNT, d.thread_count)?,
            record_count: get_parsed(src, PROP_RECORD_COUNT, d.record_count)?,
            operation_count: get_parsed(src, PROP_OPERATION_COUNT, d.operation_count)?,
            do_load: get_bool(src, PROP_DO_LOAD, false)?,
            do_transaction: get_bool(src, PROP_DO_TRANSACTION, false)?,
            field_count: get_parsed(src, PROP_FIELD_COUNT, d.field_count)?,
            field_prefix: src.get_property(PROP_FIELD_NAME_PREFIX, DEFAULT_FIELD_NAME_PREFIX),
            field_length: get_parsed(src, PROP_FIELD_LENGTH, d.field_length)?,
            workload: WorkloadConfig {
                read_proportion: get_parsed(src, PROP_READ_PROPORTION, d.workload.read_proportion)?,
                update_proportion: get_parsed(src, PROP_UPDATE_PROPORTION, d.workload.update_proportion)?,
                insert_proportion: get_parsed(src, PROP_INSERT_PROPORTION, 0.0)?,
                scan_proportion: get_parsed(src, PROP_SCAN_PROPORTION, 0.0)?,
                read_modify_write_proportion: get_parsed(src, PROP_RMW_PROPORTION, 0.0)?,
                read_all_fields: get_bool(src, PROP_READ_ALL_FIELDS, true)?,
                write_all_fields: get_bool(src, PROP_WRITE_ALL_FIELDS, false)?,
                request_distribution: src
                    .get_property(PROP_REQUEST_DISTRIBUTION, DEFAULT_REQUEST_DISTRIBUTION)
                    .parse()?,
                max_scan_length: get_parsed(src, PROP_MAX_SCAN_LENGTH, d.workload.max_scan_length)?,
                insert_order: src.get_property(PROP_INSERT_ORDER, DEFAULT_INSERT_ORDER).parse()?,
            },
            limit_ops: IopsTarget::from_ops(get_parsed(src, PROP_LIMIT_OPS, 0u64)?),
            limit_file: (!limit_file.is_empty()).then(|| PathBuf::from(limit_file)),
            status: get_bool(src, PROP_STATUS, false)?,
            status_interval: get_duration(src, PROP_STATUS_INTERVAL, d.status_interval)?,
            db_statistics: get_bool(src, PROP_DB_STATISTICS, false)?,
            sleep_after_load: get_duration(src, PROP_SLEEP_AFTER_LOAD, d.sleep_after_load)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> BenchResult<()> {
        if self.thread_count == 0 {
            return Err(BenchError::config("threadcount must be at least 1"));
        }
        if self.field_count == 0 {
            return Err(BenchError::config("fieldcount must be at least 1"));
        }
        if self.field_prefix.contains(COMPOSITE_KEY_DELIMITER) {
            return Err(BenchError::config(format!(
                "fieldnameprefix must not contain {:?}",
                COMPOSITE_KEY_DELIMITER
            )));
        }
        if self.status_interval.is_zero() {
            return Err(BenchError::config("status.interval must be positive"));
        }
        let w = &self.workload;
        let proportions = [
            w.read_proportion,
            w.update_proportion,
            w.insert_proportion,
            w.scan_proportion,
            w.read_modify_write_proportion,
        ];
        if proportions.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(BenchError::config("operation proportions must be non-negative"));
        }
        if self.do_transaction && proportions.iter().sum::<f64>() <= 0.0 {
            return Err(BenchError::config("operation proportions sum to zero"));
        }
        if w.max_scan_length == 0 {
            return Err(BenchError::config("maxscanlength must be at least 1"));
        }
        Ok(())
    }

    /// Run phase needs a rate limiter per worker.
    pub fn rate_limited(&self) -> bool {
        self.limit_ops != IopsTarget::Max || self.limit_file.is_some()
    }
}

fn get_parsed<T>(src: &dyn ConfigSource, name: &str, default: T) -> BenchResult<T>
where
    T: FromStr + ToString,
    T::Err: std::fmt::Display,
{
    let raw = src.get_property(name, &default.to_string());
    raw.trim()
        .parse()
        .map_err(|e| BenchError::config(format!("{}={:?}: {}", name, raw, e)))
}

fn get_bool(src: &dyn ConfigSource, name: &str, default: bool) -> BenchResult<bool> {
    let raw = src.get_property(name, if default { "true" } else { "false" });
    match raw.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(BenchError::config(format!("{}={:?}: expected true or false", name, other))),
    }
}

/// Bare integer = seconds; otherwise a humantime string such as "500ms" or "2m".
fn get_duration(src: &dyn ConfigSource, name: &str, default: Duration) -> BenchResult<Duration> {
    let raw = src.get_property(name, "");
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(default);
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|e| BenchError::config(format!("{}={:?}: {}", name, raw, e)))
}
