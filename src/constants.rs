// src/constants.rs
//
// Central location for property names and defaults used throughout kvbench.
// Every tunable read from a ConfigSource is named here, next to its default.

use std::time::Duration;

// =============================================================================
// Engine / storage adapter
// =============================================================================

/// Engine factory name (e.g. "memory")
pub const PROP_DB_NAME: &str = "dbname";
pub const DEFAULT_DB_NAME: &str = "memory";

/// Engine location. Required: an empty value is a configuration error.
pub const PROP_DB_PATH: &str = "dbpath";

/// Physical record layout: "single", "row" or "column"
pub const PROP_FORMAT: &str = "kv.format";
pub const DEFAULT_FORMAT: &str = "single";

/// Wipe engine contents when the shared handle is first opened
pub const PROP_DESTROY: &str = "kv.destroy";

/// Engine property queried for `dbstatistics` output
pub const ENGINE_STATS_PROPERTY: &str = "kv.stats";

/// Separator between row key and field name in composite keys
pub const COMPOSITE_KEY_DELIMITER: char = ':';

// =============================================================================
// Record shape
// =============================================================================

pub const PROP_FIELD_COUNT: &str = "fieldcount";
pub const DEFAULT_FIELD_COUNT: usize = 10;

pub const PROP_FIELD_NAME_PREFIX: &str = "fieldnameprefix";
pub const DEFAULT_FIELD_NAME_PREFIX: &str = "field";

pub const PROP_FIELD_LENGTH: &str = "fieldlength";
pub const DEFAULT_FIELD_LENGTH: usize = 100;

// =============================================================================
// Phase sizing
// =============================================================================

pub const PROP_THREAD_COUNT: &str = "threadcount";
pub const DEFAULT_THREAD_COUNT: usize = 1;

/// Load-phase operation total
pub const PROP_RECORD_COUNT: &str = "recordcount";
pub const DEFAULT_RECORD_COUNT: u64 = 1000;

/// Run-phase operation total
pub const PROP_OPERATION_COUNT: &str = "operationcount";
pub const DEFAULT_OPERATION_COUNT: u64 = 1000;

pub const PROP_DO_LOAD: &str = "doload";
pub const PROP_DO_TRANSACTION: &str = "dotransaction";

/// Pause between load and run phases (seconds or humantime string)
pub const PROP_SLEEP_AFTER_LOAD: &str = "sleepafterload";

// =============================================================================
// Workload mix
// =============================================================================

pub const PROP_READ_PROPORTION: &str = "readproportion";
pub const DEFAULT_READ_PROPORTION: f64 = 0.95;

pub const PROP_UPDATE_PROPORTION: &str = "updateproportion";
pub const DEFAULT_UPDATE_PROPORTION: f64 = 0.05;

pub const PROP_INSERT_PROPORTION: &str = "insertproportion";
pub const PROP_SCAN_PROPORTION: &str = "scanproportion";
pub const PROP_RMW_PROPORTION: &str = "readmodifywriteproportion";

pub const PROP_READ_ALL_FIELDS: &str = "readallfields";
pub const PROP_WRITE_ALL_FIELDS: &str = "writeallfields";

/// "uniform" or "zipfian"
pub const PROP_REQUEST_DISTRIBUTION: &str = "requestdistribution";
pub const DEFAULT_REQUEST_DISTRIBUTION: &str = "uniform";

/// Zipf exponent used when requestdistribution=zipfian
pub const ZIPFIAN_CONSTANT: f64 = 0.99;

pub const PROP_MAX_SCAN_LENGTH: &str = "maxscanlength";
pub const DEFAULT_MAX_SCAN_LENGTH: usize = 100;

/// "hashed" or "ordered"
pub const PROP_INSERT_ORDER: &str = "insertorder";
pub const DEFAULT_INSERT_ORDER: &str = "hashed";

pub const KEY_PREFIX: &str = "user";

// =============================================================================
// Rate control
// =============================================================================

/// Initial total ops/sec across all workers, 0 = unlimited
pub const PROP_LIMIT_OPS: &str = "limit.ops";

/// Rate schedule file: "<timestamp_sec> <total_ops_per_sec>" per line
pub const PROP_LIMIT_FILE: &str = "limit.file";

/// Unit for rate schedule timestamps
pub const DEFAULT_SCHEDULE_TIME_UNIT: Duration = Duration::from_secs(1);

/// Longest a blocked `acquire` sleeps before re-checking the bucket.
pub const MAX_ACQUIRE_WAIT: Duration = Duration::from_millis(100);

// =============================================================================
// Status / reporting
// =============================================================================

pub const PROP_STATUS: &str = "status";

pub const PROP_STATUS_INTERVAL: &str = "status.interval";
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(10);

pub const PROP_DB_STATISTICS: &str = "dbstatistics";

/// HDR histogram upper bound: 1 hour in microseconds
pub const HISTOGRAM_MAX_MICROS: u64 = 3_600_000_000;

/// HDR histogram precision
pub const HISTOGRAM_SIGFIGS: u8 = 3;
