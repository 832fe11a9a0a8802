//! Error taxonomy for the benchmark core.
//!
//! `NotFound` is deliberately absent: a missing key on Read/Update is a
//! normal outcome and travels as [`OpStatus::NotFound`], never as an error.

use thiserror::Error;

/// Convenience alias for `Result<T, BenchError>`.
pub type BenchResult<T> = Result<T, BenchError>;

/// Outcome of an adapter call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Ok,
    NotFound,
}

impl OpStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, OpStatus::Ok)
    }
}

/// Failure reported by a storage engine. The message is passed through as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{op}: {message}")]
pub struct EngineError {
    pub op: &'static str,
    pub message: String,
}

impl EngineError {
    pub fn new(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum BenchError {
    /// Missing or unrecognized setting; raised before any phase starts.
    #[error("config error: {0}")]
    Config(String),

    /// Operation not implemented for the active layout.
    #[error("{op} is not supported by the {layout} layout")]
    UnsupportedFormat { op: &'static str, layout: &'static str },

    /// Decode length or field-count mismatch.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Update named a field the stored record does not have.
    #[error("update of key {key:?} names unknown field {field:?}")]
    UnknownField { key: String, field: String },

    /// Rate schedule timestamps must strictly increase.
    #[error("invalid rate schedule: timestamp {timestamp} does not follow {previous}")]
    InvalidSchedule { timestamp: u64, previous: u64 },

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    /// Worker stopped early because a sibling worker failed.
    #[error("worker {0} aborted after a sibling failure")]
    Aborted(usize),

    /// Writing a report or reading an input file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    pub fn config(msg: impl Into<String>) -> Self {
        BenchError::Config(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        BenchError::CorruptRecord(msg.into())
    }

    /// True for the sibling-abort marker, which never outranks the error that caused it.
    pub fn is_abort(&self) -> bool {
        matches!(self, BenchError::Aborted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_converts() {
        let err: BenchError = EngineError::new("put", "disk full").into();
        assert!(matches!(err, BenchError::Engine(_)));
        assert_eq!(err.to_string(), "engine error: put: disk full");
    }

    #[test]
    fn test_unsupported_format_message() {
        let err = BenchError::UnsupportedFormat {
            op: "read",
            layout: "column",
        };
        assert_eq!(err.to_string(), "read is not supported by the column layout");
    }

    #[test]
    fn test_abort_marker() {
        assert!(BenchError::Aborted(3).is_abort());
        assert!(!BenchError::config("x").is_abort());
        assert!(OpStatus::Ok.is_ok());
        assert!(!OpStatus::NotFound.is_ok());
    }
}
