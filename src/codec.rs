//! Record encoding and composite-key scheme
//!
//! A record is stored either as one length-prefixed blob (single-entry
//! layout) or as one engine entry per field under a composite key
//! (row-major / column-major layouts).
//!
//! Blob format, repeated once per field in record order:
//!
//! ```text
//! u32 LE name_len | name bytes | u32 LE value_len | value bytes
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::COMPOSITE_KEY_DELIMITER;
use crate::error::{BenchError, BenchResult};

const LEN_PREFIX: usize = std::mem::size_of::<u32>();

/// One named column of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: Vec<u8>,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered field set for one row key.
pub type Record = Vec<Field>;

/// Physical record layout, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    /// Whole record encoded as one value under the row key
    #[serde(rename = "single")]
    SingleEntry,
    /// One entry per field, keyed `row:field`
    #[serde(rename = "row")]
    RowMajor,
    /// One entry per field, keyed `field:row`
    #[serde(rename = "column")]
    ColumnMajor,
}

impl Layout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::SingleEntry => "single",
            Layout::RowMajor => "row",
            Layout::ColumnMajor => "column",
        }
    }
}

impl FromStr for Layout {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Layout::SingleEntry),
            "row" => Ok(Layout::RowMajor),
            "column" => Ok(Layout::ColumnMajor),
            other => Err(BenchError::config(format!(
                "unknown format {:?} (expected single, row or column)",
                other
            ))),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the engine key for one field of one row.
pub fn build_composite_key(row_key: &str, field_name: &str, layout: Layout) -> BenchResult<String> {
    let mut key = String::with_capacity(row_key.len() + field_name.len() + 1);
    match layout {
        Layout::RowMajor => {
            key.push_str(row_key);
            key.push(COMPOSITE_KEY_DELIMITER);
            key.push_str(field_name);
        }
        Layout::ColumnMajor => {
            key.push_str(field_name);
            key.push(COMPOSITE_KEY_DELIMITER);
            key.push_str(row_key);
        }
        Layout::SingleEntry => {
            return Err(BenchError::UnsupportedFormat {
                op: "composite key",
                layout: layout.as_str(),
            })
        }
    }
    Ok(key)
}

/// Split an engine key into `(row_key, field_name)` at the first delimiter.
pub fn split_composite_key(composite: &str, layout: Layout) -> BenchResult<(String, String)> {
    let (left, right) = composite
        .split_once(COMPOSITE_KEY_DELIMITER)
        .ok_or_else(|| BenchError::corrupt(format!("composite key {:?} has no delimiter", composite)))?;
    match layout {
        Layout::RowMajor => Ok((left.to_string(), right.to_string())),
        Layout::ColumnMajor => Ok((right.to_string(), left.to_string())),
        Layout::SingleEntry => Err(BenchError::UnsupportedFormat {
            op: "composite key",
            layout: layout.as_str(),
        }),
    }
}

/// Row-key component of a row-major composite key, without allocating.
pub(crate) fn row_of(composite: &[u8]) -> Option<&[u8]> {
    let delim = COMPOSITE_KEY_DELIMITER as u8;
    composite
        .iter()
        .position(|b| *b == delim)
        .map(|idx| &composite[..idx])
}

/// Serializes records for the single-entry layout.
#[derive(Debug, Clone, Copy)]
pub struct RecordCodec {
    field_count: usize,
}

impl RecordCodec {
    pub fn new(field_count: usize) -> Self {
        Self { field_count }
    }

    pub fn field_count(&self) -> usize {
        self.field_count
    }

    pub fn encode(record: &[Field]) -> Bytes {
        let size: usize = record
            .iter()
            .map(|f| 2 * LEN_PREFIX + f.name.len() + f.value.len())
            .sum();
        let mut buf = BytesMut::with_capacity(size);
        for field in record {
            buf.put_u32_le(field.name.len() as u32);
            buf.put_slice(field.name.as_bytes());
            buf.put_u32_le(field.value.len() as u32);
            buf.put_slice(&field.value);
        }
        buf.freeze()
    }

    /// Decode a full record; the field count must match the configured count.
    pub fn decode(&self, data: &[u8]) -> BenchResult<Record> {
        let mut buf = data;
        let mut record = Vec::with_capacity(self.field_count);
        while buf.has_remaining() {
            record.push(next_field(&mut buf)?);
        }
        if record.len() != self.field_count {
            return Err(BenchError::corrupt(format!(
                "decoded {} fields, expected {}",
                record.len(),
                self.field_count
            )));
        }
        Ok(record)
    }

    /// Decode only `requested` fields. Names must appear in stored order.
    pub fn decode_filtered(&self, data: &[u8], requested: &[String]) -> BenchResult<Record> {
        let mut buf = data;
        let mut record = Vec::with_capacity(requested.len());
        while buf.has_remaining() && record.len() < requested.len() {
            let field = next_field(&mut buf)?;
            if field.name == requested[record.len()] {
                record.push(field);
            }
        }
        if record.len() < requested.len() {
            return Err(BenchError::corrupt(format!(
                "field {:?} not found in record",
                requested[record.len()]
            )));
        }
        Ok(record)
    }
}

fn next_chunk<'a>(buf: &mut &'a [u8], what: &str) -> BenchResult<&'a [u8]> {
    if buf.remaining() < LEN_PREFIX {
        return Err(BenchError::corrupt(format!(
            "truncated {} length: {} bytes left",
            what,
            buf.remaining()
        )));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(BenchError::corrupt(format!(
            "{} declares {} bytes, only {} left",
            what,
            len,
            buf.remaining()
        )));
    }
    let (chunk, rest) = buf.split_at(len);
    *buf = rest;
    Ok(chunk)
}

fn next_field(buf: &mut &[u8]) -> BenchResult<Field> {
    let name = next_chunk(buf, "field name")?;
    let name = std::str::from_utf8(name)
        .map_err(|e| BenchError::corrupt(format!("field name is not UTF-8: {}", e)))?
        .to_string();
    let value = next_chunk(buf, "field value")?.to_vec();
    Ok(Field { name, value })
}
