//! Storage adapter: record operations over an opaque ordered engine
//!
//! Each worker owns one [`StorageAdapter`]. All adapters share a single
//! engine handle through [`SharedEngine`]: the first adapter opens it, later
//! ones reuse it, and the orchestrator closes it exactly once with
//! [`SharedEngine::shutdown`] after every worker has joined.
//!
//! The layout is fixed when the adapter is opened. Every layout exposes the
//! same operation set; combinations a layout cannot serve (column-major
//! read/scan) fail with `UnsupportedFormat` instead of returning nothing.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec::{build_composite_key, row_of, split_composite_key, Field, Layout, Record, RecordCodec};
use crate::config::BenchConfig;
use crate::constants::ENGINE_STATS_PROPERTY;
use crate::engine::{open_engine, EngineIterator, StorageEngine, WriteBatch};
use crate::error::{BenchError, BenchResult, EngineError, OpStatus};

// -----------------------------------------------------------------------------
// Shared engine handle
// -----------------------------------------------------------------------------

#[derive(Default)]
struct SharedState {
    engine: Option<Arc<dyn StorageEngine>>,
    holders: usize,
    shut_down: bool,
    /// Contents already wiped for `kv.destroy`
    destroyed: bool,
}

/// Process-wide engine handle shared by every adapter instance.
///
/// The mutex guards only open/attach/detach/shutdown; per-operation engine
/// calls go through each adapter's own `Arc` clone without locking.
#[derive(Default)]
pub struct SharedEngine {
    state: Mutex<SharedState>,
}

impl SharedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handle that starts out holding an already-open engine.
    pub fn with_engine(engine: Arc<dyn StorageEngine>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SharedState {
                engine: Some(engine),
                holders: 0,
                shut_down: false,
                destroyed: false,
            }),
        })
    }

    /// With `destroy`, the first attach wipes the engine; later phases keep their data.
    fn attach<F>(&self, destroy: bool, open: F) -> BenchResult<Arc<dyn StorageEngine>>
    where
        F: FnOnce() -> BenchResult<Arc<dyn StorageEngine>>,
    {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(EngineError::new("open", "engine handle has been shut down").into());
        }
        let engine = match &state.engine {
            Some(engine) => Arc::clone(engine),
            None => {
                let engine = open()?;
                state.engine = Some(Arc::clone(&engine));
                engine
            }
        };
        if destroy && !state.destroyed {
            info!("Destroying existing engine contents");
            engine.destroy()?;
            state.destroyed = true;
        }
        state.holders += 1;
        Ok(engine)
    }

    fn detach(&self) {
        let mut state = self.state.lock();
        state.holders = state.holders.saturating_sub(1);
    }

    /// Number of live adapters attached to the handle.
    pub fn holders(&self) -> usize {
        self.state.lock().holders
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().engine.is_some()
    }

    /// Close the engine. Call once, after all workers have joined.
    pub fn shutdown(&self) -> BenchResult<()> {
        let engine = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(EngineError::new("shutdown", "engine handle already shut down").into());
            }
            state.shut_down = true;
            if state.holders > 0 {
                warn!("Shutting down engine with {} adapters still attached", state.holders);
            }
            state.engine.take()
        };
        match engine {
            Some(engine) => {
                info!("Shutting down storage engine");
                engine.close()?;
            }
            None => debug!("Shutdown requested but no engine was ever opened"),
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Adapter
// -----------------------------------------------------------------------------

pub struct StorageAdapter {
    engine: Arc<dyn StorageEngine>,
    shared: Arc<SharedEngine>,
    layout: Layout,
    codec: RecordCodec,
    field_prefix: String,
}

impl StorageAdapter {
    /// Attach to the shared engine, opening it from `cfg` on first use.
    pub fn open(shared: &Arc<SharedEngine>, cfg: &BenchConfig) -> BenchResult<Self> {
        let engine = shared.attach(cfg.destroy, || open_engine(&cfg.db_name, &cfg.db_path))?;
        Ok(Self {
            engine,
            shared: Arc::clone(shared),
            layout: cfg.layout,
            codec: RecordCodec::new(cfg.field_count),
            field_prefix: cfg.field_prefix.clone(),
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn field_count(&self) -> usize {
        self.codec.field_count()
    }

    /// `None` when the row does not exist.
    pub fn read(&self, key: &str, fields: Option<&[String]>) -> BenchResult<Option<Record>> {
        match self.layout {
            Layout::SingleEntry => self.read_single(key, fields),
            Layout::RowMajor => self.read_row_major(key, fields),
            Layout::ColumnMajor => Err(self.unsupported("read")),
        }
    }

    /// Up to `len` records starting at `key`, in engine key order.
    pub fn scan(&self, key: &str, len: usize, fields: Option<&[String]>) -> BenchResult<Vec<Record>> {
        match self.layout {
            Layout::SingleEntry => self.scan_single(key, len, fields),
            Layout::RowMajor => self.scan_row_major(key, len, fields),
            Layout::ColumnMajor => Err(self.unsupported("scan")),
        }
    }

    pub fn insert(&self, key: &str, values: &[Field]) -> BenchResult<OpStatus> {
        match self.layout {
            Layout::SingleEntry => {
                self.engine.put(key.as_bytes(), &RecordCodec::encode(values))?;
                Ok(OpStatus::Ok)
            }
            Layout::RowMajor | Layout::ColumnMajor => self.put_composite(key, values),
        }
    }

    /// Single-entry update merges into the stored record; composite layouts
    /// overwrite the named fields directly.
    pub fn update(&self, key: &str, values: &[Field]) -> BenchResult<OpStatus> {
        match self.layout {
            Layout::SingleEntry => self.update_single(key, values),
            Layout::RowMajor | Layout::ColumnMajor => self.put_composite(key, values),
        }
    }

    pub fn delete(&self, key: &str) -> BenchResult<OpStatus> {
        match self.layout {
            Layout::SingleEntry => {
                self.engine.delete(key.as_bytes())?;
                Ok(OpStatus::Ok)
            }
            Layout::RowMajor | Layout::ColumnMajor => {
                let mut batch = WriteBatch::with_capacity(self.field_count());
                for i in 0..self.field_count() {
                    let name = format!("{}{}", self.field_prefix, i);
                    batch.delete(build_composite_key(key, &name, self.layout)?);
                }
                self.engine.write(batch)?;
                Ok(OpStatus::Ok)
            }
        }
    }

    /// Engine statistics text, if the engine exposes any.
    pub fn stats(&self) -> Option<String> {
        self.engine.get_stat(ENGINE_STATS_PROPERTY)
    }

    fn unsupported(&self, op: &'static str) -> BenchError {
        BenchError::UnsupportedFormat {
            op,
            layout: self.layout.as_str(),
        }
    }

    fn decode(&self, data: &[u8], fields: Option<&[String]>) -> BenchResult<Record> {
        match fields {
            Some(wanted) => self.codec.decode_filtered(data, wanted),
            None => self.codec.decode(data),
        }
    }

    // --- single entry -------------------------------------------------------

    fn read_single(&self, key: &str, fields: Option<&[String]>) -> BenchResult<Option<Record>> {
        match self.engine.get(key.as_bytes())? {
            Some(data) => self.decode(&data, fields).map(Some),
            None => Ok(None),
        }
    }

    fn scan_single(&self, key: &str, len: usize, fields: Option<&[String]>) -> BenchResult<Vec<Record>> {
        let mut it = self.engine.iter()?;
        it.seek(key.as_bytes());
        let mut rows = Vec::with_capacity(len);
        while rows.len() < len && it.valid() {
            rows.push(self.decode(it.value(), fields)?);
            it.next();
        }
        Ok(rows)
    }

    fn update_single(&self, key: &str, values: &[Field]) -> BenchResult<OpStatus> {
        let data = match self.engine.get(key.as_bytes())? {
            Some(data) => data,
            None => return Ok(OpStatus::NotFound),
        };
        let mut current = self.codec.decode(&data)?;
        for new_field in values {
            let slot = current
                .iter_mut()
                .find(|f| f.name == new_field.name)
                .ok_or_else(|| BenchError::UnknownField {
                    key: key.to_string(),
                    field: new_field.name.clone(),
                })?;
            slot.value.clone_from(&new_field.value);
        }
        self.engine.put(key.as_bytes(), &RecordCodec::encode(&current))?;
        Ok(OpStatus::Ok)
    }

    // --- composite keys -----------------------------------------------------

    fn put_composite(&self, key: &str, values: &[Field]) -> BenchResult<OpStatus> {
        let mut batch = WriteBatch::with_capacity(values.len());
        for field in values {
            batch.put(build_composite_key(key, &field.name, self.layout)?, field.value.clone());
        }
        self.engine.write(batch)?;
        Ok(OpStatus::Ok)
    }

    fn read_row_major(&self, key: &str, fields: Option<&[String]>) -> BenchResult<Option<Record>> {
        let mut it = self.engine.iter()?;
        it.seek(build_composite_key(key, "", Layout::RowMajor)?.as_bytes());
        if !it.valid() || row_of(it.key()) != Some(key.as_bytes()) {
            return Ok(None);
        }
        let (_, record) = self.next_row(&mut *it, fields)?;
        Ok(Some(record))
    }

    fn scan_row_major(&self, key: &str, len: usize, fields: Option<&[String]>) -> BenchResult<Vec<Record>> {
        let mut it = self.engine.iter()?;
        it.seek(build_composite_key(key, "", Layout::RowMajor)?.as_bytes());
        let mut rows = Vec::with_capacity(len);
        while rows.len() < len && it.valid() {
            let (_, record) = self.next_row(&mut *it, fields)?;
            rows.push(record);
        }
        Ok(rows)
    }

    /// Consume exactly `field_count` entries belonging to the row under the cursor.
    fn next_row(
        &self,
        it: &mut (dyn EngineIterator + '_),
        fields: Option<&[String]>,
    ) -> BenchResult<(String, Record)> {
        let mut row: Option<String> = None;
        let mut record = Vec::with_capacity(self.field_count());
        for i in 0..self.field_count() {
            if !it.valid() {
                return Err(BenchError::corrupt(format!(
                    "row {:?} ends after {} of {} fields",
                    row.unwrap_or_default(),
                    i,
                    self.field_count()
                )));
            }
            let composite = std::str::from_utf8(it.key())
                .map_err(|e| BenchError::corrupt(format!("composite key is not UTF-8: {}", e)))?;
            let (cur_row, cur_field) = split_composite_key(composite, Layout::RowMajor)?;
            match &row {
                None => row = Some(cur_row),
                Some(expected) if *expected != cur_row => {
                    return Err(BenchError::corrupt(format!(
                        "row {:?} has {} of {} fields before row {:?}",
                        expected,
                        i,
                        self.field_count(),
                        cur_row
                    )));
                }
                Some(_) => {}
            }
            record.push(Field::new(cur_field, it.value()));
            it.next();
        }
        let row = row.unwrap_or_default();
        // Engine order is lexicographic (field10 sorts before field2), so pick by name
        let record = match fields {
            Some(wanted) => wanted
                .iter()
                .map(|name| take_field(&mut record, name, &row))
                .collect::<BenchResult<Record>>()?,
            None => (0..self.field_count())
                .map(|i| take_field(&mut record, &format!("{}{}", self.field_prefix, i), &row))
                .collect::<BenchResult<Record>>()?,
        };
        Ok((row, record))
    }
}

fn take_field(fields: &mut Record, name: &str, row: &str) -> BenchResult<Field> {
    fields
        .iter()
        .position(|f| f.name == name)
        .map(|idx| fields.swap_remove(idx))
        .ok_or_else(|| BenchError::corrupt(format!("field {:?} not found in row {:?}", name, row)))
}

impl Drop for StorageAdapter {
    fn drop(&mut self) {
        self.shared.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemEngine;

    fn config(layout: Layout, field_count: usize) -> BenchConfig {
        BenchConfig {
            layout,
            field_count,
            db_path: "/tmp/adapter-test".to_string(),
            ..BenchConfig::default()
        }
    }

    fn record(n: usize, tag: &str) -> Record {
        (0..n)
            .map(|i| Field::new(format!("field{}", i), format!("{}-{}", tag, i)))
            .collect()
    }

    fn adapter(layout: Layout, field_count: usize) -> (Arc<MemEngine>, StorageAdapter) {
        let engine = Arc::new(MemEngine::new("/tmp/adapter-test"));
        let shared = SharedEngine::with_engine(engine.clone());
        let adapter = StorageAdapter::open(&shared, &config(layout, field_count)).unwrap();
        (engine, adapter)
    }

    #[test]
    fn test_shared_engine_opens_once_and_counts_holders() {
        let shared = SharedEngine::new();
        let cfg = config(Layout::SingleEntry, 2);
        let a = StorageAdapter::open(&shared, &cfg).unwrap();
        let b = StorageAdapter::open(&shared, &cfg).unwrap();
        assert_eq!(shared.holders(), 2);
        assert!(Arc::ptr_eq(&a.engine, &b.engine));
        drop(a);
        assert_eq!(shared.holders(), 1);
        drop(b);
        assert_eq!(shared.holders(), 0);
        // Dropping to zero holders does not close the engine
        assert!(shared.is_open());

        shared.shutdown().unwrap();
        assert!(!shared.is_open());
        assert!(shared.shutdown().is_err());
        assert!(StorageAdapter::open(&shared, &cfg).is_err());
    }

    #[test]
    fn test_destroy_wipes_engine_on_first_attach_only() {
        let engine = Arc::new(MemEngine::new("/tmp/adapter-test"));
        engine.put(b"stale", b"x").unwrap();
        let shared = SharedEngine::with_engine(engine.clone());
        let cfg = BenchConfig {
            destroy: true,
            ..config(Layout::SingleEntry, 1)
        };

        let first = StorageAdapter::open(&shared, &cfg).unwrap();
        assert!(engine.is_empty());
        first.insert("user1", &record(1, "a")).unwrap();
        drop(first);

        // A later phase attaching with the same config keeps what was loaded
        let second = StorageAdapter::open(&shared, &cfg).unwrap();
        assert_eq!(second.read("user1", None).unwrap(), Some(record(1, "a")));
    }

    #[test]
    fn test_open_without_path_is_config_error() {
        let shared = SharedEngine::new();
        let cfg = BenchConfig {
            db_path: String::new(),
            ..BenchConfig::default()
        };
        assert!(matches!(StorageAdapter::open(&shared, &cfg), Err(BenchError::Config(_))));
        assert_eq!(shared.holders(), 0);
    }

    #[test]
    fn test_single_entry_read_update_delete() {
        let (_engine, db) = adapter(Layout::SingleEntry, 3);
        db.insert("user1", &record(3, "a")).unwrap();

        let full = db.read("user1", None).unwrap().unwrap();
        assert_eq!(full, record(3, "a"));

        let status = db.update("user1", &[Field::new("field1", "new")]).unwrap();
        assert_eq!(status, OpStatus::Ok);
        let wanted = vec!["field1".to_string()];
        let one = db.read("user1", Some(&wanted)).unwrap().unwrap();
        assert_eq!(one, vec![Field::new("field1", "new")]);

        assert_eq!(db.update("missing", &record(1, "x")).unwrap(), OpStatus::NotFound);
        assert!(db.read("missing", None).unwrap().is_none());

        db.delete("user1").unwrap();
        assert!(db.read("user1", None).unwrap().is_none());
    }

    #[test]
    fn test_single_entry_update_unknown_field_is_fatal() {
        let (_engine, db) = adapter(Layout::SingleEntry, 2);
        db.insert("user1", &record(2, "a")).unwrap();
        let err = db.update("user1", &[Field::new("bogus", "x")]).unwrap_err();
        assert!(matches!(err, BenchError::UnknownField { .. }));
    }

    #[test]
    fn test_single_entry_scan_walks_key_order() {
        let (_engine, db) = adapter(Layout::SingleEntry, 2);
        for k in ["user3", "user1", "user2", "user4"] {
            db.insert(k, &record(2, k)).unwrap();
        }
        let rows = db.scan("user2", 2, None).unwrap();
        assert_eq!(rows, vec![record(2, "user2"), record(2, "user3")]);
        assert_eq!(db.scan("user4", 10, None).unwrap().len(), 1);
    }

    #[test]
    fn test_row_major_layout() {
        let (engine, db) = adapter(Layout::RowMajor, 3);
        db.insert("user1", &record(3, "a")).unwrap();
        db.insert("user10", &record(3, "b")).unwrap();
        assert_eq!(engine.len(), 6);
        assert!(engine.keys().contains(&"user1:field2".to_string()));

        // "user1" must not match the neighbouring "user10" row
        assert_eq!(db.read("user1", None).unwrap().unwrap(), record(3, "a"));
        assert!(db.read("user", None).unwrap().is_none());

        let wanted = vec!["field0".to_string(), "field2".to_string()];
        let got = db.read("user10", Some(&wanted)).unwrap().unwrap();
        assert_eq!(got, vec![Field::new("field0", "b-0"), Field::new("field2", "b-2")]);

        let rows = db.scan("user1", 5, Some(&wanted[1..])).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec![Field::new("field2", "b-2")]);

        db.delete("user1").unwrap();
        assert_eq!(engine.len(), 3);
        assert!(db.read("user1", None).unwrap().is_none());
    }

    #[test]
    fn test_row_major_read_keeps_field_index_order() {
        let (_engine, db) = adapter(Layout::RowMajor, 12);
        db.insert("user1", &record(12, "a")).unwrap();
        db.insert("user2", &record(12, "b")).unwrap();

        let got = db.read("user1", None).unwrap().unwrap();
        assert_eq!(got, record(12, "a"));

        let rows = db.scan("user1", 2, None).unwrap();
        assert_eq!(rows, vec![record(12, "a"), record(12, "b")]);

        let wanted = vec!["field11".to_string(), "field2".to_string()];
        let got = db.read("user2", Some(&wanted)).unwrap().unwrap();
        assert_eq!(got, vec![Field::new("field11", "b-11"), Field::new("field2", "b-2")]);
    }

    #[test]
    fn test_row_major_short_row_is_corrupt() {
        let (engine, db) = adapter(Layout::RowMajor, 3);
        db.insert("user1", &record(3, "a")).unwrap();
        engine.delete(b"user1:field1").unwrap();
        assert!(matches!(db.read("user1", None), Err(BenchError::CorruptRecord(_))));
    }

    #[test]
    fn test_column_major_layout() {
        let (engine, db) = adapter(Layout::ColumnMajor, 2);
        db.insert("user1", &record(2, "a")).unwrap();
        db.update("user1", &[Field::new("field1", "z")]).unwrap();
        assert_eq!(engine.keys(), vec!["field0:user1", "field1:user1"]);
        assert_eq!(engine.get(b"field1:user1").unwrap(), Some(b"z".to_vec()));

        assert!(matches!(db.read("user1", None), Err(BenchError::UnsupportedFormat { op: "read", .. })));
        assert!(matches!(db.scan("user1", 1, None), Err(BenchError::UnsupportedFormat { op: "scan", .. })));

        db.delete("user1").unwrap();
        assert!(engine.is_empty());
    }

    #[test]
    fn test_stats_passthrough() {
        let (_engine, db) = adapter(Layout::SingleEntry, 1);
        db.insert("user1", &record(1, "a")).unwrap();
        assert!(db.stats().unwrap().contains("entries: 1"));
    }
}
