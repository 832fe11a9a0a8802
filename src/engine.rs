//! Storage engine contract and the bundled in-memory engine
//!
//! The benchmark core only talks to engines through [`StorageEngine`]. Engines
//! must tolerate concurrent calls from every worker thread; the harness takes
//! no lock around per-operation calls.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::error::{BenchError, BenchResult, EngineError};

/// Forward cursor over engine entries in key order.
pub trait EngineIterator {
    /// Position at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);
    fn valid(&self) -> bool;
    fn next(&mut self);
    /// Current key. Only meaningful while `valid()`.
    fn key(&self) -> &[u8];
    /// Current value. Only meaningful while `valid()`.
    fn value(&self) -> &[u8];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Group of mutations applied atomically by [`StorageEngine::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            ops: Vec::with_capacity(n),
        }
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

pub trait StorageEngine: Send + Sync {
    /// `Ok(None)` when the key is absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError>;
    fn delete(&self, key: &[u8]) -> Result<(), EngineError>;
    fn write(&self, batch: WriteBatch) -> Result<(), EngineError>;
    fn iter(&self) -> Result<Box<dyn EngineIterator + '_>, EngineError>;
    /// Engine-specific property, `None` when unavailable.
    fn get_stat(&self, name: &str) -> Option<String>;
    /// Remove every entry.
    fn destroy(&self) -> Result<(), EngineError>;
    /// Release engine resources. Later calls fail with `EngineError`.
    fn close(&self) -> Result<(), EngineError>;
}

/// Open an engine by factory name.
pub fn open_engine(name: &str, path: &str) -> BenchResult<Arc<dyn StorageEngine>> {
    if path.is_empty() {
        return Err(BenchError::config("engine path (dbpath) is missing"));
    }
    match name {
        "memory" => {
            info!("Opening in-memory engine at {:?}", path);
            Ok(Arc::new(MemEngine::new(path)))
        }
        other => Err(BenchError::config(format!("unknown database name {:?}", other))),
    }
}

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// Ordered in-memory engine.
///
/// Every write takes the table's write lock; reads and iterator steps share
/// the read lock. Iterators do not pin a snapshot: each `next` observes the
/// table as it is at that moment.
#[derive(Debug)]
pub struct MemEngine {
    path: String,
    table: RwLock<Table>,
    closed: AtomicBool,
    gets: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    batches: AtomicU64,
}

impl MemEngine {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            table: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
            gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// All keys in order, lossily decoded. Test and debugging aid.
    pub fn keys(&self) -> Vec<String> {
        self.table
            .read()
            .keys()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect()
    }

    fn check_open(&self, op: &'static str) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::new(op, format!("engine {} is closed", self.path)));
        }
        Ok(())
    }
}

impl StorageEngine for MemEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.check_open("get")?;
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(self.table.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.check_open("put")?;
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.table.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.check_open("delete")?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.table.write().remove(key);
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), EngineError> {
        self.check_open("write")?;
        self.batches.fetch_add(1, Ordering::Relaxed);
        let mut table = self.table.write();
        for op in batch.ops {
            match op {
                BatchOp::Put { key, value } => {
                    table.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    table.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iter(&self) -> Result<Box<dyn EngineIterator + '_>, EngineError> {
        self.check_open("iter")?;
        Ok(Box::new(MemIterator {
            table: &self.table,
            current: None,
        }))
    }

    fn get_stat(&self, name: &str) -> Option<String> {
        match name {
            "kv.num-entries" => Some(self.len().to_string()),
            "kv.stats" => {
                let table = self.table.read();
                let bytes: usize = table.iter().map(|(k, v)| k.len() + v.len()).sum();
                Some(format!(
                    "path: {}\nentries: {}\nbytes: {}\ngets: {}\nputs: {}\ndeletes: {}\nbatches: {}",
                    self.path,
                    table.len(),
                    bytes,
                    self.gets.load(Ordering::Relaxed),
                    self.puts.load(Ordering::Relaxed),
                    self.deletes.load(Ordering::Relaxed),
                    self.batches.load(Ordering::Relaxed),
                ))
            }
            _ => None,
        }
    }

    fn destroy(&self) -> Result<(), EngineError> {
        self.check_open("destroy")?;
        self.table.write().clear();
        Ok(())
    }

    fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(EngineError::new("close", format!("engine {} already closed", self.path)));
        }
        info!("Closed in-memory engine at {:?}", self.path);
        Ok(())
    }
}

struct MemIterator<'a> {
    table: &'a RwLock<Table>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl MemIterator<'_> {
    fn load(&mut self, lower: Bound<&[u8]>) {
        let table = self.table.read();
        self.current = table
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
    }
}

impl EngineIterator for MemIterator<'_> {
    fn seek(&mut self, target: &[u8]) {
        self.load(Bound::Included(target));
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) {
        if let Some((key, _)) = self.current.take() {
            self.load(Bound::Excluded(key.as_slice()));
        }
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(k, _)| k.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map(|(_, v)| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put_delete() {
        let engine = MemEngine::new("/tmp/mem");
        assert_eq!(engine.get(b"a").unwrap(), None);
        engine.put(b"a", b"1").unwrap();
        assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
        engine.delete(b"a").unwrap();
        assert_eq!(engine.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_iterator_walks_in_key_order() {
        let engine = MemEngine::new("/tmp/mem");
        for k in ["c", "a", "e", "b"] {
            engine.put(k.as_bytes(), k.as_bytes()).unwrap();
        }
        let mut it = engine.iter().unwrap();
        it.seek(b"b");
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(String::from_utf8(it.key().to_vec()).unwrap());
            it.next();
        }
        assert_eq!(seen, vec!["b", "c", "e"]);

        it.seek(b"d");
        assert!(it.valid());
        assert_eq!(it.value(), b"e");
        it.seek(b"f");
        assert!(!it.valid());
    }

    #[test]
    fn test_write_batch_applies_all_ops() {
        let engine = MemEngine::new("/tmp/mem");
        engine.put(b"gone", b"x").unwrap();
        let mut batch = WriteBatch::with_capacity(3);
        batch.put("k1", "v1");
        batch.put("k2", "v2");
        batch.delete("gone");
        assert_eq!(batch.len(), 3);
        engine.write(batch).unwrap();
        assert_eq!(engine.keys(), vec!["k1", "k2"]);
    }

    #[test]
    fn test_stats_and_close() {
        let engine = MemEngine::new("/tmp/mem");
        engine.put(b"a", b"1").unwrap();
        assert_eq!(engine.get_stat("kv.num-entries").as_deref(), Some("1"));
        assert!(engine.get_stat("kv.stats").unwrap().contains("entries: 1"));
        assert_eq!(engine.get_stat("nope"), None);

        engine.close().unwrap();
        assert!(engine.is_closed());
        assert!(engine.get(b"a").is_err());
        assert!(engine.close().is_err());
    }

    #[test]
    fn test_open_engine_factory() {
        assert!(open_engine("memory", "/tmp/x").is_ok());
        assert!(matches!(open_engine("memory", ""), Err(BenchError::Config(_))));
        assert!(matches!(open_engine("rocks", "/tmp/x"), Err(BenchError::Config(_))));
    }
}
