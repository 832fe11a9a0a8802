// src/workload.rs
//
// Operation generation. The client runner asks a `WorkloadGenerator` for the
// next operation; `CoreWorkload` is the YCSB-style implementation driven by
// the workload properties (operation mix, key distribution, field shape).

use rand::distr::weighted::WeightedIndex;
use rand::distr::Alphanumeric;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, Zipf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::codec::Field;
use crate::config::{BenchConfig, InsertOrder, RequestDistribution, WorkloadConfig};
use crate::constants::{KEY_PREFIX, ZIPFIAN_CONSTANT};
use crate::error::{BenchError, BenchResult};
use crate::metrics::OperationKind;
use crate::phase::Phase;

const FNV_OFFSET_BASIS_64: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME_64: u64 = 1_099_511_628_211;

/// FNV-1a over the eight little-endian octets of `n`
pub fn fnv1a_64(n: u64) -> u64 {
    n.to_le_bytes()
        .iter()
        .fold(FNV_OFFSET_BASIS_64, |hash, octet| (hash ^ *octet as u64).wrapping_mul(FNV_PRIME_64))
}

/// One unit of work for a client runner.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub key: String,
    /// Values written by Insert / Update / ReadModifyWrite
    pub values: Vec<Field>,
    /// Fields to read; `None` reads the whole record
    pub filter: Option<Vec<String>>,
    /// Rows requested by Scan
    pub scan_len: usize,
}

impl Operation {
    pub fn new(kind: OperationKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            values: Vec::new(),
            filter: None,
            scan_len: 0,
        }
    }

    pub fn with_values(mut self, values: Vec<Field>) -> Self {
        self.values = values;
        self
    }

    pub fn with_filter(mut self, filter: Option<Vec<String>>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_scan_len(mut self, len: usize) -> Self {
        self.scan_len = len;
        self
    }
}

/// Supplies operations to every worker of a phase. Shared across threads,
/// so per-call randomness comes from the caller's generator.
pub trait WorkloadGenerator: Send + Sync {
    fn next_operation(&self, phase: Phase, rng: &mut dyn RngCore) -> Operation;
}

pub struct CoreWorkload {
    cfg: WorkloadConfig,
    field_names: Vec<String>,
    field_length: usize,
    /// Run-phase kinds with their sampling weights; `None` if no kind is weighted
    chooser: Option<(Vec<OperationKind>, WeightedIndex<f64>)>,
    zipf: Option<Zipf<f64>>,
    /// Next key number handed out by the load phase
    load_cursor: AtomicU64,
    /// Key numbers below this have been handed out for insertion
    key_space: AtomicU64,
}

impl CoreWorkload {
    pub fn new(cfg: &BenchConfig) -> BenchResult<Self> {
        let w = cfg.workload.clone();
        let weighted: Vec<(OperationKind, f64)> = [
            (OperationKind::Read, w.read_proportion),
            (OperationKind::Update, w.update_proportion),
            (OperationKind::Insert, w.insert_proportion),
            (OperationKind::Scan, w.scan_proportion),
            (OperationKind::ReadModifyWrite, w.read_modify_write_proportion),
        ]
        .into_iter()
        .filter(|(_, p)| *p > 0.0)
        .collect();

        let chooser = if weighted.is_empty() {
            None
        } else {
            let index = WeightedIndex::new(weighted.iter().map(|(_, p)| *p))
                .map_err(|e| BenchError::config(format!("operation proportions: {}", e)))?;
            Some((weighted.iter().map(|(k, _)| *k).collect(), index))
        };

        let zipf = match w.request_distribution {
            RequestDistribution::Zipfian if cfg.record_count > 0 => Some(
                Zipf::new(cfg.record_count as f64, ZIPFIAN_CONSTANT)
                    .map_err(|e| BenchError::config(format!("zipfian distribution: {}", e)))?,
            ),
            _ => None,
        };
        debug!(
            "CoreWorkload: {} fields x {}B, distribution={:?}, insert order={:?}",
            cfg.field_count, cfg.field_length, w.request_distribution, w.insert_order
        );

        Ok(Self {
            field_names: (0..cfg.field_count)
                .map(|i| format!("{}{}", cfg.field_prefix, i))
                .collect(),
            field_length: cfg.field_length,
            cfg: w,
            chooser,
            zipf,
            load_cursor: AtomicU64::new(0),
            key_space: AtomicU64::new(cfg.record_count),
        })
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Row key for key number `n`
    pub fn key_name(&self, n: u64) -> String {
        let n = match self.cfg.insert_order {
            InsertOrder::Hashed => fnv1a_64(n),
            InsertOrder::Ordered => n,
        };
        format!("{}{}", KEY_PREFIX, n)
    }

    fn random_value(&self, rng: &mut dyn RngCore) -> Vec<u8> {
        (0..self.field_length).map(|_| rng.sample(Alphanumeric)).collect()
    }

    fn all_values(&self, rng: &mut dyn RngCore) -> Vec<Field> {
        self.field_names
            .iter()
            .map(|name| Field::new(name.clone(), self.random_value(rng)))
            .collect()
    }

    fn update_values(&self, rng: &mut dyn RngCore) -> Vec<Field> {
        if self.cfg.write_all_fields {
            self.all_values(rng)
        } else {
            let name = &self.field_names[rng.random_range(0..self.field_names.len())];
            vec![Field::new(name.clone(), self.random_value(rng))]
        }
    }

    fn read_filter(&self, rng: &mut dyn RngCore) -> Option<Vec<String>> {
        if self.cfg.read_all_fields {
            None
        } else {
            let name = &self.field_names[rng.random_range(0..self.field_names.len())];
            Some(vec![name.clone()])
        }
    }

    /// Key number of an existing record
    fn existing_key(&self, rng: &mut dyn RngCore) -> u64 {
        let space = self.key_space.load(Ordering::Relaxed).max(1);
        match &self.zipf {
            Some(zipf) => (zipf.sample(rng) as u64).saturating_sub(1).min(space - 1),
            None => rng.random_range(0..space),
        }
    }

    fn choose_kind(&self, rng: &mut dyn RngCore) -> OperationKind {
        match &self.chooser {
            Some((kinds, index)) => kinds[index.sample(rng)],
            None => OperationKind::Read,
        }
    }
}

impl WorkloadGenerator for CoreWorkload {
    fn next_operation(&self, phase: Phase, rng: &mut dyn RngCore) -> Operation {
        if phase == Phase::Load {
            let n = self.load_cursor.fetch_add(1, Ordering::Relaxed);
            return Operation::new(OperationKind::Insert, self.key_name(n)).with_values(self.all_values(rng));
        }

        match self.choose_kind(rng) {
            OperationKind::Insert => {
                let n = self.key_space.fetch_add(1, Ordering::Relaxed);
                Operation::new(OperationKind::Insert, self.key_name(n)).with_values(self.all_values(rng))
            }
            OperationKind::Read => {
                let key = self.key_name(self.existing_key(rng));
                Operation::new(OperationKind::Read, key).with_filter(self.read_filter(rng))
            }
            OperationKind::Update => {
                let key = self.key_name(self.existing_key(rng));
                Operation::new(OperationKind::Update, key).with_values(self.update_values(rng))
            }
            OperationKind::Scan => {
                let key = self.key_name(self.existing_key(rng));
                let len = rng.random_range(1..=self.cfg.max_scan_length);
                Operation::new(OperationKind::Scan, key)
                    .with_filter(self.read_filter(rng))
                    .with_scan_len(len)
            }
            OperationKind::ReadModifyWrite => {
                let key = self.key_name(self.existing_key(rng));
                Operation::new(OperationKind::ReadModifyWrite, key)
                    .with_filter(self.read_filter(rng))
                    .with_values(self.update_values(rng))
            }
        }
    }
}
