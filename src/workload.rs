use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use clap::ValueEnum;
use rand::distributions::{Distribution, Uniform};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::Zipf;
use serde::{Deserialize, Serialize};

use crate::client::Record;
use crate::properties::Properties;

const ZIPFIAN_CONSTANT: f64 = 0.99;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadType {
    A, // 50% read, 50% update
    B, // 95% read, 5% update
    C, // 100% read
    D, // 95% read, 5% insert latest
    E, // 95% scan, 5% insert
    F, // 50% read, 50% read-modify-write
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestDistribution {
    Uniform,
    Zipfian,
    /// Skewed towards the most recently inserted keys.
    Latest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Read,
    Update,
    Insert,
    Scan,
    ReadModifyWrite,
}

/// Operation proportions of a workload. They sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperationMix {
    pub read: f64,
    pub update: f64,
    pub insert: f64,
    pub scan: f64,
    pub read_modify_write: f64,
}

impl OperationMix {
    fn new(read: f64, update: f64, insert: f64, scan: f64, read_modify_write: f64) -> Self {
        Self {
            read,
            update,
            insert,
            scan,
            read_modify_write,
        }
    }

    /// Pick an operation given a uniform sample in `[0, 1)`.
    pub fn choose(&self, sample: f64) -> Operation {
        let mut threshold = self.read;
        if sample < threshold {
            return Operation::Read;
        }
        threshold += self.update;
        if sample < threshold {
            return Operation::Update;
        }
        threshold += self.insert;
        if sample < threshold {
            return Operation::Insert;
        }
        threshold += self.scan;
        if sample < threshold {
            return Operation::Scan;
        }
        Operation::ReadModifyWrite
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub workload_type: WorkloadType,
    pub mix: OperationMix,
    pub distribution: RequestDistribution,
}

impl Workload {
    pub fn new(workload_type: WorkloadType) -> Self {
        let (mix, distribution) = match workload_type {
            WorkloadType::A => (
                OperationMix::new(0.5, 0.5, 0.0, 0.0, 0.0),
                RequestDistribution::Zipfian,
            ),
            WorkloadType::B => (
                OperationMix::new(0.95, 0.05, 0.0, 0.0, 0.0),
                RequestDistribution::Zipfian,
            ),
            WorkloadType::C => (
                OperationMix::new(1.0, 0.0, 0.0, 0.0, 0.0),
                RequestDistribution::Zipfian,
            ),
            WorkloadType::D => (
                OperationMix::new(0.95, 0.0, 0.05, 0.0, 0.0),
                RequestDistribution::Latest,
            ),
            WorkloadType::E => (
                OperationMix::new(0.0, 0.0, 0.05, 0.95, 0.0),
                RequestDistribution::Uniform,
            ),
            WorkloadType::F => (
                OperationMix::new(0.5, 0.0, 0.0, 0.0, 0.5),
                RequestDistribution::Zipfian,
            ),
        };
        Self {
            workload_type,
            mix,
            distribution,
        }
    }

    /// Properties describing this workload, so a client can refuse mixes it
    /// does not support.
    pub fn properties(&self) -> Properties {
        [
            ("readproportion", self.mix.read),
            ("updateproportion", self.mix.update),
            ("insertproportion", self.mix.insert),
            ("scanproportion", self.mix.scan),
            ("readmodifywriteproportion", self.mix.read_modify_write),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum LoadPattern {
    Sequential,
    Random,
}

#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub table: String,
    pub record_count: u32,
    pub operation_count: u32,
    pub field_count: u32,
    pub field_length: usize,
    pub max_scan_length: usize,
    pub load_pattern: LoadPattern,
}

pub fn build_key(index: u64) -> String {
    format!("user{}", index)
}

/// Key indices for the load phase in insertion order.
pub fn load_order(record_count: u32, pattern: LoadPattern) -> Vec<u64> {
    let mut indices: Vec<u64> = (0..record_count as u64).collect();
    if let LoadPattern::Random = pattern {
        indices.shuffle(&mut rand::thread_rng());
    }
    indices
}

pub fn field_name(index: u32) -> String {
    format!("field{}", index)
}

/// A full record with `field_count` random alphanumeric fields.
pub fn build_values(field_count: u32, field_length: usize) -> Record {
    (0..field_count)
        .map(|i| (field_name(i), random_string(field_length)))
        .collect()
}

/// A single random field, as written by update operations.
pub fn build_update(field_count: u32, field_length: usize) -> Record {
    let mut values = Record::new();
    if field_count > 0 {
        let field = rand::thread_rng().gen_range(0..field_count);
        values.insert(field_name(field), random_string(field_length));
    }
    values
}

fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..62);
            match idx {
                0..=9 => (b'0' + idx as u8) as char,
                10..=35 => (b'A' + (idx - 10) as u8) as char,
                _ => (b'a' + (idx - 36) as u8) as char,
            }
        })
        .collect()
}

/// Hands out key indices for inserts and tracks which of them are safe to
/// read.
///
/// Inserts finish out of order, so the readable bound only advances over a
/// contiguous run of acknowledged indices.
pub struct KeySequence {
    next: AtomicU64,
    acknowledged: AtomicU64,
    pending: Mutex<BTreeSet<u64>>,
}

impl KeySequence {
    /// Indices below `start` are treated as already inserted.
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            acknowledged: AtomicU64::new(start),
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    /// Claim the next index for an insert.
    pub fn reserve(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Mark a reserved index as finished, whatever the insert's outcome.
    pub fn acknowledge(&self, index: u64) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.insert(index);
        let mut limit = self.acknowledged.load(Ordering::Acquire);
        while pending.remove(&limit) {
            limit += 1;
        }
        self.acknowledged.store(limit, Ordering::Release);
    }

    /// Every index below this bound has finished inserting.
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::Acquire)
    }

    /// Number of indices handed out so far, finished or not.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Picks key indices out of `[0, record_count)` following a request
/// distribution.
pub struct KeyChooser {
    distribution: RequestDistribution,
    zipf: Option<Zipf<f64>>,
}

impl KeyChooser {
    pub fn new(distribution: RequestDistribution, record_count: u32) -> anyhow::Result<Self> {
        let zipf = match distribution {
            RequestDistribution::Uniform => None,
            RequestDistribution::Zipfian | RequestDistribution::Latest => Some(
                Zipf::new(record_count.max(1) as u64, ZIPFIAN_CONSTANT)
                    .map_err(|e| anyhow::anyhow!("invalid zipfian parameters: {:?}", e))?,
            ),
        };
        Ok(Self { distribution, zipf })
    }

    /// `key_count` is the number of keys inserted so far; it grows during
    /// workloads with inserts.
    pub fn next<R: Rng + ?Sized>(&self, rng: &mut R, key_count: u64) -> u64 {
        if key_count == 0 {
            return 0;
        }
        match (&self.distribution, &self.zipf) {
            (RequestDistribution::Zipfian, Some(zipf)) => {
                // Zipf samples lie in [1, n]
                let rank = zipf.sample(rng) as u64 - 1;
                rank % key_count
            }
            (RequestDistribution::Latest, Some(zipf)) => {
                let rank = zipf.sample(rng) as u64 - 1;
                key_count - 1 - (rank % key_count)
            }
            _ => Uniform::new(0, key_count).sample(rng),
        }
    }
}
