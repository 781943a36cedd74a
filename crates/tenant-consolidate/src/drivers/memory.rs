//! In-process store for rehearsals and tests.
//!
//! Holds partitions and the unified collection in ordered maps behind an
//! async mutex. Every atomic write takes the lock once, so a batch is either
//! fully visible or not at all. Fault hooks let tests make individual
//! lookups, commits, partition reads and scans fail.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::config::MAX_ATOMIC_WRITE;
use crate::core::record::{ProvenanceCounts, RawRecord, UnifiedRecord, SOURCE_PARTITION_FIELD};
use crate::core::traits::{PartitionSource, RecordReceiver, UnifiedStore};
use crate::error::{ConsolidateError, Result};

type Document = Map<String, Value>;

/// Seed data for a memory store.
///
/// ```json
/// {
///   "partitions": { "instance1": { "u1": { "name": "Ada" } } },
///   "unified": { "u9": { "name": "Lin", "source_partition": "instance2" } }
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct MemoryFixture {
    #[serde(default)]
    pub partitions: BTreeMap<String, BTreeMap<String, Document>>,
    #[serde(default)]
    pub unified: BTreeMap<String, Document>,
}

#[derive(Debug, Default)]
struct Faults {
    unreadable_partitions: HashSet<String>,
    read_fails_after: HashMap<String, usize>,
    failing_lookups: HashSet<String>,
    /// Commit call indices (0-based, every attempt counts) that fail
    failing_commits: HashSet<usize>,
    scans_fail: bool,
}

#[derive(Debug, Default)]
struct Inner {
    partitions: BTreeMap<String, BTreeMap<String, Document>>,
    unified: BTreeMap<String, Document>,
    faults: Faults,
    commit_calls: usize,
    committed_batches: Vec<usize>,
}

/// In-memory implementation of both store traits.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    max_batch_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_batch_size: MAX_ATOMIC_WRITE,
        }
    }

    /// Lower the atomic write ceiling (for exercising limit checks).
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    pub fn from_fixture(fixture: MemoryFixture) -> Self {
        Self {
            inner: Mutex::new(Inner {
                partitions: fixture.partitions,
                unified: fixture.unified,
                ..Inner::default()
            }),
            max_batch_size: MAX_ATOMIC_WRITE,
        }
    }

    /// Load a JSON fixture file.
    pub fn from_fixture_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let fixture: MemoryFixture = serde_json::from_str(&content)?;
        Ok(Self::from_fixture(fixture))
    }

    /// Add a record to a source partition, creating the partition if needed.
    pub async fn insert_source(&self, partition: &str, key: &str, fields: Document) {
        let mut inner = self.inner.lock().await;
        inner
            .partitions
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), fields);
    }

    /// Create an empty partition.
    pub async fn create_partition(&self, partition: &str) {
        let mut inner = self.inner.lock().await;
        inner.partitions.entry(partition.to_string()).or_default();
    }

    /// Put a document straight into the unified collection.
    pub async fn seed_unified(&self, key: &str, document: Document) {
        let mut inner = self.inner.lock().await;
        inner.unified.insert(key.to_string(), document);
    }

    /// Current unified document for `key`.
    pub async fn unified_document(&self, key: &str) -> Option<Document> {
        self.inner.lock().await.unified.get(key).cloned()
    }

    pub async fn unified_len(&self) -> usize {
        self.inner.lock().await.unified.len()
    }

    /// Sizes of successfully committed batches, in commit order.
    pub async fn committed_batches(&self) -> Vec<usize> {
        self.inner.lock().await.committed_batches.clone()
    }

    /// Make `open_partition` fail for `partition`.
    pub async fn fail_partition(&self, partition: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .faults
            .unreadable_partitions
            .insert(partition.to_string());
    }

    /// Make enumeration of `partition` break after `records` records.
    pub async fn fail_read_after(&self, partition: &str, records: usize) {
        let mut inner = self.inner.lock().await;
        inner
            .faults
            .read_fails_after
            .insert(partition.to_string(), records);
    }

    /// Make the existence lookup for `key` fail.
    pub async fn fail_lookup(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        inner.faults.failing_lookups.insert(key.to_string());
    }

    /// Make `times` consecutive commit calls fail, starting at call index
    /// `call` (0-based, every attempt counts).
    pub async fn fail_commit(&self, call: usize, times: usize) {
        let mut inner = self.inner.lock().await;
        inner.faults.failing_commits.extend(call..call + times);
    }

    /// Make provenance scans fail.
    pub async fn fail_scans(&self, fail: bool) {
        self.inner.lock().await.faults.scans_fail = fail;
    }

    fn check_size(&self, records: &[UnifiedRecord]) -> Result<()> {
        if records.len() > self.max_batch_size {
            return Err(ConsolidateError::BatchTooLarge {
                size: records.len(),
                limit: self.max_batch_size,
            });
        }
        Ok(())
    }
}

impl Inner {
    /// Consume one injected commit failure for the current call, if any.
    fn take_commit_fault(&mut self) -> Result<()> {
        let call = self.commit_calls;
        self.commit_calls += 1;

        if self.faults.failing_commits.remove(&call) {
            return Err(ConsolidateError::Unavailable(format!(
                "injected commit failure on call {}",
                call
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PartitionSource for MemoryStore {
    async fn open_partition(&self, partition: &str, page_size: usize) -> Result<RecordReceiver> {
        let inner = self.inner.lock().await;

        if inner.faults.unreadable_partitions.contains(partition) {
            return Err(ConsolidateError::partition_read(
                partition,
                "partition is unreadable",
            ));
        }
        let records = inner.partitions.get(partition).ok_or_else(|| {
            ConsolidateError::partition_read(partition, "partition does not exist")
        })?;
        let fail_after = inner.faults.read_fails_after.get(partition).copied();

        // Whole partition fits the channel, so no feeder task is needed
        let (tx, rx) = mpsc::channel(records.len().max(page_size).max(1) + 1);
        for (index, (key, fields)) in records.iter().enumerate() {
            if fail_after == Some(index) {
                let _ = tx.try_send(Err(ConsolidateError::partition_read(
                    partition,
                    format!("enumeration interrupted after {} records", index),
                )));
                break;
            }
            let _ = tx.try_send(Ok(RawRecord::new(key.clone(), fields.clone())));
        }

        debug!("Opened memory partition {} ({} records)", partition, records.len());
        Ok(rx)
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl UnifiedStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        if inner.faults.failing_lookups.contains(key) {
            return Err(ConsolidateError::Unavailable(format!(
                "injected lookup failure for {}",
                key
            )));
        }
        Ok(inner.unified.contains_key(key))
    }

    async fn commit_batch(&self, records: &[UnifiedRecord]) -> Result<u64> {
        self.check_size(records)?;
        let mut inner = self.inner.lock().await;
        inner.take_commit_fault()?;

        let mut batch_keys = HashSet::with_capacity(records.len());
        for record in records {
            if inner.unified.contains_key(&record.key) || !batch_keys.insert(record.key.as_str()) {
                return Err(ConsolidateError::DuplicateKey(record.key.clone()));
            }
        }

        for record in records {
            if let Value::Object(doc) = record.document() {
                inner.unified.insert(record.key.clone(), doc);
            }
        }
        inner.committed_batches.push(records.len());
        Ok(records.len() as u64)
    }

    async fn insert_if_absent(&self, records: &[UnifiedRecord]) -> Result<u64> {
        self.check_size(records)?;
        let mut inner = self.inner.lock().await;
        inner.take_commit_fault()?;

        let mut inserted = 0u64;
        for record in records {
            if inner.unified.contains_key(&record.key) {
                continue;
            }
            if let Value::Object(doc) = record.document() {
                inner.unified.insert(record.key.clone(), doc);
                inserted += 1;
            }
        }
        inner.committed_batches.push(records.len());
        Ok(inserted)
    }

    async fn count_by_partition(&self) -> Result<ProvenanceCounts> {
        let inner = self.inner.lock().await;
        if inner.faults.scans_fail {
            return Err(ConsolidateError::Unavailable(
                "injected scan failure".to_string(),
            ));
        }

        let mut counts = ProvenanceCounts::default();
        for doc in inner.unified.values() {
            counts.add(doc.get(SOURCE_PARTITION_FIELD).and_then(Value::as_str), 1);
        }
        Ok(counts)
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}
