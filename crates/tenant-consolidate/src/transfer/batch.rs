//! Grouping of absent records into bounded write batches.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::core::record::{RawRecord, UnifiedRecord};

/// Pending writes committed together.
#[derive(Debug, Clone)]
pub struct MigrationBatch {
    pub partition: String,
    /// 1-based position within the partition.
    pub sequence: usize,
    pub records: Vec<UnifiedRecord>,
}

impl MigrationBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key.clone()).collect()
    }

    /// Set `migrated_at` on every record to the actual write time.
    pub fn restamp(&mut self, at: DateTime<Utc>) {
        for record in &mut self.records {
            record.migrated_at = at;
        }
    }
}

/// Builds batches of at most `limit` records for one partition.
///
/// Remembers every key it has queued for the partition so a key repeated
/// in the source stream is never written twice.
#[derive(Debug)]
pub struct BatchAccumulator {
    partition: String,
    limit: usize,
    current: Vec<UnifiedRecord>,
    queued_keys: HashSet<String>,
    next_sequence: usize,
}

impl BatchAccumulator {
    pub fn new(partition: impl Into<String>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            partition: partition.into(),
            limit,
            current: Vec::with_capacity(limit),
            queued_keys: HashSet::new(),
            next_sequence: 1,
        }
    }

    /// Whether `key` was already queued in this partition.
    pub fn contains(&self, key: &str) -> bool {
        self.queued_keys.contains(key)
    }

    /// Stamp provenance on `raw` and queue it.
    ///
    /// Returns the full batch once it reaches the limit.
    pub fn push(&mut self, raw: RawRecord) -> Option<MigrationBatch> {
        self.queued_keys.insert(raw.key.clone());
        self.current
            .push(UnifiedRecord::stamp(raw, &self.partition, Utc::now()));

        if self.current.len() >= self.limit {
            self.take()
        } else {
            None
        }
    }

    /// Flush whatever is pending at the end of the stream.
    pub fn finish(&mut self) -> Option<MigrationBatch> {
        self.take()
    }

    /// Batches handed out so far.
    pub fn batches_formed(&self) -> usize {
        self.next_sequence - 1
    }

    fn take(&mut self) -> Option<MigrationBatch> {
        if self.current.is_empty() {
            return None;
        }
        let records = std::mem::replace(&mut self.current, Vec::with_capacity(self.limit));
        let batch = MigrationBatch {
            partition: self.partition.clone(),
            sequence: self.next_sequence,
            records,
        };
        self.next_sequence += 1;
        Some(batch)
    }
}
