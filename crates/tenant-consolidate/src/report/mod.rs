//! Run report: per-partition counters, error entries and the verification tally.
//!
//! One [`MigrationReport`] is created at run start and handed by `&mut`
//! through the sequential flow, so no locking is needed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::ConflictMode;
use crate::error::Result;
use crate::verify::VerificationTally;

/// Where the run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Reading,
    Deduping,
    Accumulating,
    Committing,
    Verifying,
    Done,
    Cancelled,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Reading => "reading",
            Phase::Deduping => "deduping",
            Phase::Accumulating => "accumulating",
            Phase::Committing => "committing",
            Phase::Verifying => "verifying",
            Phase::Done => "done",
            Phase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Kind of a recorded per-record, per-batch or per-partition error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PartitionRead,
    DedupCheck,
    BatchCommit,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::PartitionRead => write!(f, "partition_read"),
            ErrorKind::DedupCheck => write!(f, "dedup_check"),
            ErrorKind::BatchCommit => write!(f, "batch_commit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub partition: String,
    pub kind: ErrorKind,
    /// Affected keys; empty for partition-level errors.
    pub keys: Vec<String>,
    /// Batch sequence number for commit failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
    pub message: String,
}

/// Counters for one source partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub partition: String,
    /// Records actually enumerated (S).
    pub records_read: u64,
    pub migrated: u64,
    pub skipped: u64,
    pub errored: u64,
    /// Keys seen more than once in this partition (included in `skipped`).
    pub duplicates_in_source: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub commit_retries: u64,
    /// Why enumeration stopped early, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
    /// False when the run was cancelled before reaching this partition.
    pub visited: bool,
}

impl PartitionReport {
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            ..Self::default()
        }
    }

    /// `migrated + skipped + errored == records_read`.
    pub fn is_balanced(&self) -> bool {
        self.migrated + self.skipped + self.errored == self.records_read
    }
}

/// Global counters across all partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub records_read: u64,
    pub migrated: u64,
    pub skipped: u64,
    pub errored: u64,
}

/// Result of a consolidation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA256 fingerprint of the configuration (password excluded).
    pub config_hash: String,

    pub store_type: String,
    pub conflict_mode: ConflictMode,
    pub batch_limit: usize,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub phase: Phase,

    /// One entry per configured partition, in processing order.
    pub partitions: Vec<PartitionReport>,
    pub errors: Vec<ErrorEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationTally>,
}

impl MigrationReport {
    pub fn new(
        config_hash: impl Into<String>,
        store_type: impl Into<String>,
        conflict_mode: ConflictMode,
        batch_limit: usize,
        partitions: &[String],
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            config_hash: config_hash.into(),
            store_type: store_type.into(),
            conflict_mode,
            batch_limit,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            phase: Phase::Idle,
            partitions: partitions.iter().map(PartitionReport::new).collect(),
            errors: Vec::new(),
            verification: None,
        }
    }

    pub fn partition(&self, partition: &str) -> Option<&PartitionReport> {
        self.partitions.iter().find(|p| p.partition == partition)
    }

    /// Counters for `partition`, added on first use if not configured.
    pub fn partition_mut(&mut self, partition: &str) -> &mut PartitionReport {
        let idx = match self.partitions.iter().position(|p| p.partition == partition) {
            Some(idx) => idx,
            None => {
                self.partitions.push(PartitionReport::new(partition));
                self.partitions.len() - 1
            }
        };
        &mut self.partitions[idx]
    }

    pub fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            trace!("Phase: {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    pub fn begin_partition(&mut self, partition: &str) {
        self.partition_mut(partition).visited = true;
    }

    pub fn record_read(&mut self, partition: &str) {
        self.partition_mut(partition).records_read += 1;
    }

    pub fn record_skipped(&mut self, partition: &str, count: u64) {
        self.partition_mut(partition).skipped += count;
    }

    /// A key repeated within one partition stream; counted as skipped.
    pub fn record_source_duplicate(&mut self, partition: &str) {
        let p = self.partition_mut(partition);
        p.skipped += 1;
        p.duplicates_in_source += 1;
    }

    /// A failed existence lookup; the record is errored and never written.
    pub fn record_dedup_failure(&mut self, partition: &str, key: &str, message: impl Into<String>) {
        self.partition_mut(partition).errored += 1;
        self.errors.push(ErrorEntry {
            partition: partition.to_string(),
            kind: ErrorKind::DedupCheck,
            keys: vec![key.to_string()],
            batch: None,
            message: message.into(),
        });
    }

    pub fn record_batch_committed(
        &mut self,
        partition: &str,
        written: u64,
        skipped: u64,
        retries: u32,
    ) {
        let p = self.partition_mut(partition);
        p.migrated += written;
        p.skipped += skipped;
        p.batches_committed += 1;
        p.commit_retries += u64::from(retries);
    }

    /// A batch that never committed; every record in it is errored.
    pub fn record_batch_failed(
        &mut self,
        partition: &str,
        batch: usize,
        keys: Vec<String>,
        retries: u32,
        message: impl Into<String>,
    ) {
        let p = self.partition_mut(partition);
        p.errored += keys.len() as u64;
        p.batches_failed += 1;
        p.commit_retries += u64::from(retries);
        self.errors.push(ErrorEntry {
            partition: partition.to_string(),
            kind: ErrorKind::BatchCommit,
            keys,
            batch: Some(batch),
            message: message.into(),
        });
    }

    /// Enumeration failed, either at open or mid-stream.
    pub fn record_partition_failure(&mut self, partition: &str, message: impl Into<String>) {
        let message = message.into();
        self.partition_mut(partition).read_error = Some(message.clone());
        self.errors.push(ErrorEntry {
            partition: partition.to_string(),
            kind: ErrorKind::PartitionRead,
            keys: Vec::new(),
            batch: None,
            message,
        });
    }

    pub fn totals(&self) -> Totals {
        self.partitions.iter().fold(Totals::default(), |mut t, p| {
            t.records_read += p.records_read;
            t.migrated += p.migrated;
            t.skipped += p.skipped;
            t.errored += p.errored;
            t
        })
    }

    /// Whether every partition satisfies its accounting identity.
    pub fn is_balanced(&self) -> bool {
        self.partitions.iter().all(PartitionReport::is_balanced)
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.set_phase(match status {
            RunStatus::Cancelled => Phase::Cancelled,
            _ => Phase::Done,
        });
    }

    pub fn duration_seconds(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Consolidation run {}", self.run_id)?;
        writeln!(
            f,
            "  status: {}  store: {}  conflict mode: {}  batch limit: {}",
            self.status, self.store_type, self.conflict_mode, self.batch_limit
        )?;
        writeln!(f, "  duration: {:.2}s", self.duration_seconds())?;
        writeln!(f)?;
        writeln!(
            f,
            "  {:<20} {:>10} {:>10} {:>10} {:>10} {:>8}",
            "partition", "read", "migrated", "skipped", "errored", "batches"
        )?;
        for p in &self.partitions {
            let mut line = format!(
                "  {:<20} {:>10} {:>10} {:>10} {:>10} {:>8}",
                p.partition,
                p.records_read,
                p.migrated,
                p.skipped,
                p.errored,
                p.batches_committed + p.batches_failed
            );
            if !p.visited {
                line.push_str("  (not processed)");
            } else if let Some(ref e) = p.read_error {
                line.push_str(&format!("  (read error: {})", e));
            }
            writeln!(f, "{}", line)?;
        }
        let t = self.totals();
        writeln!(
            f,
            "  {:<20} {:>10} {:>10} {:>10} {:>10}",
            "total", t.records_read, t.migrated, t.skipped, t.errored
        )?;

        if !self.errors.is_empty() {
            writeln!(f)?;
            writeln!(f, "Errors ({}):", self.errors.len())?;
            for e in &self.errors {
                let keys = match e.keys.len() {
                    0 => String::new(),
                    1..=5 => format!(" [{}]", e.keys.join(", ")),
                    n => format!(" [{}, ... {} keys]", e.keys[..5].join(", "), n),
                };
                writeln!(f, "  {} {}{}: {}", e.partition, e.kind, keys, e.message)?;
            }
        }

        if let Some(ref v) = self.verification {
            writeln!(f)?;
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}
