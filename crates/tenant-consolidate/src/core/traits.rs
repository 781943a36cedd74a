//! Store contract used by the consolidation engine.
//!
//! - [`PartitionSource`]: enumerates the records of one source partition
//! - [`UnifiedStore`]: existence lookups, bounded atomic writes and the
//!   provenance scan over the unified collection
//!
//! One concrete store usually implements both; the engine only sees the
//! traits, so tests run against the in-memory store.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

use super::record::{ProvenanceCounts, RawRecord, UnifiedRecord};

/// Receiving end of a partition enumeration.
///
/// Yields records in key order. A mid-stream failure arrives as a single
/// `Err` item, after which the channel closes.
pub type RecordReceiver = mpsc::Receiver<Result<RawRecord>>;

/// Enumerate source partitions.
#[async_trait]
pub trait PartitionSource: Send + Sync {
    /// Start enumerating `partition`.
    ///
    /// Returns `Err` only when the partition cannot be enumerated at all
    /// (missing, unreachable). Records are then pulled lazily from the
    /// receiver, at most `page_size` at a time.
    async fn open_partition(&self, partition: &str, page_size: usize) -> Result<RecordReceiver>;

    /// Store type identifier (e.g. "postgres", "memory").
    fn db_type(&self) -> &str;
}

/// The unified destination collection.
#[async_trait]
pub trait UnifiedStore: Send + Sync {
    /// Whether `key` already exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Write every record in one all-or-nothing operation.
    ///
    /// Fails without writing anything if any key already exists or the batch
    /// exceeds [`max_batch_size`](Self::max_batch_size).
    async fn commit_batch(&self, records: &[UnifiedRecord]) -> Result<u64>;

    /// Atomically insert the records whose keys are absent, leaving existing
    /// keys untouched. Returns how many were inserted.
    async fn insert_if_absent(&self, records: &[UnifiedRecord]) -> Result<u64>;

    /// Count unified records grouped by `source_partition`.
    async fn count_by_partition(&self) -> Result<ProvenanceCounts>;

    /// Largest batch accepted by a single atomic write.
    fn max_batch_size(&self) -> usize;

    /// Cheap round trip to confirm the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Store type identifier (e.g. "postgres", "memory").
    fn db_type(&self) -> &str;
}
