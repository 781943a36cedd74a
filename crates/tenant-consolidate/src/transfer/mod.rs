//! Per-partition transfer engine.
//!
//! Drives one partition through read → existence check → batch
//! accumulation → atomic commit, strictly in sequence, and records every
//! outcome in the run report:
//!
//! - [`reader`]: lazy partition enumeration
//! - [`dedup`]: existence lookups (fail closed)
//! - [`batch`]: bounded batches with provenance stamping
//! - [`commit`]: atomic batch writes with optional retry

pub mod batch;
pub mod commit;
pub mod dedup;
pub mod reader;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{ConflictMode, ConsolidationConfig, DEFAULT_BATCH_LIMIT, DEFAULT_READ_PAGE_SIZE};
use crate::core::traits::PartitionSource;
use crate::drivers::StoreHandle;
use crate::report::{MigrationReport, Phase};

pub use batch::{BatchAccumulator, MigrationBatch};
pub use commit::{BatchCommitter, CommitOutcome, RetryPolicy};
pub use dedup::{DedupChecker, Presence};
pub use reader::PartitionReader;

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Records per atomic write.
    pub batch_limit: usize,

    /// Records fetched per partition page.
    pub read_page_size: usize,

    pub conflict_mode: ConflictMode,

    pub retry: RetryPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_limit: DEFAULT_BATCH_LIMIT,
            read_page_size: DEFAULT_READ_PAGE_SIZE,
            conflict_mode: ConflictMode::default(),
            retry: RetryPolicy::none(),
        }
    }
}

impl From<&ConsolidationConfig> for TransferConfig {
    fn from(config: &ConsolidationConfig) -> Self {
        Self {
            batch_limit: config.get_batch_limit(),
            read_page_size: config.get_read_page_size(),
            conflict_mode: config.conflict_mode,
            retry: RetryPolicy {
                max_retries: config.commit_retries,
                backoff: Duration::from_millis(config.retry_backoff_ms),
            },
        }
    }
}

/// Moves the records of one partition into the unified collection.
pub struct TransferEngine {
    source: Arc<dyn PartitionSource>,
    checker: DedupChecker,
    committer: BatchCommitter,
    config: TransferConfig,
}

impl TransferEngine {
    pub fn new(store: &StoreHandle, config: TransferConfig) -> Self {
        Self {
            source: store.source.clone(),
            checker: DedupChecker::new(store.unified.clone()),
            committer: BatchCommitter::new(store.unified.clone(), config.conflict_mode, config.retry),
            config,
        }
    }

    /// Migrate `partition`, recording every outcome in `report`.
    ///
    /// Never fails: a partition that cannot be read is recorded and
    /// abandoned, per-record and per-batch failures are counted as errored.
    pub async fn migrate_partition(&self, partition: &str, report: &mut MigrationReport) {
        let start = Instant::now();
        report.begin_partition(partition);
        report.set_phase(Phase::Reading);

        let mut reader =
            match PartitionReader::open(self.source.as_ref(), partition, self.config.read_page_size)
                .await
            {
                Ok(reader) => reader,
                Err(e) => {
                    error!("{}: partition skipped: {}", partition, e);
                    report.record_partition_failure(partition, e.to_string());
                    return;
                }
            };

        let mut accumulator = BatchAccumulator::new(partition, self.config.batch_limit);

        loop {
            report.set_phase(Phase::Reading);
            let Some(item) = reader.next().await else {
                break;
            };
            let raw = match item {
                Ok(raw) => raw,
                Err(e) => {
                    error!(
                        "{}: enumeration aborted after {} records: {}",
                        partition,
                        reader.records_read(),
                        e
                    );
                    report.record_partition_failure(partition, e.to_string());
                    break;
                }
            };
            report.record_read(partition);

            if accumulator.contains(&raw.key) {
                warn!("{}: key {} repeated in partition, keeping first", partition, raw.key);
                report.record_source_duplicate(partition);
                continue;
            }

            if self.config.conflict_mode == ConflictMode::CheckThenInsert {
                report.set_phase(Phase::Deduping);
                match self.checker.check(partition, &raw.key).await {
                    Ok(Presence::Exists) => {
                        report.record_skipped(partition, 1);
                        continue;
                    }
                    Ok(Presence::Absent) => {}
                    Err(e) => {
                        warn!("{} (record not written)", e);
                        report.record_dedup_failure(partition, &raw.key, e.to_string());
                        continue;
                    }
                }
            }

            report.set_phase(Phase::Accumulating);
            if let Some(batch) = accumulator.push(raw) {
                self.commit(batch, report).await;
            }
        }

        // Records queued before a mid-stream failure are still written
        if let Some(batch) = accumulator.finish() {
            self.commit(batch, report).await;
        }

        if let Some(p) = report.partition(partition) {
            info!(
                "{}: {} read, {} migrated, {} skipped, {} errored in {} batches ({:?})",
                partition,
                p.records_read,
                p.migrated,
                p.skipped,
                p.errored,
                accumulator.batches_formed(),
                start.elapsed()
            );
        }
    }

    async fn commit(&self, mut batch: MigrationBatch, report: &mut MigrationReport) {
        report.set_phase(Phase::Committing);
        debug!(
            "{}: committing batch {} ({} records)",
            batch.partition,
            batch.sequence,
            batch.len()
        );

        match self.committer.commit(&mut batch).await {
            CommitOutcome::Committed {
                written,
                skipped,
                retries,
            } => {
                report.record_batch_committed(&batch.partition, written, skipped, retries);
            }
            CommitOutcome::Failed { error, retries } => {
                warn!("{} ({} records errored)", error, batch.len());
                report.record_batch_failed(
                    &batch.partition,
                    batch.sequence,
                    batch.keys(),
                    retries,
                    error.to_string(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryStore;
    use crate::report::ErrorKind;
    use serde_json::{json, Map, Value};

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn new_report() -> MigrationReport {
        MigrationReport::new(
            "test",
            "memory",
            ConflictMode::CheckThenInsert,
            DEFAULT_BATCH_LIMIT,
            &["instance1".to_string()],
        )
    }

    async fn seeded(count: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..count {
            store
                .insert_source("instance1", &format!("u{i:04}"), doc(json!({"n": i})))
                .await;
        }
        store
    }

    fn engine(store: &Arc<MemoryStore>, config: TransferConfig) -> TransferEngine {
        TransferEngine::new(&StoreHandle::from_shared(store.clone()), config)
    }

    #[tokio::test]
    async fn test_460_records_commit_in_two_batches() {
        let store = seeded(460).await;
        let mut report = new_report();

        engine(&store, TransferConfig::default())
            .migrate_partition("instance1", &mut report)
            .await;

        assert_eq!(store.committed_batches().await, vec![450, 10]);
        let p = report.partition("instance1").unwrap();
        assert_eq!((p.migrated, p.skipped, p.errored), (460, 0, 0));
        assert_eq!(p.batches_committed, 2);
        assert!(p.is_balanced());
    }

    #[tokio::test]
    async fn test_failed_lookup_is_errored_and_not_written() {
        let store = seeded(5).await;
        store.fail_lookup("u0002").await;
        let mut report = new_report();

        engine(&store, TransferConfig::default())
            .migrate_partition("instance1", &mut report)
            .await;

        let p = report.partition("instance1").unwrap();
        assert_eq!((p.migrated, p.skipped, p.errored), (4, 0, 1));
        assert!(store.unified_document("u0002").await.is_none());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, ErrorKind::DedupCheck);
        assert_eq!(report.errors[0].keys, vec!["u0002".to_string()]);
    }

    #[tokio::test]
    async fn test_existing_key_is_never_overwritten() {
        let store = seeded(0).await;
        store.insert_source("instance1", "k", doc(json!({"v": 2}))).await;
        store.seed_unified("k", doc(json!({"v": 1}))).await;
        let mut report = new_report();

        engine(&store, TransferConfig::default())
            .migrate_partition("instance1", &mut report)
            .await;

        assert_eq!(store.unified_document("k").await.unwrap()["v"], 1);
        assert_eq!(report.partition("instance1").unwrap().skipped, 1);
    }

    #[tokio::test]
    async fn test_second_pass_skips_everything() {
        let store = seeded(12).await;
        let config = TransferConfig {
            batch_limit: 5,
            ..TransferConfig::default()
        };

        let mut first = new_report();
        engine(&store, config.clone())
            .migrate_partition("instance1", &mut first)
            .await;
        let mut second = new_report();
        engine(&store, config)
            .migrate_partition("instance1", &mut second)
            .await;

        let p = second.partition("instance1").unwrap();
        assert_eq!((p.migrated, p.skipped, p.errored), (0, 12, 0));
        assert_eq!(store.committed_batches().await, vec![5, 5, 2]);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_later_batches() {
        let store = seeded(7).await;
        store.fail_commit(0, 1).await;
        let mut report = new_report();

        engine(
            &store,
            TransferConfig {
                batch_limit: 3,
                ..TransferConfig::default()
            },
        )
        .migrate_partition("instance1", &mut report)
        .await;

        let p = report.partition("instance1").unwrap();
        assert_eq!((p.migrated, p.errored), (4, 3));
        assert_eq!((p.batches_committed, p.batches_failed), (2, 1));
        assert!(p.is_balanced());
        assert!(store.unified_document("u0000").await.is_none());
        assert_eq!(report.errors[0].keys.len(), 3);
        assert_eq!(report.errors[0].batch, Some(1));
    }

    #[tokio::test]
    async fn test_retry_is_counted() {
        let store = seeded(3).await;
        store.fail_commit(0, 1).await;
        let mut report = new_report();

        engine(
            &store,
            TransferConfig {
                retry: RetryPolicy {
                    max_retries: 2,
                    backoff: Duration::from_millis(1),
                },
                ..TransferConfig::default()
            },
        )
        .migrate_partition("instance1", &mut report)
        .await;

        let p = report.partition("instance1").unwrap();
        assert_eq!((p.migrated, p.errored, p.commit_retries), (3, 0, 1));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_flushes_queued_records() {
        let store = seeded(10).await;
        store.fail_read_after("instance1", 4).await;
        let mut report = new_report();

        engine(&store, TransferConfig::default())
            .migrate_partition("instance1", &mut report)
            .await;

        let p = report.partition("instance1").unwrap();
        assert_eq!(p.records_read, 4);
        assert_eq!(p.migrated, 4);
        assert!(p.read_error.is_some());
        assert!(p.is_balanced());
        assert_eq!(report.errors[0].kind, ErrorKind::PartitionRead);
    }

    #[tokio::test]
    async fn test_unreadable_partition_is_recorded() {
        let store = seeded(0).await;
        let mut report = new_report();

        engine(&store, TransferConfig::default())
            .migrate_partition("instance1", &mut report)
            .await;

        let p = report.partition("instance1").unwrap();
        assert!(p.visited);
        assert_eq!(p.records_read, 0);
        assert!(p.read_error.is_some());
    }

    #[tokio::test]
    async fn test_insert_if_absent_matches_check_then_insert() {
        let check = seeded(8).await;
        check.seed_unified("u0003", Map::new()).await;
        let native = seeded(8).await;
        native.seed_unified("u0003", Map::new()).await;

        let mut check_report = new_report();
        engine(
            &check,
            TransferConfig {
                batch_limit: 3,
                ..TransferConfig::default()
            },
        )
        .migrate_partition("instance1", &mut check_report)
        .await;

        let mut native_report = new_report();
        engine(
            &native,
            TransferConfig {
                batch_limit: 3,
                conflict_mode: ConflictMode::InsertIfAbsent,
                ..TransferConfig::default()
            },
        )
        .migrate_partition("instance1", &mut native_report)
        .await;

        let a = check_report.partition("instance1").unwrap();
        let b = native_report.partition("instance1").unwrap();
        assert_eq!((a.migrated, a.skipped, a.errored), (7, 1, 0));
        assert_eq!((b.migrated, b.skipped, b.errored), (7, 1, 0));
        assert_eq!(native.unified_len().await, 8);
    }

    #[tokio::test]
    async fn test_every_written_record_is_tagged() {
        let store = seeded(3).await;
        let mut report = new_report();

        engine(&store, TransferConfig::default())
            .migrate_partition("instance1", &mut report)
            .await;

        for key in ["u0000", "u0001", "u0002"] {
            let doc = store.unified_document(key).await.unwrap();
            assert_eq!(doc["source_partition"], "instance1");
            assert!(doc["migrated_at"].as_str().is_some());
        }
    }

    #[tokio::test]
    async fn test_phase_returns_to_reading_after_skipped_records() {
        let store = seeded(4).await;
        for i in 0..4 {
            store.seed_unified(&format!("u{i:04}"), Map::new()).await;
        }
        let mut report = new_report();

        engine(&store, TransferConfig::default())
            .migrate_partition("instance1", &mut report)
            .await;

        assert_eq!(report.partition("instance1").unwrap().skipped, 4);
        assert_eq!(report.phase, Phase::Reading);
    }
}
