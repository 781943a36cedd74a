//! Atomic batch commits with optional bounded retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::ConflictMode;
use crate::core::traits::UnifiedStore;
use crate::error::ConsolidateError;

use super::batch::MigrationBatch;

/// How often and how patiently a failed commit is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `n × backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Result of committing one batch.
#[derive(Debug)]
pub enum CommitOutcome {
    Committed {
        written: u64,
        /// Records the store declined because their key already existed.
        skipped: u64,
        retries: u32,
    },
    Failed {
        error: ConsolidateError,
        retries: u32,
    },
}

/// Writes batches to the unified collection.
pub struct BatchCommitter {
    store: Arc<dyn UnifiedStore>,
    mode: ConflictMode,
    retry: RetryPolicy,
}

impl BatchCommitter {
    pub fn new(store: Arc<dyn UnifiedStore>, mode: ConflictMode, retry: RetryPolicy) -> Self {
        Self { store, mode, retry }
    }

    /// Commit `batch` as one atomic write.
    ///
    /// `migrated_at` is re-stamped right before every attempt. Never
    /// interrupted once started.
    pub async fn commit(&self, batch: &mut MigrationBatch) -> CommitOutcome {
        let mut retries = 0;
        loop {
            batch.restamp(Utc::now());
            let attempt = match self.mode {
                ConflictMode::CheckThenInsert => self.store.commit_batch(&batch.records).await,
                ConflictMode::InsertIfAbsent => self.store.insert_if_absent(&batch.records).await,
            };

            match attempt {
                Ok(written) => {
                    let skipped = (batch.len() as u64).saturating_sub(written);
                    debug!(
                        "{}: batch {} committed ({} written, {} skipped, {} retries)",
                        batch.partition, batch.sequence, written, skipped, retries
                    );
                    return CommitOutcome::Committed {
                        written,
                        skipped,
                        retries,
                    };
                }
                Err(e) if is_retryable(&e) && retries < self.retry.max_retries => {
                    retries += 1;
                    warn!(
                        "{}: batch {} commit failed, retry {}/{}: {}",
                        batch.partition, batch.sequence, retries, self.retry.max_retries, e
                    );
                    tokio::time::sleep(self.retry.delay(retries)).await;
                }
                Err(e) => {
                    return CommitOutcome::Failed {
                        error: ConsolidateError::batch_commit(&batch.partition, batch.sequence, e),
                        retries,
                    };
                }
            }
        }
    }
}

/// Size and key violations fail the same way on every attempt.
fn is_retryable(e: &ConsolidateError) -> bool {
    !matches!(
        e,
        ConsolidateError::BatchTooLarge { .. } | ConsolidateError::DuplicateKey(_)
    )
}
