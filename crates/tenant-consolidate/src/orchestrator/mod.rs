//! Consolidation orchestrator - main workflow coordinator.
//!
//! Processes the configured partitions one after another, then runs the
//! verification pass. Only initialization can fail; everything after that
//! ends up in the [`MigrationReport`].

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::record::ProvenanceCounts;
use crate::drivers::{open_store, StoreHandle};
use crate::error::{ConsolidateError, Result};
use crate::report::{MigrationReport, Phase, RunStatus};
use crate::transfer::{TransferConfig, TransferEngine};
use crate::verify::{VerificationTally, Verifier};

/// Consolidation orchestrator.
pub struct Consolidator {
    config: Config,
    store: StoreHandle,
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub store_type: String,
    pub store_connected: bool,
    pub store_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
    pub partitions: Vec<PartitionHealth>,
    pub healthy: bool,
}

/// Whether one configured partition can be enumerated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionHealth {
    pub partition: String,
    pub readable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Consolidator {
    /// Open the configured store and build a consolidator on it.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config).await?;
        Self::with_store(config, store)
    }

    /// Build a consolidator on an already opened store.
    pub fn with_store(config: Config, store: StoreHandle) -> Result<Self> {
        config.validate()?;

        let batch_limit = config.consolidation.get_batch_limit();
        let max = store.unified.max_batch_size();
        if batch_limit > max {
            return Err(ConsolidateError::Config(format!(
                "consolidation.batch_limit {} exceeds the {} store's atomic write limit of {}",
                batch_limit,
                store.unified.db_type(),
                max
            )));
        }

        Ok(Self { config, store })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the consolidation.
    ///
    /// Cancellation is checked between partitions only; the partition in
    /// progress always finishes and verification still runs.
    pub async fn run(&self, cancel: CancellationToken) -> Result<MigrationReport> {
        let consolidation = &self.config.consolidation;
        let mut report = MigrationReport::new(
            self.config.hash(),
            self.store.unified.db_type(),
            consolidation.conflict_mode,
            consolidation.get_batch_limit(),
            &consolidation.partitions,
        );
        let start = Instant::now();

        info!(
            "Starting consolidation run {} ({} partitions into {}, batch limit {}, {})",
            report.run_id,
            consolidation.partitions.len(),
            consolidation.collection,
            report.batch_limit,
            report.conflict_mode
        );

        let verifier = Verifier::new(self.store.unified.clone());
        let baseline = verifier.baseline().await;

        let engine = TransferEngine::new(&self.store, TransferConfig::from(consolidation));
        let total = consolidation.partitions.len();
        let mut cancelled = false;

        for (i, partition) in consolidation.partitions.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    "Cancellation requested, leaving {} of {} partitions unprocessed",
                    total - i,
                    total
                );
                cancelled = true;
                break;
            }
            info!("Partition {}/{}: {}", i + 1, total, partition);
            engine.migrate_partition(partition, &mut report).await;
        }

        report.set_phase(Phase::Verifying);
        info!("Verifying unified collection");
        report.verification = Some(verifier.verify(&baseline, &report.partitions).await);

        report.finish(if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        });

        let totals = report.totals();
        info!(
            "Run {} {}: {} read, {} migrated, {} skipped, {} errored in {:?}",
            report.run_id,
            report.status,
            totals.records_read,
            totals.migrated,
            totals.skipped,
            totals.errored,
            start.elapsed()
        );

        Ok(report)
    }

    /// Current per-partition counts without migrating anything.
    pub async fn verify_only(&self) -> VerificationTally {
        Verifier::new(self.store.unified.clone())
            .snapshot(&self.config.consolidation.partitions)
            .await
    }

    /// Raw provenance counts of the unified collection.
    pub async fn provenance_counts(&self) -> Result<ProvenanceCounts> {
        self.store.unified.count_by_partition().await
    }

    /// Test store connectivity and partition readability.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let start = Instant::now();
        let ping = self.store.unified.ping().await;
        let store_latency_ms = start.elapsed().as_millis() as u64;

        let mut partitions = Vec::with_capacity(self.config.consolidation.partitions.len());
        for partition in &self.config.consolidation.partitions {
            let health = match self.store.source.open_partition(partition, 1).await {
                Ok(_) => PartitionHealth {
                    partition: partition.clone(),
                    readable: true,
                    error: None,
                },
                Err(e) => PartitionHealth {
                    partition: partition.clone(),
                    readable: false,
                    error: Some(e.to_string()),
                },
            };
            partitions.push(health);
        }

        let store_connected = ping.is_ok();
        let healthy = store_connected && partitions.iter().all(|p| p.readable);

        Ok(HealthCheckResult {
            store_type: self.store.unified.db_type().to_string(),
            store_connected,
            store_latency_ms,
            store_error: ping.err().map(|e| e.to_string()),
            partitions,
            healthy,
        })
    }
}
