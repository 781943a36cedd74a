//! # tenant-consolidate
//!
//! Consolidates user records that were split across tenant-scoped
//! partitions into a single unified collection.
//!
//! Each configured partition is read in key order, every key is checked
//! against the unified collection, absent records are stamped with
//! `source_partition` and `migrated_at` and written in bounded atomic
//! batches. A key that already exists is never overwritten, so a run can
//! be repeated safely. After all partitions a verification pass compares
//! the per-partition tag counts with what the run wrote.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tenant_consolidate::{Config, Consolidator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> tenant_consolidate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let consolidator = Consolidator::new(config).await?;
//!     let report = consolidator.run(CancellationToken::new()).await?;
//!     println!("Migrated {} records", report.totals().migrated);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod transfer;
pub mod verify;

// Re-exports for convenient access
pub use config::{Config, ConflictMode, ConsolidationConfig, StoreConfig, StoreType};
pub use crate::core::{ProvenanceCounts, RawRecord, UnifiedRecord};
pub use drivers::{open_store, MemoryStore, PgStore, StoreHandle};
pub use error::{ConsolidateError, Result};
pub use orchestrator::{Consolidator, HealthCheckResult, PartitionHealth};
pub use report::{MigrationReport, PartitionReport, Phase, RunStatus};
pub use transfer::{TransferConfig, TransferEngine};
pub use verify::{VerificationTally, Verifier};
