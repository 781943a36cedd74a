//! Post-run verification of the unified collection.
//!
//! A baseline `count_by_partition` scan is taken before any partition is
//! migrated. After the run the scan is repeated and, for every configured
//! partition, the number of records tagged with it is compared against
//! `pre-existing + migrated`. Mismatches are warnings only.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::record::ProvenanceCounts;
use crate::core::traits::UnifiedStore;
use crate::report::PartitionReport;

/// Provenance counts captured before the run.
#[derive(Debug, Clone)]
pub enum Baseline {
    Captured(ProvenanceCounts),
    Unavailable(String),
}

/// Comparison for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTally {
    pub partition: String,
    /// Records tagged with this partition before the run.
    pub pre_existing: Option<u64>,
    pub migrated: u64,
    /// `pre_existing + migrated`, when a baseline exists.
    pub expected: Option<u64>,
    /// Records tagged with this partition now.
    pub actual: u64,
}

impl PartitionTally {
    pub fn matches(&self) -> bool {
        self.expected.map_or(true, |expected| expected == self.actual)
    }
}

/// Outcome of the verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationTally {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub partitions: Vec<PartitionTally>,
    /// Unified records without a provenance tag.
    pub untagged: u64,
    /// Tags that are not configured partitions.
    pub other_tags: BTreeMap<String, u64>,
    pub warnings: Vec<String>,
}

impl VerificationTally {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            available: false,
            warnings: vec![format!("verification unavailable: {}", reason)],
            reason: Some(reason),
            ..Self::default()
        }
    }

    pub fn partition(&self, partition: &str) -> Option<&PartitionTally> {
        self.partitions.iter().find(|p| p.partition == partition)
    }

    pub fn has_mismatches(&self) -> bool {
        self.partitions.iter().any(|p| !p.matches())
    }

    /// Compare current counts with the baseline and the run's counters.
    pub fn compare(
        baseline: Option<&ProvenanceCounts>,
        current: &ProvenanceCounts,
        partitions: &[PartitionReport],
    ) -> Self {
        let mut tally = Self {
            available: true,
            untagged: current.untagged,
            ..Self::default()
        };

        for p in partitions {
            let pre_existing = baseline.map(|b| b.get(&p.partition));
            let entry = PartitionTally {
                partition: p.partition.clone(),
                pre_existing,
                migrated: p.migrated,
                expected: pre_existing.map(|pre| pre + p.migrated),
                actual: current.get(&p.partition),
            };
            if !entry.matches() {
                tally.warnings.push(format!(
                    "{}: expected {} records tagged {}, found {}",
                    entry.partition,
                    entry.expected.unwrap_or_default(),
                    entry.partition,
                    entry.actual
                ));
            }
            tally.partitions.push(entry);
        }

        for (tag, count) in &current.tagged {
            if !partitions.iter().any(|p| &p.partition == tag) {
                tally.other_tags.insert(tag.clone(), *count);
            }
        }
        tally
    }
}

impl fmt::Display for VerificationTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Verification:")?;
        if !self.available {
            return writeln!(
                f,
                "  unavailable: {}",
                self.reason.as_deref().unwrap_or("unknown")
            );
        }
        for p in &self.partitions {
            let expected = p
                .expected
                .map_or_else(|| "-".to_string(), |e| e.to_string());
            writeln!(
                f,
                "  {:<20} expected {:>10}  found {:>10}  {}",
                p.partition,
                expected,
                p.actual,
                if p.matches() { "ok" } else { "MISMATCH" }
            )?;
        }
        if self.untagged > 0 {
            writeln!(f, "  untagged records: {}", self.untagged)?;
        }
        for (tag, count) in &self.other_tags {
            writeln!(f, "  other tag {}: {}", tag, count)?;
        }
        for w in &self.warnings {
            writeln!(f, "  warning: {}", w)?;
        }
        Ok(())
    }
}

/// Runs provenance scans against the unified collection.
#[derive(Clone)]
pub struct Verifier {
    store: Arc<dyn UnifiedStore>,
}

impl Verifier {
    pub fn new(store: Arc<dyn UnifiedStore>) -> Self {
        Self { store }
    }

    /// Scan taken before any writes.
    pub async fn baseline(&self) -> Baseline {
        match self.store.count_by_partition().await {
            Ok(counts) => {
                info!(
                    "Baseline: {} unified records ({} untagged)",
                    counts.total(),
                    counts.untagged
                );
                Baseline::Captured(counts)
            }
            Err(e) => {
                warn!("Baseline provenance scan failed: {}", e);
                Baseline::Unavailable(format!("baseline scan failed: {}", e))
            }
        }
    }

    /// Re-scan and compare. Never fails; problems become warnings.
    pub async fn verify(&self, baseline: &Baseline, partitions: &[PartitionReport]) -> VerificationTally {
        let baseline = match baseline {
            Baseline::Captured(counts) => counts,
            Baseline::Unavailable(reason) => return VerificationTally::unavailable(reason.clone()),
        };

        let tally = match self.store.count_by_partition().await {
            Ok(current) => VerificationTally::compare(Some(baseline), &current, partitions),
            Err(e) => {
                warn!("Verification scan failed: {}", e);
                return VerificationTally::unavailable(format!("verification scan failed: {}", e));
            }
        };

        for w in &tally.warnings {
            warn!("Verification mismatch: {}", w);
        }
        if !tally.has_mismatches() {
            info!("Verification passed for {} partitions", tally.partitions.len());
        }
        tally
    }

    /// Current counts per partition without a baseline comparison.
    pub async fn snapshot(&self, partitions: &[String]) -> VerificationTally {
        let reports: Vec<PartitionReport> = partitions.iter().map(PartitionReport::new).collect();
        match self.store.count_by_partition().await {
            Ok(current) => VerificationTally::compare(None, &current, &reports),
            Err(e) => {
                warn!("Provenance scan failed: {}", e);
                VerificationTally::unavailable(format!("scan failed: {}", e))
            }
        }
    }
}
