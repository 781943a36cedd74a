//! Existence checks against the unified collection.

use std::sync::Arc;

use crate::core::traits::UnifiedStore;
use crate::error::{ConsolidateError, Result};

/// Outcome of an existence lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Exists,
    Absent,
}

/// Decides whether a candidate key is already in the unified collection.
///
/// Lookup failures are returned as `DedupCheck` errors with no retry; the
/// caller treats them as "do not write".
#[derive(Clone)]
pub struct DedupChecker {
    store: Arc<dyn UnifiedStore>,
}

impl DedupChecker {
    pub fn new(store: Arc<dyn UnifiedStore>) -> Self {
        Self { store }
    }

    pub async fn check(&self, partition: &str, key: &str) -> Result<Presence> {
        match self.store.exists(key).await {
            Ok(true) => Ok(Presence::Exists),
            Ok(false) => Ok(Presence::Absent),
            Err(e) => Err(ConsolidateError::dedup_check(partition, key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryStore;
    use serde_json::Map;

    #[tokio::test]
    async fn test_check_reports_presence() {
        let store = Arc::new(MemoryStore::new());
        store.seed_unified("u1", Map::new()).await;
        let checker = DedupChecker::new(store);

        assert_eq!(checker.check("instance1", "u1").await.unwrap(), Presence::Exists);
        assert_eq!(checker.check("instance1", "u2").await.unwrap(), Presence::Absent);
    }

    #[tokio::test]
    async fn test_lookup_failure_carries_partition_and_key() {
        let store = Arc::new(MemoryStore::new());
        store.fail_lookup("u3").await;
        let checker = DedupChecker::new(store);

        match checker.check("instance2", "u3").await.unwrap_err() {
            ConsolidateError::DedupCheck { partition, key, .. } => {
                assert_eq!(partition, "instance2");
                assert_eq!(key, "u3");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
