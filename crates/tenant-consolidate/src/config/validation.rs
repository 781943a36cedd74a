//! Configuration validation.

use super::{Config, StoreType, MAX_ATOMIC_WRITE};
use crate::error::{ConsolidateError, Result};
use std::collections::HashSet;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let store = &config.store;
    let consolidation = &config.consolidation;

    // Credentials are only needed for a networked store
    if store.r#type == StoreType::Postgres {
        if store.host.is_empty() {
            return Err(ConsolidateError::Config("store.host is required".into()));
        }
        if store.database.is_empty() {
            return Err(ConsolidateError::Config("store.database is required".into()));
        }
        if store.user.is_empty() {
            return Err(ConsolidateError::Config("store.user is required".into()));
        }
        if store.password.is_empty() {
            return Err(ConsolidateError::Config(
                "store.password is required (set it directly or via ${VAR})".into(),
            ));
        }
        if let Some(0) = store.max_connections {
            return Err(ConsolidateError::Config(
                "store.max_connections must be at least 1".into(),
            ));
        }
    }
    check_identifier("store.unified_schema", &store.unified_schema)?;

    if consolidation.partitions.is_empty() {
        return Err(ConsolidateError::Config(
            "consolidation.partitions must list at least one partition".into(),
        ));
    }
    let mut seen = HashSet::new();
    for partition in &consolidation.partitions {
        check_identifier("consolidation.partitions", partition)?;
        if !seen.insert(partition.as_str()) {
            return Err(ConsolidateError::Config(format!(
                "partition '{}' is listed more than once",
                partition
            )));
        }
        // Would read the unified collection as if it were a source partition
        if partition == &store.unified_schema {
            return Err(ConsolidateError::Config(format!(
                "partition '{}' is the unified schema itself",
                partition
            )));
        }
    }
    check_identifier("consolidation.collection", &consolidation.collection)?;

    let batch_limit = consolidation.get_batch_limit();
    if batch_limit == 0 {
        return Err(ConsolidateError::Config(
            "consolidation.batch_limit must be at least 1".into(),
        ));
    }
    if batch_limit > MAX_ATOMIC_WRITE {
        return Err(ConsolidateError::Config(format!(
            "consolidation.batch_limit {} exceeds the atomic write maximum of {}",
            batch_limit, MAX_ATOMIC_WRITE
        )));
    }
    if let Some(0) = consolidation.read_page_size {
        return Err(ConsolidateError::Config(
            "consolidation.read_page_size must be at least 1".into(),
        ));
    }

    Ok(())
}

/// Names end up as quoted SQL identifiers; keep them to a plain charset.
fn check_identifier(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ConsolidateError::Config(format!("{} must not be empty", field)));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConsolidateError::Config(format!(
            "{} '{}' may only contain letters, digits, '_' and '-'",
            field, value
        )));
    }
    Ok(())
}
