//! Configuration loading and validation.

mod types;
mod validation;
pub mod vars;

pub use types::*;

use crate::error::{ConsolidateError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file, expanding `${VAR}` references first.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let interpolated = vars::interpolate(&content);
        if !interpolated.is_ok() {
            return Err(ConsolidateError::Config(interpolated.errors.join("; ")));
        }
        Self::from_yaml(&interpolated.text)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// SHA256 fingerprint of the configuration, password excluded.
    pub fn hash(&self) -> String {
        let mut redacted = self.clone();
        redacted.store.password.clear();
        let yaml = serde_yaml::to_string(&redacted).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MEMORY_YAML: &str = r#"
store:
  type: memory
consolidation:
  partitions: [tenant_a, tenant_b]
  batch_limit: 100
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(MEMORY_YAML).unwrap();
        assert_eq!(config.store.r#type, StoreType::Memory);
        assert_eq!(config.consolidation.partitions, vec!["tenant_a", "tenant_b"]);
        assert_eq!(config.consolidation.collection, "users");
        assert_eq!(config.consolidation.get_batch_limit(), 100);
        assert_eq!(config.consolidation.get_read_page_size(), DEFAULT_READ_PAGE_SIZE);
        assert_eq!(config.consolidation.conflict_mode, ConflictMode::CheckThenInsert);
        assert_eq!(config.consolidation.commit_retries, 0);
    }

    #[test]
    fn test_default_partitions() {
        let config = Config::from_yaml("store:\n  type: memory\n").unwrap();
        assert_eq!(config.consolidation.partitions, vec!["instance1", "instance2"]);
        assert_eq!(config.consolidation.get_batch_limit(), DEFAULT_BATCH_LIMIT);
    }

    #[test]
    fn test_load_interpolates_credentials() {
        std::env::set_var("TENANT_CONSOLIDATE_TEST_PASSWORD", "s3cret");
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "store:\n  host: db.internal\n  database: users\n  user: migrator\n  password: ${{TENANT_CONSOLIDATE_TEST_PASSWORD}}\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.store.password, "s3cret");
        assert_eq!(config.store.r#type, StoreType::Postgres);
        std::env::remove_var("TENANT_CONSOLIDATE_TEST_PASSWORD");
    }

    #[test]
    fn test_load_reports_missing_variables() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "store:\n  host: db\n  database: d\n  user: u\n  password: $TENANT_CONSOLIDATE_UNSET_VAR\n"
        )
        .unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConsolidateError::Config(_)));
        assert!(err.to_string().contains("TENANT_CONSOLIDATE_UNSET_VAR"));
    }

    #[test]
    fn test_hash_ignores_password() {
        let mut a = Config::from_yaml(MEMORY_YAML).unwrap();
        let b = a.clone();
        a.store.password = "changed".into();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);

        a.consolidation.batch_limit = Some(10);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_conflict_mode_parsing() {
        assert_eq!(
            "insert-if-absent".parse::<ConflictMode>().unwrap(),
            ConflictMode::InsertIfAbsent
        );
        assert_eq!(
            "check_then_insert".parse::<ConflictMode>().unwrap(),
            ConflictMode::CheckThenInsert
        );
        assert!("upsert".parse::<ConflictMode>().is_err());
    }
}
