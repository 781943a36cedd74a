//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default number of records per atomic write.
///
/// Kept below [`MAX_ATOMIC_WRITE`] so a batch never hits the store ceiling.
pub const DEFAULT_BATCH_LIMIT: usize = 450;

/// Largest atomic multi-write the bundled stores accept.
pub const MAX_ATOMIC_WRITE: usize = 500;

/// Default number of source records fetched per partition page.
pub const DEFAULT_READ_PAGE_SIZE: usize = 500;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Store connection settings.
    pub store: StoreConfig,

    /// Consolidation behavior.
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
}

/// Which store implementation backs the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// PostgreSQL: one schema per partition, unified table in `unified_schema`.
    #[default]
    Postgres,

    /// In-process store, optionally seeded from a JSON fixture.
    Memory,
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::Postgres => write!(f, "postgres"),
            StoreType::Memory => write!(f, "memory"),
        }
    }
}

/// Store connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store type (default: postgres).
    #[serde(default)]
    pub r#type: StoreType,

    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema holding the unified collection (default: "public").
    #[serde(default = "default_unified_schema")]
    pub unified_schema: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,

    /// JSON fixture to seed the memory store with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<PathBuf>,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("unified_schema", &self.unified_schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .field("seed_file", &self.seed_file)
            .finish()
    }
}

impl StoreConfig {
    pub fn get_max_connections(&self) -> usize {
        self.max_connections.unwrap_or(4)
    }
}

/// How the engine avoids overwriting keys that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictMode {
    /// Look up every key, then insert the absent ones in atomic batches.
    #[default]
    CheckThenInsert,

    /// Skip the lookup and let the store insert only keys it does not hold.
    InsertIfAbsent,
}

impl fmt::Display for ConflictMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictMode::CheckThenInsert => write!(f, "check_then_insert"),
            ConflictMode::InsertIfAbsent => write!(f, "insert_if_absent"),
        }
    }
}

impl FromStr for ConflictMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "check_then_insert" => Ok(ConflictMode::CheckThenInsert),
            "insert_if_absent" => Ok(ConflictMode::InsertIfAbsent),
            other => Err(format!(
                "invalid conflict mode '{}' (expected check_then_insert or insert_if_absent)",
                other
            )),
        }
    }
}

/// Consolidation behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Source partitions, processed in this order.
    #[serde(default = "default_partitions")]
    pub partitions: Vec<String>,

    /// Collection name inside each partition and in the unified namespace.
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Records per atomic write (default: 450).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_limit: Option<usize>,

    /// Records fetched per partition page (default: 500).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_page_size: Option<usize>,

    /// Duplicate-avoidance strategy.
    #[serde(default)]
    pub conflict_mode: ConflictMode,

    /// Extra attempts for a failed batch commit (default: 0, no retry).
    #[serde(default)]
    pub commit_retries: u32,

    /// Base delay between commit attempts; attempt N waits N times this.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            collection: default_collection(),
            batch_limit: None,
            read_page_size: None,
            conflict_mode: ConflictMode::default(),
            commit_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl ConsolidationConfig {
    pub fn get_batch_limit(&self) -> usize {
        self.batch_limit.unwrap_or(DEFAULT_BATCH_LIMIT)
    }

    pub fn get_read_page_size(&self) -> usize {
        self.read_page_size.unwrap_or(DEFAULT_READ_PAGE_SIZE)
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_unified_schema() -> String {
    "public".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_partitions() -> Vec<String> {
    vec!["instance1".to_string(), "instance2".to_string()]
}

fn default_collection() -> String {
    "users".to_string()
}

fn default_retry_backoff_ms() -> u64 {
    200
}
