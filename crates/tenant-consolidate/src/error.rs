//! Error types for the consolidation library.

use thiserror::Error;

/// Main error type for consolidation operations.
#[derive(Error, Debug)]
pub enum ConsolidateError {
    /// Configuration error (invalid YAML, missing credentials, bad limits).
    #[error("Configuration error: {0}")]
    Config(String),

    /// PostgreSQL store query error
    #[error("Store error: {0}")]
    Store(#[from] tokio_postgres::Error),

    /// Store could not serve a request (connection lost, injected fault, ...)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A source partition could not be enumerated
    #[error("Cannot read partition {partition}: {message}")]
    PartitionRead { partition: String, message: String },

    /// Existence lookup failed for a single key
    #[error("Existence check failed for key {key} in partition {partition}: {message}")]
    DedupCheck {
        partition: String,
        key: String,
        message: String,
    },

    /// Atomic multi-write failed for a whole batch
    #[error("Batch {batch} of partition {partition} failed to commit: {message}")]
    BatchCommit {
        partition: String,
        batch: usize,
        message: String,
    },

    /// Batch larger than the store's atomic write limit
    #[error("Batch of {size} records exceeds the store's atomic write limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    /// Key collision inside an atomic write
    #[error("Key {0} already exists in the unified collection")]
    DuplicateKey(String),

    /// IO error (config and fixture files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, SIGTERM)
    #[error("Consolidation cancelled")]
    Cancelled,
}

impl ConsolidateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        ConsolidateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a PartitionRead error
    pub fn partition_read(partition: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ConsolidateError::PartitionRead {
            partition: partition.into(),
            message: message.to_string(),
        }
    }

    /// Create a DedupCheck error
    pub fn dedup_check(
        partition: impl Into<String>,
        key: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        ConsolidateError::DedupCheck {
            partition: partition.into(),
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Create a BatchCommit error
    pub fn batch_commit(
        partition: impl Into<String>,
        batch: usize,
        message: impl std::fmt::Display,
    ) -> Self {
        ConsolidateError::BatchCommit {
            partition: partition.into(),
            batch,
            message: message.to_string(),
        }
    }

    /// Process exit code for errors that abort the run.
    pub fn exit_code(&self) -> u8 {
        match self {
            ConsolidateError::Config(_) | ConsolidateError::Yaml(_) => 2,
            ConsolidateError::Store(_)
            | ConsolidateError::Unavailable(_)
            | ConsolidateError::Pool { .. } => 3,
            ConsolidateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for consolidation operations.
pub type Result<T> = std::result::Result<T, ConsolidateError>;
