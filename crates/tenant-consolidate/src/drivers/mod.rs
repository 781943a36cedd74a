//! Store implementations.
//!
//! - [`postgres`]: PostgreSQL store (production)
//! - [`memory`]: in-process store for rehearsals and tests
//!
//! Each store implements both [`PartitionSource`] and [`UnifiedStore`];
//! [`StoreHandle`] carries the two trait objects the engine works with.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use tracing::info;

use crate::config::{Config, StoreType};
use crate::core::traits::{PartitionSource, UnifiedStore};
use crate::error::Result;

pub use memory::{MemoryFixture, MemoryStore};
pub use postgres::PgStore;

/// Source and destination views of one store.
#[derive(Clone)]
pub struct StoreHandle {
    pub source: Arc<dyn PartitionSource>,
    pub unified: Arc<dyn UnifiedStore>,
}

impl StoreHandle {
    /// Use one store for both roles.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: PartitionSource + UnifiedStore + 'static,
    {
        Self {
            source: store.clone(),
            unified: store,
        }
    }
}

/// Open the store described by the configuration.
pub async fn open_store(config: &Config) -> Result<StoreHandle> {
    match config.store.r#type {
        StoreType::Postgres => {
            let store =
                PgStore::connect(&config.store, &config.consolidation.collection).await?;
            Ok(StoreHandle::from_shared(Arc::new(store)))
        }
        StoreType::Memory => {
            let store = match &config.store.seed_file {
                Some(path) => {
                    info!("Loading memory store fixture from {}", path.display());
                    MemoryStore::from_fixture_file(path)?
                }
                None => MemoryStore::new(),
            };
            Ok(StoreHandle::from_shared(Arc::new(store)))
        }
    }
}
