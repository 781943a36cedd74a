//! Core abstractions shared by the engine and the stores.
//!
//! - [`record`]: raw and unified records, provenance fields and counts
//! - [`traits`]: the store contract ([`PartitionSource`], [`UnifiedStore`])

pub mod record;
pub mod traits;

pub use record::{
    ProvenanceCounts, RawRecord, UnifiedRecord, MIGRATED_AT_FIELD, SOURCE_PARTITION_FIELD,
};
pub use traits::{PartitionSource, RecordReceiver, UnifiedStore};
