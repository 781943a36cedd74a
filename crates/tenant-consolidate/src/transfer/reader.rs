//! Lazy, single-pass enumeration of one source partition.

use tracing::debug;

use crate::core::record::RawRecord;
use crate::core::traits::{PartitionSource, RecordReceiver};
use crate::error::Result;

/// Reads the records of one partition in key order.
///
/// The sequence is finite and cannot be restarted: once it yields `None`
/// or an `Err`, every later call returns `None`.
pub struct PartitionReader {
    partition: String,
    rx: RecordReceiver,
    records_read: u64,
    finished: bool,
}

impl PartitionReader {
    /// Start enumerating `partition`.
    ///
    /// Fails with `PartitionRead` when the partition cannot be enumerated at all.
    pub async fn open(
        source: &dyn PartitionSource,
        partition: &str,
        page_size: usize,
    ) -> Result<Self> {
        let rx = source.open_partition(partition, page_size).await?;
        debug!("{}: opened partition on {} store", partition, source.db_type());
        Ok(Self {
            partition: partition.to_string(),
            rx,
            records_read: 0,
            finished: false,
        })
    }

    /// Next record, a mid-stream read error, or `None` at the end.
    pub async fn next(&mut self) -> Option<Result<RawRecord>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Ok(record)) => {
                self.records_read += 1;
                Some(Ok(record))
            }
            Some(Err(e)) => {
                self.finish();
                Some(Err(e))
            }
            None => {
                self.finish();
                None
            }
        }
    }

    /// Records successfully yielded so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    fn finish(&mut self) {
        self.finished = true;
        // stops the feeder task on its next send
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryStore;
    use crate::error::ConsolidateError;
    use serde_json::Map;

    #[tokio::test]
    async fn test_reader_is_not_restartable() {
        let store = MemoryStore::new();
        store.insert_source("instance1", "u1", Map::new()).await;

        let mut reader = PartitionReader::open(&store, "instance1", 10).await.unwrap();
        assert_eq!(reader.next().await.unwrap().unwrap().key, "u1");
        assert!(reader.next().await.is_none());
        assert!(reader.next().await.is_none());
        assert_eq!(reader.records_read(), 1);
    }

    #[tokio::test]
    async fn test_reader_ends_after_read_error() {
        let store = MemoryStore::new();
        for key in ["a", "b", "c"] {
            store.insert_source("instance1", key, Map::new()).await;
        }
        store.fail_read_after("instance1", 2).await;

        let mut reader = PartitionReader::open(&store, "instance1", 10).await.unwrap();
        assert!(reader.next().await.unwrap().is_ok());
        assert!(reader.next().await.unwrap().is_ok());
        let err = reader.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ConsolidateError::PartitionRead { .. }));
        assert!(reader.next().await.is_none());
        assert_eq!(reader.records_read(), 2);
    }
}
