//! PostgreSQL store.
//!
//! Layout:
//! - partition `P` is the table `"P"."<collection>"(id TEXT PRIMARY KEY, data JSONB)`
//! - the unified collection is `"<unified_schema>"."<collection>"` with the
//!   provenance fields kept both inside `data` and as indexed columns
//!
//! Uses deadpool-postgres for connection pooling. Partitions are read with
//! keyset pagination on `id`; batches are written inside one transaction.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info};

use super::tls::SslMode;
use crate::config::{StoreConfig, MAX_ATOMIC_WRITE};
use crate::core::record::{ProvenanceCounts, RawRecord, UnifiedRecord};
use crate::core::traits::{PartitionSource, RecordReceiver, UnifiedStore};
use crate::error::{ConsolidateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest wait for a free pooled connection before the operation fails.
const POOL_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL implementation of both store traits.
pub struct PgStore {
    pool: Pool,
    unified_schema: String,
    collection: String,
}

impl PgStore {
    /// Connect, test the connection and make sure the unified table exists.
    pub async fn connect(config: &StoreConfig, collection: &str) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("tenant-consolidate");

        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let max_conns = config.get_max_connections();

        let pool = match SslMode::parse(&config.ssl_mode)?.connector()? {
            None => {
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .runtime(Runtime::Tokio1)
                    .wait_timeout(Some(POOL_WAIT_TIMEOUT))
                    .build()
                    .map_err(|e| ConsolidateError::pool(e, "creating PostgreSQL store pool"))?
            }
            Some(tls_connector) => {
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .runtime(Runtime::Tokio1)
                    .wait_timeout(Some(POOL_WAIT_TIMEOUT))
                    .build()
                    .map_err(|e| ConsolidateError::pool(e, "creating PostgreSQL store pool"))?
            }
        };

        let store = Self {
            pool,
            unified_schema: config.unified_schema.clone(),
            collection: collection.to_string(),
        };

        store.ping().await?;
        store.ensure_unified_table().await?;

        info!(
            "Connected to PostgreSQL store: {}:{}/{} (unified: {})",
            config.host,
            config.port,
            config.database,
            store.unified_table()
        );

        Ok(store)
    }

    fn unified_table(&self) -> String {
        qualified(&self.unified_schema, &self.collection)
    }

    async fn client(&self, context: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| ConsolidateError::pool(e, context.to_string()))
    }

    async fn ensure_unified_table(&self) -> Result<()> {
        let client = self.client("creating unified table").await?;
        let table = self.unified_table();
        let index = quote_ident(&format!("{}_source_partition_idx", self.collection));

        client
            .batch_execute(&format!(
                "CREATE SCHEMA IF NOT EXISTS {schema};
                 CREATE TABLE IF NOT EXISTS {table} (
                     id TEXT PRIMARY KEY,
                     data JSONB NOT NULL,
                     source_partition TEXT,
                     migrated_at TIMESTAMPTZ
                 );
                 CREATE INDEX IF NOT EXISTS {index} ON {table} (source_partition);",
                schema = quote_ident(&self.unified_schema),
                table = table,
                index = index,
            ))
            .await?;

        debug!("Ensured unified table {}", table);
        Ok(())
    }

    async fn partition_exists(&self, partition: &str) -> Result<bool> {
        let client = self.client("checking partition").await?;
        let row = client
            .query_one(
                "SELECT EXISTS (
                     SELECT 1 FROM information_schema.tables
                     WHERE table_schema = $1 AND table_name = $2
                 )",
                &[&partition, &self.collection],
            )
            .await?;
        Ok(row.get(0))
    }

    fn insert_sql(&self, if_absent: bool) -> String {
        let mut sql = format!(
            "INSERT INTO {} (id, data, source_partition, migrated_at) VALUES ($1, $2, $3, $4)",
            self.unified_table()
        );
        if if_absent {
            sql.push_str(" ON CONFLICT (id) DO NOTHING");
        }
        sql
    }

    async fn write_all(&self, records: &[UnifiedRecord], if_absent: bool) -> Result<u64> {
        if records.len() > self.max_batch_size() {
            return Err(ConsolidateError::BatchTooLarge {
                size: records.len(),
                limit: self.max_batch_size(),
            });
        }

        let mut client = self.client("committing batch").await?;
        let tx = client.transaction().await?;
        let stmt = tx.prepare(&self.insert_sql(if_absent)).await?;

        let mut written = 0u64;
        for record in records {
            let document = record.document();
            written += tx
                .execute(
                    &stmt,
                    &[
                        &record.key,
                        &document,
                        &record.source_partition,
                        &record.migrated_at,
                    ],
                )
                .await
                .map_err(|e| map_insert_error(e, &record.key))?;
        }

        tx.commit().await?;
        Ok(written)
    }
}

#[async_trait]
impl PartitionSource for PgStore {
    async fn open_partition(&self, partition: &str, page_size: usize) -> Result<RecordReceiver> {
        if !self.partition_exists(partition).await? {
            return Err(ConsolidateError::partition_read(
                partition,
                format!("table {} does not exist", qualified(partition, &self.collection)),
            ));
        }

        let (tx, rx) = mpsc::channel(page_size.max(1));
        let pool = self.pool.clone();
        let table = qualified(partition, &self.collection);
        let partition = partition.to_string();

        tokio::spawn(async move {
            if let Err(e) = read_partition_pages(pool, &table, page_size, tx.clone()).await {
                let _ = tx
                    .send(Err(ConsolidateError::partition_read(&partition, e)))
                    .await;
            }
        });

        Ok(rx)
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

/// Page through a partition table in key order until exhausted.
///
/// A connection is held only while a page is fetched, never while waiting
/// for the consumer, so lookups and commits can share a one-connection pool.
async fn read_partition_pages(
    pool: Pool,
    table: &str,
    page_size: usize,
    tx: mpsc::Sender<Result<RawRecord>>,
) -> Result<()> {
    let sql = format!(
        "SELECT id, data FROM {} WHERE ($1::text IS NULL OR id > $1) ORDER BY id LIMIT $2",
        table
    );
    let limit = page_size.max(1) as i64;
    let mut after: Option<String> = None;

    loop {
        let rows = {
            let client = pool
                .get()
                .await
                .map_err(|e| ConsolidateError::pool(e, "getting connection for partition read"))?;
            let stmt = client.prepare_cached(&sql).await?;
            client.query(&stmt, &[&after, &limit]).await?
        };
        let fetched = rows.len();

        for row in rows {
            let key: String = row.try_get(0)?;
            let data: Option<Value> = row.try_get(1)?;
            let fields = match data {
                Some(Value::Object(map)) => map,
                Some(Value::Null) | None => serde_json::Map::new(),
                Some(other) => {
                    let mut map = serde_json::Map::new();
                    map.insert("value".to_string(), other);
                    map
                }
            };
            after = Some(key.clone());
            if tx.send(Ok(RawRecord::new(key, fields))).await.is_err() {
                // receiver dropped
                return Ok(());
            }
        }

        if fetched < limit as usize {
            return Ok(());
        }
    }
}

#[async_trait]
impl UnifiedStore for PgStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let client = self.client("existence check").await?;
        let row = client
            .query_one(
                &format!(
                    "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)",
                    self.unified_table()
                ),
                &[&key],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn commit_batch(&self, records: &[UnifiedRecord]) -> Result<u64> {
        self.write_all(records, false).await
    }

    async fn insert_if_absent(&self, records: &[UnifiedRecord]) -> Result<u64> {
        self.write_all(records, true).await
    }

    async fn count_by_partition(&self) -> Result<ProvenanceCounts> {
        let client = self.client("provenance scan").await?;
        let rows = client
            .query(
                &format!(
                    "SELECT COALESCE(source_partition, data->>'source_partition') AS tag, COUNT(*)
                     FROM {} GROUP BY tag",
                    self.unified_table()
                ),
                &[],
            )
            .await?;

        let mut counts = ProvenanceCounts::default();
        for row in rows {
            let tag: Option<String> = row.try_get(0)?;
            let count: i64 = row.try_get(1)?;
            counts.add(tag.as_deref(), count.max(0) as u64);
        }
        Ok(counts)
    }

    fn max_batch_size(&self) -> usize {
        MAX_ATOMIC_WRITE
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client("testing PostgreSQL store connection").await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

/// Unique violations become `DuplicateKey` so callers can tell them apart.
fn map_insert_error(e: tokio_postgres::Error, key: &str) -> ConsolidateError {
    match e.code() {
        Some(code) if *code == tokio_postgres::error::SqlState::UNIQUE_VIOLATION => {
            ConsolidateError::DuplicateKey(key.to_string())
        }
        _ => ConsolidateError::Store(e),
    }
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(qualified("instance1", "users"), "\"instance1\".\"users\"");
    }
}
