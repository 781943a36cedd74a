//! Tests against a live PostgreSQL server.
//!
//! Run with: TENANT_CONSOLIDATE_TEST_PG_URL=postgres://user:pw@localhost/db \
//!     cargo test --package tenant-consolidate -- live_tests --ignored

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio_postgres::config::Host;
use tokio_postgres::NoTls;

use super::PgStore;
use crate::config::{ConflictMode, StoreConfig, StoreType};
use crate::core::record::{RawRecord, UnifiedRecord};
use crate::core::traits::{PartitionSource, UnifiedStore};
use crate::drivers::StoreHandle;
use crate::error::ConsolidateError;
use crate::report::MigrationReport;
use crate::transfer::{TransferConfig, TransferEngine};

const URL_VAR: &str = "TENANT_CONSOLIDATE_TEST_PG_URL";
const COLLECTION: &str = "users";

/// Throwaway schemas for one test, dropped by [`Scratch::cleanup`].
struct Scratch {
    url: String,
    partition: String,
    unified_schema: String,
}

impl Scratch {
    fn new() -> Option<Self> {
        let url = std::env::var(URL_VAR).ok()?;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Some(Self {
            url,
            partition: format!("tc_part_{}", &suffix[..12]),
            unified_schema: format!("tc_unified_{}", &suffix[..12]),
        })
    }

    fn store_config(&self, max_connections: usize) -> StoreConfig {
        let pg = tokio_postgres::Config::from_str(&self.url).unwrap();
        let host = match pg.get_hosts().first() {
            Some(Host::Tcp(host)) => host.clone(),
            _ => "localhost".to_string(),
        };
        StoreConfig {
            r#type: StoreType::Postgres,
            host,
            port: pg.get_ports().first().copied().unwrap_or(5432),
            database: pg.get_dbname().unwrap_or("postgres").to_string(),
            user: pg.get_user().unwrap_or("postgres").to_string(),
            password: pg
                .get_password()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .unwrap_or_default(),
            unified_schema: self.unified_schema.clone(),
            ssl_mode: "disable".to_string(),
            max_connections: Some(max_connections),
            seed_file: None,
        }
    }

    async fn execute(&self, sql: &str) {
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls).await.unwrap();
        tokio::spawn(connection);
        client.batch_execute(sql).await.unwrap();
    }

    /// Create the partition table holding keys `u0000..` with `rows` rows.
    async fn seed_partition(&self, rows: i32) {
        self.execute(&format!(
            "CREATE SCHEMA {schema};
             CREATE TABLE {schema}.{table} (id TEXT PRIMARY KEY, data JSONB);
             INSERT INTO {schema}.{table}
                 SELECT 'u' || lpad(g::text, 4, '0'), jsonb_build_object('n', g)
                 FROM generate_series(0, {last}) AS g;",
            schema = self.partition,
            table = COLLECTION,
            last = rows - 1,
        ))
        .await;
    }

    async fn cleanup(&self) {
        self.execute(&format!(
            "DROP SCHEMA IF EXISTS {} CASCADE; DROP SCHEMA IF EXISTS {} CASCADE;",
            self.partition, self.unified_schema
        ))
        .await;
    }
}

fn record(key: &str, partition: &str) -> UnifiedRecord {
    let fields = match json!({"name": key}) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    UnifiedRecord::stamp(RawRecord::new(key, fields), partition, Utc::now())
}

#[tokio::test]
#[ignore] // Run with --ignored flag
async fn test_keyset_reads_every_page_in_order() {
    let Some(scratch) = Scratch::new() else {
        eprintln!("{} not set, skipping", URL_VAR);
        return;
    };
    scratch.seed_partition(23).await;
    let store = PgStore::connect(&scratch.store_config(4), COLLECTION)
        .await
        .unwrap();

    let mut rx = store.open_partition(&scratch.partition, 5).await.unwrap();
    let mut keys = Vec::new();
    while let Some(item) = rx.recv().await {
        let raw = item.unwrap();
        assert!(raw.fields.contains_key("n"));
        keys.push(raw.key);
    }

    let expected: Vec<String> = (0..23).map(|i| format!("u{i:04}")).collect();
    assert_eq!(keys, expected);

    scratch.cleanup().await;
}

#[tokio::test]
#[ignore] // Run with --ignored flag
async fn test_insert_if_absent_counts_only_new_rows() {
    let Some(scratch) = Scratch::new() else {
        eprintln!("{} not set, skipping", URL_VAR);
        return;
    };
    let store = PgStore::connect(&scratch.store_config(2), COLLECTION)
        .await
        .unwrap();

    assert_eq!(store.commit_batch(&[record("k2", "instance1")]).await.unwrap(), 1);
    let written = store
        .insert_if_absent(&[
            record("k1", "instance1"),
            record("k2", "instance2"),
            record("k3", "instance1"),
        ])
        .await
        .unwrap();

    assert_eq!(written, 2);
    let counts = store.count_by_partition().await.unwrap();
    assert_eq!(counts.get("instance1"), 3);
    assert_eq!(counts.get("instance2"), 0);

    scratch.cleanup().await;
}

#[tokio::test]
#[ignore] // Run with --ignored flag
async fn test_unique_violation_is_duplicate_key_and_rolls_back() {
    let Some(scratch) = Scratch::new() else {
        eprintln!("{} not set, skipping", URL_VAR);
        return;
    };
    let store = PgStore::connect(&scratch.store_config(2), COLLECTION)
        .await
        .unwrap();
    store.commit_batch(&[record("dup", "instance1")]).await.unwrap();

    let err = store
        .commit_batch(&[record("fresh", "instance1"), record("dup", "instance1")])
        .await
        .unwrap_err();

    assert!(matches!(err, ConsolidateError::DuplicateKey(ref key) if key == "dup"));
    assert!(!store.exists("fresh").await.unwrap());
    assert!(store.exists("dup").await.unwrap());

    scratch.cleanup().await;
}

#[tokio::test]
#[ignore] // Run with --ignored flag
async fn test_single_connection_pool_completes_multi_page_partition() {
    let Some(scratch) = Scratch::new() else {
        eprintln!("{} not set, skipping", URL_VAR);
        return;
    };
    scratch.seed_partition(30).await;
    let store = Arc::new(
        PgStore::connect(&scratch.store_config(1), COLLECTION)
            .await
            .unwrap(),
    );

    let engine = TransferEngine::new(
        &StoreHandle::from_shared(store.clone()),
        TransferConfig {
            batch_limit: 10,
            read_page_size: 5,
            conflict_mode: ConflictMode::CheckThenInsert,
            ..TransferConfig::default()
        },
    );
    let mut report = MigrationReport::new(
        "test",
        "postgres",
        ConflictMode::CheckThenInsert,
        10,
        &[scratch.partition.clone()],
    );

    tokio::time::timeout(
        Duration::from_secs(60),
        engine.migrate_partition(&scratch.partition, &mut report),
    )
    .await
    .expect("partition transfer stalled");

    let p = report.partition(&scratch.partition).unwrap();
    assert_eq!((p.records_read, p.migrated, p.errored), (30, 30, 0));
    assert_eq!(p.batches_committed, 3);
    let counts = store.count_by_partition().await.unwrap();
    assert_eq!(counts.get(&scratch.partition), 30);

    scratch.cleanup().await;
}
