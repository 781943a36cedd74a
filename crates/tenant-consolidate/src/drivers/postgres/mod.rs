//! PostgreSQL driver.
//!
//! - [`PgStore`]: partitions as per-schema tables, unified collection as one
//!   JSONB table
//! - [`SslMode`]: TLS configuration for store connections

mod store;
mod tls;

#[cfg(test)]
mod live_tests;

pub use store::PgStore;
pub use tls::SslMode;
