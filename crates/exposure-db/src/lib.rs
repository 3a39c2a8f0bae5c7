//! Exposure Database Layer
//!
//! Provides `SQLite` persistence for scan jobs, merged scan results,
//! subscribers and feature flags. Uses `SQLx` with embedded migrations.
//!
//! # Example
//!
//! ```ignore
//! use exposure_db::Database;
//!
//! let db = Database::new("exposure.db").await?;
//! db.run_migrations().await?;
//! ```
//!
//! # Write rules
//!
//! - A subject has at most one `initial` scan job (unique index)
//! - A job's result set is written once, in the same transaction that marks
//!   the job `finished`; a second write is a `DatabaseError::Conflict`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
pub mod error;
pub mod feature_flags;
pub mod migrations;
pub mod scan_jobs;
pub mod scan_results;
pub mod subscribers;

// Re-export commonly used types
pub use connection::ConnectionPool;
pub use error::{DatabaseError, Result};
pub use feature_flags::FeatureFlag;
pub use scan_jobs::ScanJob;
pub use scan_results::LatestScanData;
pub use subscribers::Subscriber;

use std::path::Path;

/// Default number of pooled connections.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// High-level database handle.
///
/// Wraps a `ConnectionPool` and exposes migrations. Cloning is cheap and
/// shares the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Open a database with the default pool size.
    ///
    /// # Arguments
    /// * `path` - Path to the database file (or `:memory:` for in-memory)
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Open a database with an explicit pool size.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let pool = ConnectionPool::new(path, max_connections).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing connection pool.
    #[must_use]
    pub fn from_connection_pool(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Run all pending database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(self.pool.pool()).await
    }

    /// Get the current schema version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(self.pool.pool()).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.pool.pool()
    }

    /// Close all connections.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_creation() {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");
        assert_eq!(db.get_schema_version().await.expect("get version"), 3);
    }

    #[tokio::test]
    async fn test_clones_share_pool() {
        let db = Database::new(":memory:").await.expect("create database");
        db.run_migrations().await.expect("run migrations");
        let other = db.clone();
        assert_eq!(other.get_schema_version().await.expect("get version"), 3);
    }
}
