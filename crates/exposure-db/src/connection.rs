//! Database connection management.
//!
//! Provides a `ConnectionPool` wrapper around `SQLx` that applies the
//! `SQLite` options every connection needs.

use crate::error::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// `SQLite` connection pool.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    pool: Pool<Sqlite>,
}

impl ConnectionPool {
    /// Open (creating if missing) the database at `path`.
    ///
    /// # Arguments
    /// * `path` - Path to the `SQLite` database file (or `:memory:` for in-memory)
    /// * `max_connections` - Upper bound on pooled connections
    ///
    /// # Errors
    /// Returns `DatabaseError::Open` if the path is not UTF-8 or the pool
    /// cannot be created.
    pub async fn new(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path_str = path.as_ref().to_str().ok_or_else(|| {
            DatabaseError::Open("invalid database path: not valid UTF-8".to_string())
        })?;

        let mut connect_options = SqliteConnectOptions::from_str(path_str)
            .map_err(|e| DatabaseError::Open(format!("invalid connection string: {e}")))?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        if path_str != ":memory:" {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .map_err(|e| DatabaseError::Open(format!("failed to initialize pool: {e}")))?;

        tracing::info!("Database pool created at {}", path_str);

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying `SQLx` pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the connection pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }

    /// Check that the database answers a trivial query.
    ///
    /// # Errors
    /// Returns `DatabaseError::Sqlx` if the database is unreachable.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
