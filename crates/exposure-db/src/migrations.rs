//! Schema setup for the scan tables.
//!
//! The SQL files under `migrations/` are compiled into the binary, so a
//! fresh database file gets the subscriber, scan job, scan result and
//! feature flag tables on first open.

use crate::error::{DatabaseError, Result};
use sqlx::{Pool, Sqlite};

/// Bring the schema up to date.
///
/// Safe to call on every start; files already applied are skipped.
///
/// # Errors
/// Returns `DatabaseError::Migration` when a file fails to apply.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    tracing::info!("Applying scan schema migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration execution failed: {e}")))?;

    tracing::info!("Scan schema is up to date");
    Ok(())
}

/// Highest migration applied to this database, 0 for an empty file.
pub async fn get_schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let table_exists = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?
        > 0;

    if !table_exists {
        return Ok(0);
    }

    let version =
        sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(version), 0) FROM _sqlx_migrations")
            .fetch_optional(pool)
            .await?
            .unwrap_or(0);

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionPool;

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = ConnectionPool::new(":memory:", 5)
            .await
            .expect("create pool");

        run_migrations(pool.pool()).await.expect("run migrations");

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name"
        )
        .fetch_all(pool.pool())
        .await
        .expect("query tables");

        assert_eq!(
            tables,
            vec!["feature_flags", "scan_jobs", "scan_results", "subscribers"]
        );
    }

    #[tokio::test]
    async fn test_get_schema_version() {
        let pool = ConnectionPool::new(":memory:", 5)
            .await
            .expect("create pool");

        let version = get_schema_version(pool.pool()).await.expect("get version");
        assert_eq!(version, 0);

        run_migrations(pool.pool()).await.expect("run migrations");

        let version = get_schema_version(pool.pool()).await.expect("get version");
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = ConnectionPool::new(":memory:", 5)
            .await
            .expect("create pool");

        run_migrations(pool.pool())
            .await
            .expect("first migration run");

        run_migrations(pool.pool())
            .await
            .expect("second migration run should be idempotent");

        let version = get_schema_version(pool.pool()).await.expect("get version");
        assert_eq!(version, 3);
    }
}
