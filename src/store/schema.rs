//! Database migrations.

use crate::error::{Result, TelemetryError};
use sqlx::SqlitePool;
use tracing::{info, instrument};

pub const SCHEMA_VERSION: i64 = 2;

/// Bring the schema up to [`SCHEMA_VERSION`]. Safe to run repeatedly.
#[instrument(skip(pool))]
pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(migration_failed)?;

    let current_version = current_version(pool).await?;

    if current_version >= SCHEMA_VERSION {
        info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    info!("Migrating database from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        migrate_to_v1(pool).await?;
    }

    if current_version < 2 {
        migrate_to_v2(pool).await?;
    }

    let mut tx = pool.begin().await.map_err(migration_failed)?;
    sqlx::query("DELETE FROM schema_version").execute(&mut *tx).await.map_err(migration_failed)?;
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(&mut *tx)
        .await
        .map_err(migration_failed)?;
    tx.commit().await.map_err(migration_failed)?;

    info!("Database migrations complete");
    Ok(())
}

/// Schema version recorded in the database, 0 when never migrated.
pub async fn current_version(pool: &SqlitePool) -> Result<i64> {
    let version: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(migration_failed)?;
    Ok(version.unwrap_or(0))
}

async fn migrate_to_v1(pool: &SqlitePool) -> Result<()> {
    info!("Applying migration v1: nodes and metrics tables");

    let mut tx = pool.begin().await.map_err(migration_failed)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            last_seen INTEGER NOT NULL,
            meta TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(migration_failed)?;

    // No uniqueness on (time, node_id, metric): duplicate points are legal.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metrics (
            time INTEGER NOT NULL,
            node_id TEXT NOT NULL,
            metric TEXT NOT NULL,
            value REAL NOT NULL,
            labels TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(migration_failed)?;

    tx.commit().await.map_err(migration_failed)?;
    Ok(())
}

async fn migrate_to_v2(pool: &SqlitePool) -> Result<()> {
    info!("Applying migration v2: query indexes");

    let mut tx = pool.begin().await.map_err(migration_failed)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_metrics_node_time ON metrics (node_id, time)")
        .execute(&mut *tx)
        .await
        .map_err(migration_failed)?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_metrics_node_metric_time ON metrics (node_id, metric, time)",
    )
    .execute(&mut *tx)
    .await
    .map_err(migration_failed)?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes (name)")
        .execute(&mut *tx)
        .await
        .map_err(migration_failed)?;

    tx.commit().await.map_err(migration_failed)?;
    Ok(())
}

fn migration_failed(err: sqlx::Error) -> TelemetryError {
    TelemetryError::storage(format!("migration failed: {}", err))
}
