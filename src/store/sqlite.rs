//! SQLite-backed store.

use crate::error::{Result, TelemetryError};
use crate::metrics::{Labels, MetricSample, Node};
use crate::query::MetricsFilter;
use crate::store::{
    from_nanos, lower_bound, schema, to_nanos, upper_bound, NanosBound, Store, UnitOfWork, Write,
};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Durable store on a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and run migrations.
    ///
    /// Accepts `sqlite://path/to/file.db` and `sqlite::memory:` URLs.
    #[instrument]
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Opening telemetry store");

        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| TelemetryError::config_error(format!("invalid database URL: {}", e)))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to :memory: is its own database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        schema::run(&store.pool).await?;

        info!("Telemetry store ready");
        Ok(store)
    }

    /// A fresh, private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Get a reference to the underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// One SQL transaction.
struct SqliteUnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
    async fn stage(&mut self, write: Write) -> Result<()> {
        match write {
            Write::UpsertNode(node) => {
                sqlx::query(
                    r#"
                    INSERT INTO nodes (id, name, last_seen, meta) VALUES (?, ?, ?, ?)
                    ON CONFLICT (id) DO UPDATE SET last_seen = excluded.last_seen, meta = excluded.meta
                    "#,
                )
                .bind(node.id)
                .bind(node.name)
                .bind(to_nanos(node.last_seen)?)
                .bind(node.meta_doc)
                .execute(&mut *self.tx)
                .await?;
            }
            Write::AppendSample(row) => {
                sqlx::query(
                    "INSERT INTO metrics (time, node_id, metric, value, labels) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(to_nanos(row.time)?)
                .bind(row.node_id)
                .bind(row.metric)
                .bind(row.value)
                .bind(row.labels_doc)
                .execute(&mut *self.tx)
                .await?;
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteUnitOfWork { tx }))
    }

    #[instrument(skip(self), fields(node_id = %filter.node_id))]
    async fn query_metrics(&self, filter: &MetricsFilter) -> Result<Vec<MetricSample>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT time, metric, value, labels FROM metrics WHERE node_id = ");
        qb.push_bind(filter.node_id.clone());

        if let Some(metric) = &filter.metric {
            qb.push(" AND metric = ").push_bind(metric.clone());
        }
        match lower_bound(filter.from) {
            NanosBound::Open => {}
            NanosBound::At(from) => {
                qb.push(" AND time >= ").push_bind(from);
            }
            NanosBound::Unsatisfiable => return Ok(Vec::new()),
        }
        match upper_bound(filter.to) {
            NanosBound::Open => {}
            NanosBound::At(to) => {
                qb.push(" AND time <= ").push_bind(to);
            }
            NanosBound::Unsatisfiable => return Ok(Vec::new()),
        }
        qb.push(" ORDER BY time ASC LIMIT ").push_bind(i64::from(filter.limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        debug!(rows = rows.len(), "metrics query complete");

        rows.iter().map(sample_from_row).collect()
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let rows = sqlx::query("SELECT id, name, last_seen, meta FROM nodes ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Node {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    last_seen: from_nanos(row.try_get("last_seen")?),
                    meta: Labels::from_document(row.try_get("meta")?)?,
                })
            })
            .collect()
    }
}

fn sample_from_row(row: &SqliteRow) -> Result<MetricSample> {
    Ok(MetricSample {
        time: from_nanos(row.try_get("time")?),
        metric: row.try_get("metric")?,
        value: row.try_get("value")?,
        labels: Labels::from_document(row.try_get("labels")?)?,
    })
}
