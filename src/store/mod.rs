//! Storage boundary for nodes and metric samples.
//!
//! Writes go through a [`UnitOfWork`]: every staged [`Write`] becomes visible
//! on [`UnitOfWork::commit`] or not at all. Dropping a unit of work without
//! committing discards it, so a cancelled ingest leaves no partial state.
//!
//! Two engines implement [`Store`]:
//! - [`SqliteStore`]: durable, one SQL transaction per unit of work
//! - [`MemoryStore`]: in-process double with failure injection for tests

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::{Result, TelemetryError};
use crate::metrics::{MetricSample, Node};
use crate::query::MetricsFilter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Liveness row for a node, with metadata already encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    pub last_seen: DateTime<Utc>,
    /// Encoded metadata document, `{}` when empty
    pub meta_doc: String,
}

/// One sample row, with labels already encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub node_id: String,
    pub time: DateTime<Utc>,
    pub metric: String,
    pub value: f64,
    /// Encoded label document, `{}` when empty
    pub labels_doc: String,
}

/// A single write staged inside a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Insert the node, or overwrite `last_seen` and `meta` if it exists
    UpsertNode(NodeRecord),
    /// Append an immutable sample row
    AppendSample(SampleRow),
}

/// An all-or-nothing group of writes.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Queue a write. Staged writes are invisible to readers until commit.
    async fn stage(&mut self, write: Write) -> Result<()>;

    /// Make every staged write visible at once.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every staged write.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A shared store handle, safe to use from many tasks at once.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a new unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    /// Samples matching `filter`, ascending by time, at most `filter.limit`.
    async fn query_metrics(&self, filter: &MetricsFilter) -> Result<Vec<MetricSample>>;

    /// Every known node, ordered by display name.
    async fn list_nodes(&self) -> Result<Vec<Node>>;
}

/// Instant to stored Unix nanoseconds.
///
/// Samples are stored with nanosecond precision, which limits them to
/// 1677-09-21 through 2262-04-11.
pub(crate) fn to_nanos(ts: DateTime<Utc>) -> Result<i64> {
    ts.timestamp_nanos_opt().ok_or_else(|| {
        TelemetryError::validation(format!(
            "timestamp {ts} is outside the storable range (1677-09-21 to 2262-04-11)"
        ))
    })
}

/// A query bound translated to stored nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NanosBound {
    /// Excludes nothing that can be stored
    Open,
    At(i64),
    /// Excludes everything that can be stored
    Unsatisfiable,
}

/// Inclusive lower bound. Instants before the storable range exclude
/// nothing; instants after it exclude everything.
pub(crate) fn lower_bound(from: Option<DateTime<Utc>>) -> NanosBound {
    match from {
        None => NanosBound::Open,
        Some(ts) => match ts.timestamp_nanos_opt() {
            Some(nanos) => NanosBound::At(nanos),
            None if ts.timestamp() < 0 => NanosBound::Open,
            None => NanosBound::Unsatisfiable,
        },
    }
}

/// Inclusive upper bound, saturating the other way round.
pub(crate) fn upper_bound(to: Option<DateTime<Utc>>) -> NanosBound {
    match to {
        None => NanosBound::Open,
        Some(ts) => match ts.timestamp_nanos_opt() {
            Some(nanos) => NanosBound::At(nanos),
            None if ts.timestamp() < 0 => NanosBound::Unsatisfiable,
            None => NanosBound::Open,
        },
    }
}

/// Stored Unix nanoseconds to instant.
pub(crate) fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}
