//! # Home Telemetry
//!
//! Collects CPU and GPU snapshots from machines on a home network, flattens
//! them into metric samples, stores them durably and serves per-node series
//! over a small HTTP API.
//!
//! ## Features
//!
//! - **Normalization**: one snapshot becomes a deterministic list of samples
//! - **Atomic ingest**: a snapshot's samples and node update land together or not at all
//! - **Bounded queries**: per-node series filtered by metric and time range
//! - **Local collection**: sysinfo and `nvidia-smi` based collector for the host itself
//! - **Push agent**: ships local snapshots to a remote server's ingest endpoint
//! - **Library + Binary**: use as a crate or run the `home_telemetry` server
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use home_telemetry::{start_web_server, AppState, SqliteStore, WebConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteStore::connect("sqlite://telemetry.db").await?;
//!     let state = AppState::new(Arc::new(store), Some("dev-token".into()));
//!
//!     start_web_server(WebConfig::new("0.0.0.0", 8080), state, None).await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod query;
pub mod store;
pub mod web;

// Re-export public API
pub use agent::{run_agent, Delivery, IngestClient};
pub use error::{Result, TelemetryError};
pub use ingest::{IngestReport, IngestWriter};
pub use metrics::{
    collector::SystemCollector,
    data::{CpuBlock, GpuBlock, MetricSample, Node, Snapshot},
    labels::Labels,
    normalize::normalize,
    traits::MetricsProvider,
};
pub use query::{MetricsFilter, MetricsQuery, QueryEngine};
pub use store::{MemoryStore, SqliteStore, Store, UnitOfWork, Write};
pub use web::{create_app, start_web_server, AppState, WebConfig};

/// The default local collection interval in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 5000;

/// The default web server port
pub const DEFAULT_WEB_PORT: u16 = 8080;

/// Per-request deadline applied by the HTTP layer
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Row cap used when a query gives no positive limit
pub const DEFAULT_QUERY_LIMIT: u32 = 1000;

/// Upper bound on rows returned by a single query
pub const MAX_QUERY_LIMIT: u32 = 10_000;
