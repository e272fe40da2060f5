//! Snapshot model, label mappings, normalization and local collection.
//!
//! A [`Snapshot`] is what a collector reports for one node at one instant.
//! [`normalize`] flattens it into [`MetricSample`]s, the unit the store
//! persists and the query path returns.

pub mod collector;
pub mod data;
pub mod labels;
pub mod normalize;
pub mod nvidia;
pub mod traits;

// Re-export commonly used items
pub use collector::SystemCollector;
pub use data::{CpuBlock, GpuBlock, MetricSample, Node, Snapshot};
pub use labels::Labels;
pub use normalize::normalize;
pub use traits::MetricsProvider;
