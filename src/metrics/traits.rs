//! Traits for snapshot collection.

use crate::error::Result;
use crate::metrics::data::Snapshot;
use futures_util::stream::BoxStream;

/// Trait for producing node snapshots.
///
/// Implementations poll the local machine (or anything else) and hand back
/// a [`Snapshot`] ready for normalization and ingest.
pub trait MetricsProvider {
    /// Collect a single snapshot.
    fn collect_snapshot(&mut self) -> impl std::future::Future<Output = Result<Snapshot>> + Send;

    /// Start continuous collection.
    ///
    /// Returns a stream of snapshots collected at the specified interval.
    fn start_stream(
        &mut self,
        interval_ms: u64,
    ) -> impl std::future::Future<Output = Result<BoxStream<'static, Snapshot>>> + Send;
}
