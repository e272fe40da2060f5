//! Ingest writer: one snapshot's samples plus the node's liveness record,
//! made durable together or not at all.

use crate::error::{Result, TelemetryError};
use crate::metrics::{normalize, Labels, MetricSample, Snapshot};
use crate::store::{to_nanos, NodeRecord, SampleRow, Store, Write};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// Outcome of a successful snapshot ingest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub node_id: String,
    pub time: DateTime<Utc>,
    pub samples: usize,
}

/// Write side of the pipeline.
#[derive(Clone)]
pub struct IngestWriter {
    store: Arc<dyn Store>,
}

impl IngestWriter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validate, timestamp, normalize and ingest a snapshot.
    ///
    /// `now` stands in for a missing timestamp.
    pub async fn ingest_snapshot(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Result<IngestReport> {
        if snapshot.node_id.is_empty() {
            return Err(TelemetryError::validation("node_id required"));
        }
        let ts = snapshot.resolve_timestamp(now)?;
        let samples = normalize(snapshot, ts);

        self.ingest(&snapshot.node_id, ts, &samples, snapshot.tags.as_ref())
            .await?;

        Ok(IngestReport {
            node_id: snapshot.node_id.clone(),
            time: ts,
            samples: samples.len(),
        })
    }

    /// Upsert the node (overwriting `last_seen` and `meta`) and append every
    /// sample in one unit of work.
    ///
    /// All documents are encoded before the store is touched. Any failure
    /// rolls the whole batch back; nothing here retries.
    #[instrument(
        skip(self, samples, tags),
        fields(batch_id = %Uuid::new_v4(), samples = samples.len())
    )]
    pub async fn ingest(
        &self,
        node_id: &str,
        ts: DateTime<Utc>,
        samples: &[MetricSample],
        tags: Option<&Labels>,
    ) -> Result<()> {
        let writes = encode_batch(node_id, ts, samples, tags)?;

        let mut uow = self.store.begin().await?;
        for write in writes {
            if let Err(err) = uow.stage(write).await {
                warn!("Ingest batch aborted: {}", err);
                if let Err(rollback_err) = uow.rollback().await {
                    error!("Rollback failed: {}", rollback_err);
                }
                return Err(err);
            }
        }
        uow.commit().await?;

        debug!("Ingest batch committed");
        Ok(())
    }
}

/// The writes one ingest stages: node upsert first, then one append per
/// sample in input order.
pub fn encode_batch(
    node_id: &str,
    ts: DateTime<Utc>,
    samples: &[MetricSample],
    tags: Option<&Labels>,
) -> Result<Vec<Write>> {
    to_nanos(ts)?;
    let meta_doc = match tags {
        Some(tags) => tags.to_document()?,
        None => Labels::new().to_document()?,
    };

    let mut writes = Vec::with_capacity(samples.len() + 1);
    writes.push(Write::UpsertNode(NodeRecord {
        id: node_id.to_string(),
        name: node_id.to_string(),
        last_seen: ts,
        meta_doc,
    }));

    for sample in samples {
        to_nanos(sample.time)?;
        writes.push(Write::AppendSample(SampleRow {
            node_id: node_id.to_string(),
            time: sample.time,
            metric: sample.metric.clone(),
            value: sample.value,
            labels_doc: sample.labels.to_document()?,
        }));
    }

    Ok(writes)
}
