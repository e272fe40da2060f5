//! In-process store for tests and embedding.

use crate::error::{Result, TelemetryError};
use crate::metrics::{Labels, MetricSample, Node};
use crate::query::MetricsFilter;
use crate::store::{NodeRecord, SampleRow, Store, UnitOfWork, Write};
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

const NO_FAILURE: usize = usize::MAX;

#[derive(Debug, Default)]
struct Tables {
    nodes: HashMap<String, NodeRecord>,
    metrics: Vec<SampleRow>,
}

/// Store keeping everything in memory. Staged writes are buffered and
/// applied under a single write lock on commit.
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    fail_at: Arc<AtomicUsize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            fail_at: Arc::new(AtomicUsize::new(NO_FAILURE)),
        }
    }

    /// Make the `index`-th staged write (zero-based) of every later unit of
    /// work fail with a storage error.
    pub fn fail_on_stage(&self, index: usize) {
        self.fail_at.store(index, Ordering::SeqCst);
    }

    /// Stop injecting failures.
    pub fn clear_failure(&self) {
        self.fail_at.store(NO_FAILURE, Ordering::SeqCst);
    }

    /// Number of committed sample rows across all nodes.
    pub async fn sample_count(&self) -> usize {
        self.tables.read().await.metrics.len()
    }

    /// A single node by id.
    pub async fn node(&self, id: &str) -> Result<Option<Node>> {
        let tables = self.tables.read().await;
        tables.nodes.get(id).map(node_from_record).transpose()
    }
}

struct MemoryUnitOfWork {
    tables: Arc<RwLock<Tables>>,
    staged: Vec<Write>,
    fail_at: usize,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn stage(&mut self, write: Write) -> Result<()> {
        if self.staged.len() == self.fail_at {
            return Err(TelemetryError::storage(format!(
                "injected failure at staged write {}",
                self.fail_at
            )));
        }
        self.staged.push(write);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork { tables, staged, .. } = *self;
        let mut tables = tables.write().await;
        for write in staged {
            match write {
                Write::UpsertNode(record) => match tables.nodes.entry(record.id.clone()) {
                    Entry::Occupied(mut entry) => {
                        let existing = entry.get_mut();
                        existing.last_seen = record.last_seen;
                        existing.meta_doc = record.meta_doc;
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(record);
                    }
                },
                Write::AppendSample(row) => tables.metrics.push(row),
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            tables: Arc::clone(&self.tables),
            staged: Vec::new(),
            fail_at: self.fail_at.load(Ordering::SeqCst),
        }))
    }

    async fn query_metrics(&self, filter: &MetricsFilter) -> Result<Vec<MetricSample>> {
        let tables = self.tables.read().await;

        let mut rows: Vec<&SampleRow> = tables
            .metrics
            .iter()
            .filter(|row| filter.matches(&row.node_id, &row.metric, row.time))
            .collect();
        rows.sort_by_key(|row| row.time);

        rows.into_iter()
            .take(filter.limit as usize)
            .map(|row| {
                Ok(MetricSample {
                    time: row.time,
                    metric: row.metric.clone(),
                    value: row.value,
                    labels: Labels::from_document(&row.labels_doc)?,
                })
            })
            .collect()
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let tables = self.tables.read().await;
        let mut nodes = tables
            .nodes
            .values()
            .map(node_from_record)
            .collect::<Result<Vec<_>>>()?;
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }
}

fn node_from_record(record: &NodeRecord) -> Result<Node> {
    Ok(Node {
        id: record.id.clone(),
        name: record.name.clone(),
        last_seen: record.last_seen,
        meta: Labels::from_document(&record.meta_doc)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample(node_id: &str, secs: i64) -> Write {
        Write::AppendSample(SampleRow {
            node_id: node_id.to_string(),
            time: Utc.timestamp_opt(secs, 0).unwrap(),
            metric: "cpu.temp_c".to_string(),
            value: 40.0,
            labels_doc: "{}".to_string(),
        })
    }

    #[tokio::test]
    async fn test_staged_writes_invisible_until_commit() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.stage(sample("n1", 1)).await.unwrap();
        assert_eq!(store.sample_count().await, 0);

        uow.commit().await.unwrap();
        assert_eq!(store.sample_count().await, 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.fail_on_stage(1);

        let mut uow = store.begin().await.unwrap();
        uow.stage(sample("n1", 1)).await.unwrap();
        assert!(uow.stage(sample("n1", 2)).await.is_err());
        uow.rollback().await.unwrap();
        assert_eq!(store.sample_count().await, 0);

        store.clear_failure();
        let mut uow = store.begin().await.unwrap();
        uow.stage(sample("n1", 1)).await.unwrap();
        uow.stage(sample("n1", 2)).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.sample_count().await, 2);
    }

    #[tokio::test]
    async fn test_query_sorted_and_limited() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        for secs in [30, 10, 20] {
            uow.stage(sample("n1", secs)).await.unwrap();
        }
        uow.stage(sample("n2", 5)).await.unwrap();
        uow.commit().await.unwrap();

        let mut filter = MetricsFilter::for_node("n1");
        filter.limit = 2;
        let samples = store.query_metrics(&filter).await.unwrap();
        let secs: Vec<i64> = samples.iter().map(|s| s.time.timestamp()).collect();
        assert_eq!(secs, [10, 20]);
    }
}
