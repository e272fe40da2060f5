//! Query engine: validated, bounded reads of one node's time series.

use crate::error::{Result, TelemetryError};
use crate::metrics::MetricSample;
use crate::store::Store;
use crate::{DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// A caller's request, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsQuery {
    pub node_id: String,
    /// Exact metric name
    pub metric: Option<String>,
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub to: Option<DateTime<Utc>>,
    /// Row cap; non-positive means default, above the maximum is clamped
    pub limit: Option<i64>,
}

/// A validated filter, as the store executes it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsFilter {
    pub node_id: String,
    pub metric: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Always within `1..=MAX_QUERY_LIMIT`
    pub limit: u32,
}

impl MetricsQuery {
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    pub fn metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = Some(metric.into());
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn until(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check the request and apply defaults.
    ///
    /// An empty metric name imposes no constraint, same as an absent one.
    pub fn validate(self) -> Result<MetricsFilter> {
        if self.node_id.is_empty() {
            return Err(TelemetryError::validation("node_id required"));
        }

        Ok(MetricsFilter {
            node_id: self.node_id,
            metric: self.metric.filter(|m| !m.is_empty()),
            from: self.from,
            to: self.to,
            limit: effective_limit(self.limit),
        })
    }
}

impl MetricsFilter {
    /// Unbounded-in-time filter for a node with the default row cap.
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            metric: None,
            from: None,
            to: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }

    /// Whether a stored point satisfies every present constraint.
    pub fn matches(&self, node_id: &str, metric: &str, time: DateTime<Utc>) -> bool {
        node_id == self.node_id
            && self.metric.as_deref().map_or(true, |m| m == metric)
            && self.from.map_or(true, |from| time >= from)
            && self.to.map_or(true, |to| time <= to)
    }
}

/// Apply the row-cap contract: `<= 0` or absent means the default,
/// anything above the maximum is clamped.
pub fn effective_limit(requested: Option<i64>) -> u32 {
    match requested {
        Some(n) if n > 0 => n.min(i64::from(MAX_QUERY_LIMIT)) as u32,
        _ => DEFAULT_QUERY_LIMIT,
    }
}

/// Read side of the pipeline.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn Store>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Matching samples in ascending time order. No matches is an empty
    /// result, not an error.
    #[instrument(skip(self), fields(node_id = %query.node_id))]
    pub async fn query(&self, query: MetricsQuery) -> Result<Vec<MetricSample>> {
        let filter = query.validate()?;
        let samples = self.store.query_metrics(&filter).await?;
        debug!(count = samples.len(), limit = filter.limit, "query served");
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_limit_defaults_and_clamps() {
        assert_eq!(effective_limit(None), 1000);
        assert_eq!(effective_limit(Some(0)), 1000);
        assert_eq!(effective_limit(Some(-5)), 1000);
        assert_eq!(effective_limit(Some(50)), 50);
        assert_eq!(effective_limit(Some(10_000)), 10_000);
        assert_eq!(effective_limit(Some(50_000)), 10_000);
        assert_eq!(effective_limit(Some(i64::MAX)), 10_000);
    }

    #[test]
    fn test_missing_node_id_rejected() {
        let err = MetricsQuery::default().validate().unwrap_err();
        assert!(matches!(err, TelemetryError::Validation(_)));
    }

    #[test]
    fn test_whitespace_node_id_is_a_node_id() {
        assert_eq!(MetricsQuery::for_node(" ").validate().unwrap().node_id, " ");
    }

    #[test]
    fn test_empty_metric_means_no_constraint() {
        let filter = MetricsQuery::for_node("n1").metric("").validate().unwrap();
        assert_eq!(filter.metric, None);
    }

    #[test]
    fn test_filter_conjunction() {
        let t = |s| Utc.timestamp_opt(s, 0).unwrap();
        let filter = MetricsQuery::for_node("n1")
            .metric("cpu.usage_pct")
            .since(t(10))
            .until(t(20))
            .validate()
            .unwrap();

        assert!(filter.matches("n1", "cpu.usage_pct", t(10)));
        assert!(filter.matches("n1", "cpu.usage_pct", t(20)));
        assert!(!filter.matches("n1", "cpu.usage_pct", t(21)));
        assert!(!filter.matches("n1", "cpu.temp_c", t(15)));
        assert!(!filter.matches("n2", "cpu.usage_pct", t(15)));
    }
}
