//! HTTP handlers for API endpoints.

use crate::error::TelemetryError;
use crate::ingest::IngestWriter;
use crate::metrics::data::parse_rfc3339;
use crate::metrics::{MetricSample, Node, Snapshot};
use crate::query::{MetricsQuery, QueryEngine};
use crate::store::Store;
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Shared state handed to every handler: the pipeline components and the
/// ingest token. Nothing here is process-global.
#[derive(Clone)]
pub struct AppState {
    pub writer: IngestWriter,
    pub engine: QueryEngine,
    pub store: Arc<dyn Store>,
    pub auth_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, auth_token: Option<String>) -> Self {
        Self {
            writer: IngestWriter::new(Arc::clone(&store)),
            engine: QueryEngine::new(Arc::clone(&store)),
            store,
            auth_token: auth_token.filter(|t| !t.trim().is_empty()).map(Arc::from),
        }
    }
}

/// Error returned by handlers, rendered as `{"error": .., "status": ..}`.
#[derive(Debug)]
pub struct ApiError(pub TelemetryError);

impl From<TelemetryError> for ApiError {
    fn from(err: TelemetryError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(TelemetryError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(TelemetryError::validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TelemetryError::Validation(_) => StatusCode::BAD_REQUEST,
            TelemetryError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let body = json!({
            "error": self.0.to_string(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

/// Raw query string of `GET /api/v1/metrics`.
#[derive(Debug, Default, Deserialize)]
pub struct MetricsParams {
    pub node_id: Option<String>,
    pub metric: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<String>,
}

impl MetricsParams {
    /// Parse instants and the row cap. Blank values count as absent.
    pub fn into_query(self) -> Result<MetricsQuery, TelemetryError> {
        fn present(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.trim().is_empty())
        }

        let from = present(self.from).map(|v| parse_rfc3339(&v)).transpose()?;
        let to = present(self.to).map(|v| parse_rfc3339(&v)).transpose()?;
        let limit = present(self.limit)
            .map(|v| {
                v.trim()
                    .parse::<i64>()
                    .map_err(|_| TelemetryError::validation(format!("invalid limit {v:?}")))
            })
            .transpose()?;

        Ok(MetricsQuery {
            node_id: self.node_id.unwrap_or_default(),
            metric: present(self.metric),
            from,
            to,
            limit,
        })
    }
}

/// Body of `GET /api/v1/metrics`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SeriesResponse {
    pub series: Vec<MetricSample>,
}

/// Accept one snapshot. All-or-nothing: 202 means every sample is stored.
pub async fn ingest(
    State(state): State<AppState>,
    payload: Result<Json<Snapshot>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(snapshot) = payload?;
    let report = state.writer.ingest_snapshot(&snapshot, Utc::now()).await?;
    info!(
        node_id = %report.node_id,
        samples = report.samples,
        "Snapshot ingested"
    );
    Ok(StatusCode::ACCEPTED)
}

/// List all nodes ordered by name.
pub async fn list_nodes(State(state): State<AppState>) -> Result<Json<Vec<Node>>, ApiError> {
    Ok(Json(state.store.list_nodes().await?))
}

/// Query one node's series.
pub async fn query_metrics(
    State(state): State<AppState>,
    params: Result<Query<MetricsParams>, QueryRejection>,
) -> Result<Json<SeriesResponse>, ApiError> {
    let Query(params) = params?;
    let series = state.engine.query(params.into_query()?).await?;
    Ok(Json(SeriesResponse { series }))
}

/// Liveness check.
pub async fn health_check() -> &'static str {
    "ok"
}
