//! Push agent: delivers locally collected snapshots to a remote server's
//! ingest endpoint.
//!
//! Delivery is fire-and-forget. A failed send is logged and the next
//! snapshot is tried on schedule; nothing is queued or retried.

use crate::error::{Result, TelemetryError};
use crate::metrics::Snapshot;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-request deadline for ingest calls.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Path appended to the server base URL.
pub const INGEST_PATH: &str = "/api/v1/ingest";

/// HTTP client for `POST /api/v1/ingest`.
#[derive(Debug, Clone)]
pub struct IngestClient {
    http: Client,
    endpoint: String,
    token: Option<String>,
}

impl IngestClient {
    /// Client for the server at `base_url`. A blank token sends no
    /// `Authorization` header.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/');
        if base_url.is_empty() {
            return Err(TelemetryError::config_error("server URL must not be empty"));
        }

        let http = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| TelemetryError::config_error(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: format!("{}{}", base_url, INGEST_PATH),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post one snapshot. Any non-2xx status is an error carrying the
    /// server's message.
    pub async fn send(&self, snapshot: &Snapshot) -> Result<()> {
        let mut request = self.http.post(&self.endpoint).json(snapshot);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::transport(format!(
                "ingest failed with {}: {}",
                status,
                body.trim()
            )));
        }

        debug!(node_id = %snapshot.node_id, "Snapshot delivered");
        Ok(())
    }
}

/// Where the agent puts each snapshot.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Post to a server
    Send(IngestClient),
    /// Print the payload to stdout and send nothing
    Print,
}

impl Delivery {
    pub async fn deliver(&self, snapshot: &Snapshot) -> Result<()> {
        match self {
            Delivery::Send(client) => client.send(snapshot).await,
            Delivery::Print => {
                println!("{}", serde_json::to_string_pretty(snapshot)?);
                Ok(())
            }
        }
    }
}

/// Drain `snapshots` into `delivery` until the stream ends. Failures are
/// logged and skipped. Returns how many snapshots were delivered.
pub async fn run_agent<S>(snapshots: S, delivery: &Delivery) -> usize
where
    S: Stream<Item = Snapshot>,
{
    let mut snapshots = std::pin::pin!(snapshots);
    let mut delivered = 0;

    while let Some(snapshot) = snapshots.next().await {
        match delivery.deliver(&snapshot).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(node_id = %snapshot.node_id, "Send error: {}", e),
        }
    }

    info!(delivered, "Agent stream finished");
    delivered
}
