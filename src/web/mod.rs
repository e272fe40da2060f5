//! HTTP boundary: ingest, node listing and series queries.
//!
//! Routes:
//! - `GET  /healthz`
//! - `POST /api/v1/ingest` (bearer token when configured)
//! - `GET  /api/v1/nodes`
//! - `GET  /api/v1/metrics?node_id=&metric=&from=&to=&limit=`

pub mod auth;
pub mod config;
pub mod handlers;
pub mod router;

// Re-export commonly used items
pub use config::WebConfig;
pub use handlers::AppState;
pub use router::create_app;

use crate::error::{Result, TelemetryError};
use crate::metrics::Snapshot;
use chrono::Utc;
use futures_util::stream::BoxStream;
use std::net::SocketAddr;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

/// Start the web server. When `local_snapshots` is given, every snapshot it
/// yields is ingested through the same writer the HTTP endpoint uses.
pub async fn start_web_server(
    config: WebConfig,
    state: AppState,
    local_snapshots: Option<BoxStream<'static, Snapshot>>,
) -> Result<()> {
    let app = create_app(&config, state.clone())?;

    let addr = config
        .bind_address()
        .parse::<SocketAddr>()
        .map_err(|e| TelemetryError::config_error(format!("Invalid bind address: {}", e)))?;

    info!("Starting telemetry server on http://{}", addr);
    info!("Ingest endpoint: http://{}/api/v1/ingest", addr);
    info!("Query endpoint: http://{}/api/v1/metrics", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TelemetryError::web_server_error(format!("Failed to bind to address: {}", e)))?;

    if let Some(mut snapshots) = local_snapshots {
        let writer = state.writer.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = snapshots.next().await {
                match writer.ingest_snapshot(&snapshot, Utc::now()).await {
                    Ok(report) => debug!(samples = report.samples, "Local snapshot ingested"),
                    Err(e) => error!("Failed to ingest local snapshot: {}", e),
                }
            }
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| TelemetryError::web_server_error(format!("Server error: {}", e)))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
