//! Web application router and middleware setup.

use crate::error::{Result, TelemetryError};
use crate::web::auth;
use crate::web::config::WebConfig;
use crate::web::handlers::{self, AppState};
use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Create the main axum application with all routes and middleware.
pub fn create_app(config: &WebConfig, state: AppState) -> Result<Router> {
    let ingest = Router::new()
        .route("/ingest", post(handlers::ingest))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    let api = Router::new()
        .route("/nodes", get(handlers::list_nodes))
        .route("/metrics", get(handlers::query_metrics))
        .merge(ingest);

    if state.auth_token.is_none() {
        warn!("No auth token configured, ingest endpoint is open");
    }

    let mut app = Router::new()
        .route("/healthz", get(handlers::health_check))
        .nest("/api/v1", api)
        .with_state(state);

    if config.enable_cors {
        app = app.layer(cors_layer(config)?);
    }

    // A request past its deadline is dropped, which discards its unit of work.
    let service_builder = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_millis(config.request_timeout_ms)));

    Ok(app.layer(service_builder))
}

/// Fails when origins are listed but none of them is a valid header value.
fn cors_layer(config: &WebConfig) -> Result<CorsLayer> {
    let origin = if config.allows_any_origin() {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin {:?}", o);
                    None
                }
            })
            .collect();
        if origins.is_empty() {
            return Err(TelemetryError::config_error(format!(
                "no valid CORS origin in {:?}",
                config.cors_origins
            )));
        }
        info!("CORS restricted to {} origin(s)", origins.len());
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]))
}
