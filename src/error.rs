//! Error handling for the home telemetry pipeline.

/// A specialized `Result` type for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// The main error type for ingest, query and serving.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Caller-side input was rejected before any storage access
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or mismatched bearer token
    #[error("Unauthorized")]
    Unauthorized,

    /// A label or metadata document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store failed; no partial write is visible
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Local snapshot collection failed
    #[error("Collector error: {0}")]
    Collector(String),

    /// Web server error
    #[error("Web server error: {0}")]
    WebServer(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An outbound request to a telemetry server failed or was refused
    #[error("Transport error: {0}")]
    Transport(String),
}

impl TelemetryError {
    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new collector error
    pub fn collector(msg: impl Into<String>) -> Self {
        Self::Collector(msg.into())
    }

    /// Create a new web server error
    pub fn web_server_error(msg: impl Into<String>) -> Self {
        Self::WebServer(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether the failure is the caller's fault (bad request, bad credentials).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Unauthorized)
    }
}

impl From<sqlx::Error> for TelemetryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(TelemetryError::validation("node_id required").is_client_error());
        assert!(TelemetryError::Unauthorized.is_client_error());
        assert!(!TelemetryError::storage("disk full").is_client_error());
        assert!(!TelemetryError::config_error("bad url").is_client_error());
        assert!(!TelemetryError::transport("connection refused").is_client_error());
    }
}
