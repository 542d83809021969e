use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request path is not covered by any dispatch prefix
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// The logical service has no entry in the registry
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// The logical service is registered but its URL is unusable
    #[error("Invalid service URL for {service}: {reason}")]
    InvalidRoute { service: String, reason: String },

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidRoute { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Proxy(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Backend(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // A broken route is an operational defect, not a client mistake
        if let GatewayError::InvalidRoute { service, reason } = &self {
            error!(service = %service, reason = %reason, "Misconfigured service route");
        }

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
