use crate::error::{GatewayError, Result};
use axum::http::{HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::debug;

/// Cross-origin policy injected ahead of every other pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins (use ["*"] for all origins)
    #[serde(default = "wildcard")]
    pub allowed_origins: Vec<String>,
    /// Allowed HTTP methods
    #[serde(default = "default_methods")]
    pub allowed_methods: Vec<String>,
    /// Allowed headers (use ["*"] for all headers)
    #[serde(default = "wildcard")]
    pub allowed_headers: Vec<String>,
    /// Exposed headers
    #[serde(default = "default_exposed_headers")]
    pub exposed_headers: Vec<String>,
    /// Allow credentials
    #[serde(default)]
    pub allow_credentials: bool,
    /// Max age for preflight cache in seconds
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

fn wildcard() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "HEAD"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_exposed_headers() -> Vec<String> {
    [
        "X-Request-Id",
        "X-RateLimit-Limit",
        "X-RateLimit-Remaining",
        "X-RateLimit-Reset",
        "Retry-After",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_age() -> u64 {
    86400
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self::permissive()
    }
}

impl CorsConfig {
    /// Any origin, the common methods, any request header
    pub fn permissive() -> Self {
        Self {
            allowed_origins: wildcard(),
            allowed_methods: default_methods(),
            allowed_headers: wildcard(),
            exposed_headers: default_exposed_headers(),
            allow_credentials: false,
            max_age_secs: default_max_age(),
        }
    }

    fn is_wildcard(values: &[String]) -> bool {
        values.len() == 1 && values[0] == "*"
    }

    /// Build a CorsLayer from this configuration
    pub fn build_layer(&self) -> Result<CorsLayer> {
        let any_origin = Self::is_wildcard(&self.allowed_origins);
        let any_header = Self::is_wildcard(&self.allowed_headers);

        // tower-http refuses credentials combined with wildcards
        if self.allow_credentials && (any_origin || any_header) {
            return Err(GatewayError::Config(
                "CORS credentials cannot be combined with wildcard origins or headers".to_string(),
            ));
        }

        let origins = if any_origin {
            AllowOrigin::any()
        } else {
            let values = self
                .allowed_origins
                .iter()
                .map(|o| HeaderValue::from_str(o))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| GatewayError::Config(format!("Invalid CORS origin value: {}", e)))?;
            AllowOrigin::list(values)
        };

        let methods = self
            .allowed_methods
            .iter()
            .map(|m| Method::from_bytes(m.to_uppercase().as_bytes()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GatewayError::Config(format!("Invalid CORS method: {}", e)))?;

        let headers = if any_header {
            AllowHeaders::any()
        } else {
            AllowHeaders::list(parse_header_names(&self.allowed_headers)?)
        };

        let mut cors = CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(self.max_age_secs));

        if !self.exposed_headers.is_empty() {
            cors = cors.expose_headers(parse_header_names(&self.exposed_headers)?);
        }

        if self.allow_credentials {
            cors = cors.allow_credentials(true);
        }

        debug!(
            origins = ?self.allowed_origins,
            methods = ?self.allowed_methods,
            headers = ?self.allowed_headers,
            "CORS layer configured"
        );

        Ok(cors)
    }
}

fn parse_header_names(names: &[String]) -> Result<Vec<HeaderName>> {
    names
        .iter()
        .map(|h| {
            h.parse::<HeaderName>()
                .map_err(|e| GatewayError::Config(format!("Invalid CORS header name '{}': {}", h, e)))
        })
        .collect()
}
