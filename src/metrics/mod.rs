use crate::error::{GatewayError, Result};
use axum::{extract::State, http::header, response::IntoResponse};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder. Only one recorder can exist per process.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            GatewayError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "gateway_requests_total",
            "Total number of HTTP requests received"
        );
        describe_histogram!(
            "gateway_request_duration_seconds",
            "HTTP request latencies in seconds"
        );
        describe_counter!(
            "gateway_backend_requests_total",
            "Total number of requests forwarded to backends"
        );
        describe_histogram!(
            "gateway_backend_duration_seconds",
            "Time until backend response headers arrived, in seconds"
        );
        describe_counter!(
            "gateway_backend_errors_total",
            "Total number of forwarded requests that failed at the gateway"
        );
        describe_counter!(
            "gateway_rate_limit_exceeded_total",
            "Total number of requests rejected due to rate limiting"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record a completed inbound request
pub fn record_request(method: &str, status: u16, duration: f64) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];

    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(duration);
}

/// Record a backend response
pub fn record_backend_request(service: &str, status: u16, duration: f64) {
    let labels = [
        ("service", service.to_string()),
        ("status", status.to_string()),
    ];

    counter!("gateway_backend_requests_total", &labels).increment(1);
    histogram!("gateway_backend_duration_seconds", &labels).record(duration);
}

/// Record a forwarding failure (`connect`, `timeout`, `proxy`, ...)
pub fn record_backend_error(service: &str, kind: &'static str) {
    let labels = [("service", service.to_string()), ("kind", kind.to_string())];
    counter!("gateway_backend_errors_total", &labels).increment(1);
}

/// Record rate limit exceeded
pub fn record_rate_limit_exceeded() {
    counter!("gateway_rate_limit_exceeded_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_dont_panic() {
        // No recorder is installed here; the macros must be no-ops
        record_request("GET", 200, 0.123);
        record_backend_request("order-service", 201, 0.456);
        record_backend_error("order-service", "connect");
        record_rate_limit_exceeded();
    }

    #[tokio::test]
    async fn test_metrics_service_creation() {
        // Installing a second recorder in the same process fails, which is fine here
        match MetricsService::new() {
            Ok(service) => {
                record_rate_limit_exceeded();
                assert!(service
                    .render()
                    .contains("gateway_rate_limit_exceeded_total"));
            }
            Err(e) => {
                assert!(e.to_string().contains("recorder"));
            }
        }
    }
}
