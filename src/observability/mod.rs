use crate::config::ObservabilityConfig;
use crate::error::{GatewayError, Result};
use crate::metrics;
use axum::{
    extract::Request,
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{self, RandomIdGenerator, Sampler},
    Resource,
};
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const DEFAULT_FILTER: &str = "edge_gateway=debug,tower_http=debug";

/// Request ID extension type
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Initialize OpenTelemetry tracing and return the tracer
fn init_telemetry(endpoint: &str, service_name: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            trace::config()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name.to_string()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .map_err(|e| GatewayError::Internal(format!("Failed to install tracer: {}", e)))
}

/// Initialize tracing/logging.
///
/// `RUST_LOG` overrides the default filter. The OTLP exporter needs a running
/// tokio runtime, so call this from inside `#[tokio::main]`.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let telemetry = match &config.otlp_endpoint {
        Some(endpoint) => {
            let tracer = init_telemetry(endpoint, &config.service_name)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let (json, compact) = if config.json_logs {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (
            None,
            Some(tracing_subscriber::fmt::layer().with_target(false).compact()),
        )
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(telemetry)
        .with(json)
        .with(compact)
        .try_init()
        .map_err(|e| GatewayError::Internal(format!("Failed to initialize tracing: {}", e)))?;

    info!(
        otlp = config.otlp_endpoint.as_deref().unwrap_or("disabled"),
        json = config.json_logs,
        "Tracing initialized"
    );

    Ok(())
}

/// Flush and shut down the OpenTelemetry exporter
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

/// Access log middleware.
///
/// Assigns a request id (keeping one supplied by the caller), runs the rest
/// of the pipeline inside a span carrying it, then logs method, path, status
/// and latency. Latency is measured until the response head is ready;
/// streamed bodies continue afterwards.
pub async fn access_log_middleware(mut req: Request, next: Next) -> Response {
    let request_id = match req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(id) => id.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            id
        }
    };

    let method: Method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let start = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    let latency = start.elapsed();
    let status = response.status().as_u16();

    span.in_scope(|| {
        info!(
            status,
            latency_ms = latency.as_secs_f64() * 1000.0,
            "Request completed"
        );
    });
    metrics::record_request(method.as_str(), status, latency.as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/api/echo-id",
                get(|req: Request| async move {
                    req.extensions()
                        .get::<RequestId>()
                        .map(|id| id.0.clone())
                        .unwrap_or_default()
                }),
            )
            .layer(axum::middleware::from_fn(access_log_middleware))
    }

    #[tokio::test]
    async fn test_request_id_generated() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/echo-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let header = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(header.len(), 36);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, header.as_bytes());
    }

    #[tokio::test]
    async fn test_request_id_preserved() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/echo-id")
                    .header(REQUEST_ID_HEADER, "caller-supplied-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "caller-supplied-id"
        );
    }
}
