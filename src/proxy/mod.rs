use crate::error::{GatewayError, Result};
use crate::metrics;
use crate::registry::ServiceRegistry;
use crate::router::{build_backend_url, Router};
use crate::secrets::GatewaySecret;
use axum::{
    body::{Body, HttpBody},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response},
};
use futures::TryStreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Shared secret proving the request passed through the gateway
pub const GATEWAY_SECRET_HEADER: HeaderName = HeaderName::from_static("x-gateway-secret");
/// Logical service the gateway dispatched the request to
pub const GATEWAY_SERVICE_HEADER: HeaderName = HeaderName::from_static("x-gateway-service");
/// `Host` the client originally addressed
pub const FORWARDED_HOST_HEADER: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const FORWARDED_FOR_HEADER: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const FORWARDED_PROTO_HEADER: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Forwards requests to backends and relays their responses.
///
/// Holds no per-request state; clones share one connection pool.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    secret: GatewaySecret,
    /// Deadline for the backend's response head
    timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder for backend calls.
    ///
    /// `timeout` bounds the wait for the response head and, separately, each
    /// idle gap while the body streams. A body that keeps flowing is never
    /// cut off, however long it takes in total.
    pub fn new(secret: GatewaySecret, timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .read_timeout(timeout)
            .connect_timeout(connect_timeout)
            // Redirects belong to the caller, not the gateway
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            secret,
            timeout,
        })
    }

    /// Forward `req` to `backend` on behalf of `service`.
    ///
    /// Method, path, query and body pass through untouched; the body is
    /// streamed in both directions. Hop-by-hop headers are dropped and the
    /// gateway trust headers are set. Dropping the returned response (e.g.
    /// because the caller went away) abandons the backend call.
    pub async fn forward(
        &self,
        req: Request<Body>,
        service: &str,
        backend: &Url,
    ) -> Result<Response<Body>> {
        let (parts, body) = req.into_parts();

        let backend_url = build_backend_url(backend, parts.uri.path(), parts.uri.query());
        let client_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let mut headers = strip_hop_by_hop(&parts.headers);
        // reqwest derives Host from the backend URL
        headers.remove(header::HOST);
        self.apply_gateway_headers(&mut headers, &parts.headers, &parts.uri, service, client_addr);

        debug!(service = %service, backend_url = %backend_url, "Forwarding to backend");

        let mut outbound = self
            .client
            .request(parts.method.clone(), &backend_url)
            .headers(headers);

        // Bodiless requests must not turn into chunked uploads
        if body.size_hint().exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let start = Instant::now();
        let backend_response = match tokio::time::timeout(self.timeout, outbound.send()).await {
            Ok(sent) => sent,
            Err(_) => {
                warn!(service = %service, backend_url = %backend_url, "Backend response head timed out");
                metrics::record_backend_error(service, "timeout");
                return Err(GatewayError::Timeout(format!(
                    "Backend did not respond within {:?}",
                    self.timeout
                )));
            }
        }
        .map_err(|e| {
            let (kind, err) = if e.is_timeout() {
                (
                    "timeout",
                    GatewayError::Timeout(format!("Backend request timed out: {}", e)),
                )
            } else if e.is_connect() {
                (
                    "connect",
                    GatewayError::Backend(format!("Failed to connect to backend: {}", e)),
                )
            } else {
                (
                    "proxy",
                    GatewayError::Proxy(format!("Backend request failed: {}", e)),
                )
            };
            warn!(service = %service, backend_url = %backend_url, error = %e, "Backend call failed");
            metrics::record_backend_error(service, kind);
            err
        })?;

        let status = backend_response.status();
        metrics::record_backend_request(service, status.as_u16(), start.elapsed().as_secs_f64());

        let mut response_builder = Response::builder().status(status);
        if let Some(response_headers) = response_builder.headers_mut() {
            *response_headers = strip_hop_by_hop(backend_response.headers());
        }

        let service_name = service.to_string();
        let stream = backend_response.bytes_stream().inspect_err(move |e| {
            warn!(service = %service_name, error = %e, "Backend response stream failed");
            metrics::record_backend_error(&service_name, "stream");
        });

        response_builder
            .body(Body::from_stream(stream))
            .map_err(|e| GatewayError::Internal(format!("Failed to build response: {}", e)))
    }

    /// Set the trust headers on an outbound request. Every forwarded request
    /// gets all three gateway headers, overwriting whatever the caller sent.
    fn apply_gateway_headers(
        &self,
        headers: &mut HeaderMap,
        inbound: &HeaderMap,
        uri: &axum::http::Uri,
        service: &str,
        client_addr: Option<SocketAddr>,
    ) {
        headers.insert(GATEWAY_SECRET_HEADER, self.secret.header_value().clone());

        headers.remove(GATEWAY_SERVICE_HEADER);
        if let Ok(value) = HeaderValue::from_str(service) {
            headers.insert(GATEWAY_SERVICE_HEADER, value);
        }

        let original_host = inbound.get(header::HOST).cloned().or_else(|| {
            uri.authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });
        match original_host {
            Some(host) => {
                headers.insert(FORWARDED_HOST_HEADER, host);
            }
            None => {
                headers.remove(FORWARDED_HOST_HEADER);
            }
        }

        if let Some(addr) = client_addr {
            let ip = addr.ip().to_string();
            let forwarded_for = match inbound
                .get(FORWARDED_FOR_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                Some(existing) if !existing.is_empty() => format!("{}, {}", existing, ip),
                _ => ip,
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                headers.insert(FORWARDED_FOR_HEADER, value);
            }
        }

        if !headers.contains_key(FORWARDED_PROTO_HEADER) {
            let proto = uri.scheme_str().unwrap_or("http");
            if let Ok(value) = HeaderValue::from_str(proto) {
                headers.insert(FORWARDED_PROTO_HEADER, value);
            }
        }
    }
}

/// Proxy handler state
#[derive(Clone)]
pub struct ProxyState {
    pub router: Arc<Router>,
    pub registry: Arc<ServiceRegistry>,
    pub forwarder: Forwarder,
}

impl ProxyState {
    pub fn new(router: Router, registry: ServiceRegistry, forwarder: Forwarder) -> Self {
        Self {
            router: Arc::new(router),
            registry: Arc::new(registry),
            forwarder,
        }
    }
}

/// Dispatch stage: pick the logical service for the path, resolve its
/// backend and forward. Nothing is sent anywhere when either lookup fails.
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    req: Request<Body>,
) -> Result<Response<Body>> {
    let route_match = state.router.match_route(req.uri().path())?;
    let service = route_match.service().to_string();

    let backend = state.registry.resolve(&service)?;

    state.forwarder.forward(req, &service, backend).await
}

/// Copy headers, leaving out hop-by-hop headers and any header named in `Connection`
fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let connection_tokens: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        let name_str = name.as_str();
        if is_hop_by_hop_header(name_str) || connection_tokens.iter().any(|t| t == name_str) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
