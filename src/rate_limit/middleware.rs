use super::window::SlidingWindowLimiter;
use crate::metrics;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

/// Identifier used when the connection's peer address is unavailable
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derive the rate-limit key for a request from its peer address.
///
/// The key is the peer IP without the port, so that one client opening
/// several connections shares a single window.
pub fn client_identifier(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Axum middleware enforcing per-client admission before dispatch
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<SlidingWindowLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_identifier(&request);
    let result = limiter.check(&client);

    if !result.allowed {
        metrics::record_rate_limit_exceeded();
        return create_rate_limit_response(
            result.limit,
            result.reset_after,
            result.retry_after.unwrap_or(result.reset_after),
        );
    }

    let response = next.run(request).await;
    add_rate_limit_headers(response, result.limit, result.remaining)
}

/// Create a 429 Too Many Requests response with rate limit headers
fn create_rate_limit_response(limit: u32, reset_after: u64, retry_after: u64) -> Response {
    let mut headers = HeaderMap::new();

    headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_after));
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    (StatusCode::TOO_MANY_REQUESTS, headers, "Rate limit exceeded").into_response()
}

/// Add rate limit headers to admitted responses
pub fn add_rate_limit_headers(mut response: Response, limit: u32, remaining: u32) -> Response {
    let headers = response.headers_mut();

    headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));

    response
}
