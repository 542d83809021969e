//! Service registry: logical service name to backend base URL.
//!
//! The table is fixed at construction. Entries are parsed once up front, but a
//! broken entry is only reported when a request actually resolves it, so a
//! single misconfigured backend never prevents the gateway from starting.

use crate::error::{GatewayError, Result};
use std::collections::HashMap;
use tracing::warn;
use url::Url;

/// A configured backend for one logical service
#[derive(Debug, Clone)]
struct ServiceRoute {
    /// Configured value, kept for diagnostics
    raw: String,
    /// Parsed base URL, or the reason it could not be used
    base_url: std::result::Result<Url, String>,
}

/// Immutable lookup table shared by every request handler
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, ServiceRoute>,
}

impl ServiceRegistry {
    /// Build a registry from `{service name -> base URL}` pairs
    pub fn new<I, K, V>(services: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let services = services
            .into_iter()
            .map(|(name, raw)| {
                let name = name.into();
                let raw = raw.into();
                let base_url = parse_base_url(&raw);
                if let Err(reason) = &base_url {
                    warn!(service = %name, url = %raw, reason = %reason, "Service URL is not usable");
                }
                (name, ServiceRoute { raw, base_url })
            })
            .collect();

        Self { services }
    }

    /// Resolve a logical service name to its backend base URL.
    ///
    /// An unknown name yields [`GatewayError::ServiceNotFound`]; a known name
    /// with an unusable URL yields [`GatewayError::InvalidRoute`].
    pub fn resolve(&self, service: &str) -> Result<&Url> {
        let route = self
            .services
            .get(service)
            .ok_or_else(|| GatewayError::ServiceNotFound(service.to_string()))?;

        route
            .base_url
            .as_ref()
            .map_err(|reason| GatewayError::InvalidRoute {
                service: service.to_string(),
                reason: format!("{} ({:?})", reason, route.raw),
            })
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Registered service names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Accept only absolute http(s) URLs with a host
fn parse_base_url(raw: &str) -> std::result::Result<Url, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("URL is empty".to_string());
    }

    let url = Url::parse(trimmed).map_err(|e| e.to_string())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err("URL has no host".to_string());
    }

    Ok(url)
}
