use crate::config::RouteConfig;
use crate::error::{GatewayError, Result};
use url::Url;

/// One segment of a dispatch prefix
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    /// `*` matches exactly one path segment
    Any,
}

/// Route information
#[derive(Debug, Clone)]
pub struct Route {
    /// Prefix as configured (e.g. "/api/stores/*/products")
    pub prefix: String,
    /// Logical service that owns the prefix
    pub service: String,
    /// Route description
    pub description: String,
    segments: Vec<Segment>,
}

impl Route {
    fn matches(&self, path_segments: &[&str]) -> bool {
        self.segments.len() <= path_segments.len()
            && self
                .segments
                .iter()
                .zip(path_segments)
                .all(|(segment, actual)| match segment {
                    Segment::Static(expected) => expected == actual,
                    Segment::Any => true,
                })
    }

    fn wildcard_count(&self) -> usize {
        self.segments.iter().filter(|s| **s == Segment::Any).count()
    }
}

/// Dispatch table mapping request paths to logical service names.
///
/// Prefixes match on whole segments, so `/api/orders` covers `/api/orders`
/// and `/api/orders/42` but not `/api/ordersx`. When several prefixes match,
/// the longest one wins and, among equally long ones, the one with fewer
/// wildcards.
#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Create a new router from route configurations
    pub fn new(routes: Vec<RouteConfig>) -> Result<Self> {
        let mut compiled: Vec<Route> = Vec::with_capacity(routes.len());

        for route_config in routes {
            if !route_config.prefix.starts_with('/') {
                return Err(GatewayError::Config(format!(
                    "Route prefix must start with '/': {}",
                    route_config.prefix
                )));
            }

            let segments: Vec<Segment> = split_path(&route_config.prefix)
                .into_iter()
                .map(|s| match s {
                    "*" => Segment::Any,
                    other => Segment::Static(other.to_string()),
                })
                .collect();

            if compiled.iter().any(|r| r.segments == segments) {
                return Err(GatewayError::Config(format!(
                    "Duplicate route prefix: {}",
                    route_config.prefix
                )));
            }

            compiled.push(Route {
                prefix: route_config.prefix,
                service: route_config.service,
                description: route_config.description,
                segments,
            });
        }

        compiled.sort_by(|a, b| {
            b.segments
                .len()
                .cmp(&a.segments.len())
                .then_with(|| a.wildcard_count().cmp(&b.wildcard_count()))
        });

        Ok(Self { routes: compiled })
    }

    /// Match a request path to the owning route
    pub fn match_route(&self, path: &str) -> Result<RouteMatch<'_>> {
        let path_segments = split_path(path);

        self.routes
            .iter()
            .find(|route| route.matches(&path_segments))
            .map(|route| RouteMatch {
                route,
                matched_path: path.to_string(),
            })
            .ok_or_else(|| GatewayError::RouteNotFound(path.to_string()))
    }

    /// Configured prefixes, most specific first
    pub fn routes(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.prefix.clone()).collect()
    }

    /// Logical services referenced by at least one route
    pub fn services(&self) -> Vec<&str> {
        let mut services: Vec<&str> = self.routes.iter().map(|r| r.service.as_str()).collect();
        services.sort_unstable();
        services.dedup();
        services
    }
}

/// Result of matching a route
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    /// The matched route
    pub route: &'a Route,
    /// The original request path
    pub matched_path: String,
}

impl RouteMatch<'_> {
    pub fn service(&self) -> &str {
        &self.route.service
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Build the outbound URL: the backend base joined with the full request
/// path, followed by the untouched query string.
pub fn build_backend_url(base: &Url, path: &str, query: Option<&str>) -> String {
    let origin = base.origin().ascii_serialization();
    let base_path = base.path().trim_end_matches('/');
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    let mut url = format!("{}{}{}", origin, base_path, path);
    if let Some(q) = query {
        url.push('?');
        url.push_str(q);
    }
    url
}
