use crate::cors::CorsConfig;
use crate::error::{GatewayError, Result};
use crate::rate_limit::RateLimitConfig;
use crate::secrets::{resolve_secret_ref, GatewaySecret, SecretString, SecretsManager};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::sync::Arc;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Shared secret marking gateway traffic (plain value or `env://`, `file://`, `secret://` reference)
    #[serde(default)]
    pub gateway_secret: String,
    /// Literal secret from `GATEWAY_SECRET`; never treated as a reference
    #[serde(skip)]
    pub gateway_secret_override: Option<Arc<SecretString>>,
    /// Logical service name -> backend base URL
    #[serde(default)]
    pub services: BTreeMap<String, String>,
    /// Path prefix -> logical service dispatch table
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitConfig,
    /// Cross-origin policy applied to every dispatched request
    #[serde(default = "CorsConfig::permissive")]
    pub cors: CorsConfig,
    /// Logging, tracing export and metrics
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Backend timeout in seconds: wait for the response head, then each idle gap in the body
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Backend connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Only paths under this prefix are dispatched
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Liveness path answered by the gateway itself
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

/// Route configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path prefix (e.g. "/api/orders"); `*` matches a single segment
    pub prefix: String,
    /// Logical service name the prefix dispatches to
    pub service: String,
    /// Route description
    #[serde(default)]
    pub description: String,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Emit logs as JSON lines instead of the compact format
    #[serde(default)]
    pub json_logs: bool,
    /// OTLP collector endpoint; tracing export is off when unset
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Service name reported to the collector
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Serve Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    /// Path of the metrics endpoint
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_service_name() -> String {
    "edge-gateway".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_routes() -> Vec<RouteConfig> {
    [
        ("/api", "store-service", "Everything else under the API prefix"),
        ("/api/store-owners", "store-service", "Store owners"),
        ("/api/stores", "store-service", "Stores"),
        ("/api/stores/*/products", "product-service", "Products of a store"),
        ("/api/products", "product-service", "Product catalog"),
        ("/api/orders", "order-service", "Orders"),
    ]
    .into_iter()
    .map(|(prefix, service, description)| RouteConfig {
        prefix: prefix.to_string(),
        service: service.to_string(),
        description: description.to_string(),
    })
    .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            api_prefix: default_api_prefix(),
            health_path: default_health_path(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            otlp_endpoint: None,
            service_name: default_service_name(),
            metrics_enabled: default_true(),
            metrics_path: default_metrics_path(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            gateway_secret: String::new(),
            gateway_secret_override: None,
            services: BTreeMap::new(),
            routes: default_routes(),
            rate_limiting: RateLimitConfig::default(),
            cors: CorsConfig::permissive(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Environment variable carrying the backend URL of `service`
/// (`store-service` -> `STORE_SERVICE_URL`)
pub fn service_env_var(service: &str) -> String {
    let name: String = service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_URL", name)
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply `PORT`, `GATEWAY_SECRET` and `<SERVICE>_URL` from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Unset keys leave values untouched.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| GatewayError::Config(format!("Invalid PORT value: {}", port)))?;
        }

        if let Some(secret) = lookup("GATEWAY_SECRET") {
            self.gateway_secret_override = Some(Arc::new(Secret::new(secret)));
        }

        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.extend(self.routes.iter().map(|r| r.service.clone()));
        names.sort();
        names.dedup();

        for name in names {
            if let Some(url) = lookup(&service_env_var(&name)) {
                self.services.insert(name, url);
            }
        }

        Ok(())
    }

    /// Resolve the secret stamped on forwarded requests.
    ///
    /// A `GATEWAY_SECRET` override is used verbatim. Otherwise `gateway_secret`
    /// is resolved as a secret reference; leaving it unset gives an empty secret.
    pub fn resolve_gateway_secret(&self, manager: &SecretsManager) -> Result<GatewaySecret> {
        match &self.gateway_secret_override {
            Some(literal) => GatewaySecret::new(Secret::new(literal.expose_secret().clone())),
            None => GatewaySecret::new(resolve_secret_ref(&self.gateway_secret, manager)?),
        }
    }

    /// Validate configuration.
    ///
    /// Backend URLs are not checked here: a broken URL is reported when a
    /// request resolves it, so one bad entry does not keep the gateway down.
    pub fn validate(&self) -> Result<()> {
        if self.server.timeout_secs == 0 {
            return Err(GatewayError::Config(
                "Backend timeout must be > 0".to_string(),
            ));
        }

        if !self.server.api_prefix.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "API prefix must start with '/': {}",
                self.server.api_prefix
            )));
        }

        for path in [&self.server.health_path, &self.observability.metrics_path] {
            if !path.starts_with('/') {
                return Err(GatewayError::Config(format!(
                    "Endpoint path must start with '/': {}",
                    path
                )));
            }
        }

        let api_prefix = self.server.api_prefix.trim_end_matches('/');
        for route in &self.routes {
            if route.prefix.is_empty() {
                return Err(GatewayError::Config(
                    "Route prefix cannot be empty".to_string(),
                ));
            }

            if route.service.trim().is_empty() {
                return Err(GatewayError::Config(format!(
                    "Service name cannot be empty for route: {}",
                    route.prefix
                )));
            }

            let under_prefix = route.prefix == api_prefix
                || route
                    .prefix
                    .strip_prefix(api_prefix)
                    .is_some_and(|rest| rest.starts_with('/'));
            if !under_prefix {
                return Err(GatewayError::Config(format!(
                    "Route prefix {} is outside the API prefix {}",
                    route.prefix, self.server.api_prefix
                )));
            }
        }

        if self.rate_limiting.enabled {
            if self.rate_limiting.requests == 0 {
                return Err(GatewayError::Config(
                    "Rate limit requests must be > 0".to_string(),
                ));
            }
            if self.rate_limiting.window_secs == 0 {
                return Err(GatewayError::Config(
                    "Rate limit window must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
  timeout_secs: 10

gateway_secret: "env://GATEWAY_SECRET"

services:
  order-service: "http://127.0.0.1:9001"
  store-service: "http://127.0.0.1:9002"

routes:
  - prefix: "/api/orders"
    service: order-service
  - prefix: "/api"
    service: store-service
    description: "Catch-all"

rate_limiting:
  requests: 50
  window_secs: 30
"#;

        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.timeout_secs, 10);
        assert_eq!(config.gateway_secret, "env://GATEWAY_SECRET");
        assert_eq!(config.services["order-service"], "http://127.0.0.1:9001");
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[1].description, "Catch-all");
        assert_eq!(config.rate_limiting.requests, 50);
        assert_eq!(config.rate_limiting.window_secs, 30);
        assert!(config.rate_limiting.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = GatewayConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(config.server.api_prefix, "/api");
        assert_eq!(config.server.health_path, "/health");
        assert_eq!(config.rate_limiting.requests, 100);
        assert_eq!(config.rate_limiting.window_secs, 60);
        assert_eq!(config.observability.metrics_path, "/metrics");
        assert_eq!(config.cors.allowed_origins, vec!["*"]);
        assert!(config.services.is_empty());
        assert_eq!(config.routes.len(), 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_service_env_var() {
        assert_eq!(service_env_var("store-service"), "STORE_SERVICE_URL");
        assert_eq!(service_env_var("order.v2"), "ORDER_V2_URL");
    }

    #[test]
    fn test_overrides() {
        let mut config = GatewayConfig::default();
        config
            .services
            .insert("order-service".to_string(), "http://file-value".to_string());

        let env = HashMap::from([
            ("PORT", "9999"),
            ("GATEWAY_SECRET", "from-env"),
            ("ORDER_SERVICE_URL", "http://orders:9001"),
            ("PRODUCT_SERVICE_URL", "http://products:9002"),
            ("UNRELATED_SERVICE_URL", "http://ignored"),
        ]);
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 9999);
        assert_eq!(
            config
                .resolve_gateway_secret(&SecretsManager::new())
                .unwrap()
                .header_value(),
            "from-env"
        );
        assert_eq!(config.services["order-service"], "http://orders:9001");
        // Referenced by a default route, so picked up even without a file entry
        assert_eq!(config.services["product-service"], "http://products:9002");
        // Unset variable leaves the service unregistered
        assert!(!config.services.contains_key("store-service"));
        assert!(!config.services.contains_key("unrelated-service"));
    }

    #[test]
    fn test_shipped_config_starts_without_secret() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/gateway.yaml");
        let mut config = GatewayConfig::from_file(path).unwrap();
        config.apply_overrides(|_| None).unwrap();
        config.validate().unwrap();

        let secret = config
            .resolve_gateway_secret(&SecretsManager::new())
            .unwrap();
        assert!(secret.is_empty());
    }

    #[test]
    fn test_secret_override_is_literal() {
        let dir = tempfile::tempdir().unwrap();
        let secret_file = dir.path().join("secret");
        std::fs::write(&secret_file, "from-file").unwrap();
        let reference = format!("file://{}", secret_file.display());

        // The same string in the file is a reference...
        let mut config = GatewayConfig::default();
        config.gateway_secret = reference.clone();
        let secret = config
            .resolve_gateway_secret(&SecretsManager::new())
            .unwrap();
        assert_eq!(secret.header_value(), "from-file");

        // ...but from GATEWAY_SECRET it is the secret itself
        config
            .apply_overrides(|key| (key == "GATEWAY_SECRET").then(|| reference.clone()))
            .unwrap();
        let secret = config
            .resolve_gateway_secret(&SecretsManager::new())
            .unwrap();
        assert_eq!(secret.header_value(), reference.as_str());
        assert!(!format!("{:?}", config).contains("from-file"));
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = GatewayConfig::default();
        let result = config.apply_overrides(|key| (key == "PORT").then(|| "eighty".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_route_outside_prefix() {
        let mut config = GatewayConfig::default();
        config.routes = vec![RouteConfig {
            prefix: "/admin".to_string(),
            service: "store-service".to_string(),
            description: String::new(),
        }];
        assert!(config.validate().is_err());

        config.routes[0].prefix = "/apix".to_string();
        assert!(config.validate().is_err());

        config.routes[0].prefix = "/api/admin".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_service() {
        let mut config = GatewayConfig::default();
        config.routes[0].service = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rate_limit() {
        let mut config = GatewayConfig::default();
        config.rate_limiting.requests = 0;
        assert!(config.validate().is_err());

        // A disabled limiter is not checked
        config.rate_limiting.enabled = false;
        assert!(config.validate().is_ok());

        config.rate_limiting.enabled = true;
        config.rate_limiting.requests = 10;
        config.rate_limiting.window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_urls_not_validated_upfront() {
        let mut config = GatewayConfig::default();
        config
            .services
            .insert("store-service".to_string(), "not a url".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        std::fs::write(&path, "server:\n  port: 8123\n").unwrap();

        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 8123);

        assert!(GatewayConfig::from_file(dir.path().join("missing.yaml")).is_err());
    }
}
