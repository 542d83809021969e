pub mod config;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod proxy;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod secrets;

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::metrics::{metrics_handler, MetricsService};
use crate::observability::access_log_middleware;
use crate::proxy::{proxy_handler, Forwarder, ProxyState};
use crate::rate_limit::{rate_limit_middleware, SlidingWindowLimiter};
use crate::registry::ServiceRegistry;
use crate::router::Router;
use crate::secrets::{GatewaySecret, SecretsManager};
use axum::{middleware, routing::get, Router as AxumRouter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Body of the liveness response
pub const HEALTH_BODY: &str = "API Gateway is healthy";

/// The request pipeline and the shared state behind it, built once at startup
pub struct Gateway {
    proxy: ProxyState,
    limiter: Option<Arc<SlidingWindowLimiter>>,
    cors: CorsLayer,
    health_path: String,
    metrics: Option<(String, MetricsService)>,
}

impl Gateway {
    /// Build every pipeline component from configuration
    pub fn from_config(config: &GatewayConfig, secret: GatewaySecret) -> Result<Self> {
        let router = Router::new(config.routes.clone())?;
        let registry = ServiceRegistry::new(config.services.clone());
        let forwarder = Forwarder::new(
            secret,
            Duration::from_secs(config.server.timeout_secs),
            Duration::from_secs(config.server.connect_timeout_secs),
        )?;

        for service in router.services() {
            if !registry.contains(service) {
                warn!(service = %service, "Route points at a service with no configured URL");
            }
        }

        let limiter = config
            .rate_limiting
            .enabled
            .then(|| Arc::new(SlidingWindowLimiter::from_config(&config.rate_limiting)));

        Ok(Self {
            proxy: ProxyState::new(router, registry, forwarder),
            limiter,
            cors: config.cors.build_layer()?,
            health_path: config.server.health_path.clone(),
            metrics: None,
        })
    }

    /// Serve Prometheus metrics at `path`, outside the pipeline
    pub fn with_metrics(mut self, path: impl Into<String>, service: MetricsService) -> Self {
        self.metrics = Some((path.into(), service));
        self
    }

    /// The rate limiter shared by every request, if admission control is on
    pub fn limiter(&self) -> Option<&Arc<SlidingWindowLimiter>> {
        self.limiter.as_ref()
    }

    /// Compose the pipeline: CORS, access log, admission, dispatch.
    ///
    /// The liveness and metrics routes are added after the layers and so
    /// bypass every stage.
    pub fn into_router(self) -> AxumRouter {
        let dispatch = AxumRouter::new()
            .fallback(proxy_handler)
            .with_state(self.proxy);

        let admitted = match self.limiter {
            Some(limiter) => dispatch.layer(middleware::from_fn_with_state(
                limiter,
                rate_limit_middleware,
            )),
            None => dispatch,
        };

        let mut app = admitted
            .layer(middleware::from_fn(access_log_middleware))
            .layer(self.cors)
            .route(&self.health_path, get(health_handler));

        if let Some((path, service)) = self.metrics {
            app = app.route(&path, get(metrics_handler).with_state(service));
        }

        app
    }
}

/// Liveness endpoint
pub async fn health_handler() -> &'static str {
    HEALTH_BODY
}

/// Initialize the gateway server
pub async fn init_gateway(config: GatewayConfig) -> Result<()> {
    // Validate configuration
    config.validate()?;

    info!("Starting API Gateway");

    let secret = config.resolve_gateway_secret(&SecretsManager::standard())?;
    if secret.is_empty() {
        warn!("Gateway secret is empty; backends cannot tell gateway traffic from direct access");
    }

    let mut gateway = Gateway::from_config(&config, secret)?;
    info!(
        routes = ?gateway.proxy.router.routes(),
        services = ?gateway.proxy.registry.names(),
        "Loaded dispatch table"
    );

    if config.observability.metrics_enabled {
        let service = MetricsService::new()?;
        gateway = gateway.with_metrics(config.observability.metrics_path.clone(), service);
    }

    let reaper = match (gateway.limiter(), config.rate_limiting.cleanup_interval()) {
        (Some(limiter), Some(interval)) => Some(limiter.spawn_reaper(interval)),
        _ => None,
    };

    let app = gateway.into_router();

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Gateway ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    if config.observability.otlp_endpoint.is_some() {
        observability::shutdown_telemetry();
    }

    info!("Gateway stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
