use anyhow::Context;
use edge_gateway::{config::GatewayConfig, init_gateway, observability::init_tracing};
use std::env;
use std::path::Path;
use std::process;

const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

/// Load the YAML file if there is one, then layer the environment on top.
///
/// An explicitly named file must exist. The default path is optional so the
/// gateway can run from environment variables alone.
fn load_config(explicit: Option<String>) -> anyhow::Result<GatewayConfig> {
    let mut config = match explicit {
        Some(path) => GatewayConfig::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            GatewayConfig::from_file(DEFAULT_CONFIG_PATH).with_context(|| {
                format!("Failed to load configuration from {}", DEFAULT_CONFIG_PATH)
            })?
        }
        None => GatewayConfig::default(),
    };

    config
        .apply_env_overrides()
        .context("Invalid environment override")?;

    Ok(config)
}

#[tokio::main]
async fn main() {
    // Get config file path from command line or use default
    let config = match load_config(env::args().nth(1)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{:#}", e);
            eprintln!("Usage: edge-gateway [config_file]");
            process::exit(1);
        }
    };

    // Initialize tracing
    if let Err(e) = init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        process::exit(1);
    }

    // Start the gateway
    if let Err(e) = init_gateway(config).await {
        eprintln!("Gateway error: {}", e);
        process::exit(1);
    }
}
