//! Gateway secret handling.
//!
//! The gateway marks every forwarded request with a shared secret. Backends
//! compare it against their own copy to tell gateway-mediated traffic from
//! direct access. This is the whole perimeter: anything holding the secret is
//! indistinguishable from the gateway, and nothing signs individual requests.
//! The value is therefore kept behind [`secrecy::Secret`] and never logged.

use crate::error::{GatewayError, Result};
use axum::http::HeaderValue;
use secrecy::{ExposeSecret, Secret};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Secret string wrapper that prevents accidental exposure
pub type SecretString = Secret<String>;

/// Where secret references of the form `secret://key` are looked up
pub trait SecretsProvider {
    /// Get a secret by key
    fn get_secret(&self, key: &str) -> Result<SecretString>;

    /// Check if a secret exists
    fn has_secret(&self, key: &str) -> bool;
}

/// Looks up `secret://key` as the environment variable `<PREFIX><KEY>`
#[derive(Debug, Clone)]
pub struct EnvSecretsProvider {
    prefix: String,
}

impl EnvSecretsProvider {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn env_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase().replace('-', "_"))
    }
}

impl Default for EnvSecretsProvider {
    fn default() -> Self {
        Self::new("EDGE_GATEWAY_SECRET_")
    }
}

impl SecretsProvider for EnvSecretsProvider {
    fn get_secret(&self, key: &str) -> Result<SecretString> {
        env::var(self.env_key(key))
            .map(Secret::new)
            .map_err(|_| GatewayError::Config(format!("Secret '{}' not found in environment", key)))
    }

    fn has_secret(&self, key: &str) -> bool {
        env::var(self.env_key(key)).is_ok()
    }
}

/// Looks up `secret://key` as a file named `key` in a directory, e.g. a
/// mounted orchestrator secret volume
#[derive(Debug, Clone)]
pub struct FileSecretsProvider {
    base_path: PathBuf,
}

impl FileSecretsProvider {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

impl SecretsProvider for FileSecretsProvider {
    fn get_secret(&self, key: &str) -> Result<SecretString> {
        let path = self.base_path.join(key);
        fs::read_to_string(&path)
            .map(|s| Secret::new(s.trim().to_string()))
            .map_err(|e| {
                GatewayError::Config(format!(
                    "Failed to read secret from {}: {}",
                    path.display(),
                    e
                ))
            })
    }

    fn has_secret(&self, key: &str) -> bool {
        self.base_path.join(key).is_file()
    }
}

/// Ordered chain of providers; the first one holding a key wins
#[derive(Default)]
pub struct SecretsManager {
    providers: Vec<Box<dyn SecretsProvider + Send + Sync>>,
}

/// Directory checked for mounted secrets by [`SecretsManager::standard`]
pub const MOUNTED_SECRETS_DIR: &str = "/run/secrets";

impl SecretsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider to the chain (checked in order)
    pub fn add_provider<P: SecretsProvider + Send + Sync + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Environment first, then mounted secret files when the directory exists
    pub fn standard() -> Self {
        let mut manager = Self::new().add_provider(EnvSecretsProvider::default());

        if Path::new(MOUNTED_SECRETS_DIR).is_dir() {
            info!(dir = MOUNTED_SECRETS_DIR, "Mounted secrets directory found");
            manager = manager.add_provider(FileSecretsProvider::new(MOUNTED_SECRETS_DIR));
        }

        manager
    }

    /// Get a secret, trying each provider in order
    pub fn get_secret(&self, key: &str) -> Result<SecretString> {
        self.providers
            .iter()
            .find(|p| p.has_secret(key))
            .ok_or_else(|| {
                GatewayError::Config(format!("Secret '{}' not found in any provider", key))
            })?
            .get_secret(key)
    }
}

/// Resolve a secret reference.
///
/// Supported forms:
/// - `secret://key` via the secrets manager
/// - `env://VAR` from an environment variable
/// - `file:///path/to/file` from a file (trimmed)
/// - anything else is taken literally
pub fn resolve_secret_ref(value: &str, manager: &SecretsManager) -> Result<SecretString> {
    if let Some(key) = value.strip_prefix("secret://") {
        debug!(key = %key, "Resolving secret reference");
        manager.get_secret(key)
    } else if let Some(var) = value.strip_prefix("env://") {
        debug!(var = %var, "Resolving secret from environment");
        env::var(var)
            .map(Secret::new)
            .map_err(|_| GatewayError::Config(format!("Environment variable '{}' not found", var)))
    } else if let Some(path) = value.strip_prefix("file://") {
        debug!(path = %path, "Resolving secret from file");
        fs::read_to_string(path)
            .map(|s| Secret::new(s.trim().to_string()))
            .map_err(|e| GatewayError::Config(format!("Failed to read file {}: {}", path, e)))
    } else {
        Ok(Secret::new(value.to_string()))
    }
}

/// The shared string injected into every forwarded request.
///
/// Read-only after startup and cheap to clone. `Debug` never shows the value.
#[derive(Clone)]
pub struct GatewaySecret {
    value: Arc<SecretString>,
    header: HeaderValue,
}

impl GatewaySecret {
    pub fn new(value: SecretString) -> Result<Self> {
        let mut header = HeaderValue::from_str(value.expose_secret()).map_err(|_| {
            GatewayError::Config("Gateway secret contains characters not allowed in a header".to_string())
        })?;
        header.set_sensitive(true);

        Ok(Self {
            value: Arc::new(value),
            header,
        })
    }

    pub fn from_plain(value: impl Into<String>) -> Result<Self> {
        Self::new(Secret::new(value.into()))
    }

    /// Header value for the outbound request, flagged as sensitive
    pub fn header_value(&self) -> &HeaderValue {
        &self.header
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }
}

impl fmt::Debug for GatewaySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GatewaySecret([REDACTED])")
    }
}
