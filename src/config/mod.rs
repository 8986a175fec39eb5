//! Configuration module for the gateway service
//!
//! This module handles loading and parsing the service definitions from a
//! YAML file, plus environment variable overrides for per-service URLs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Configuration for a single routable backend service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the backend (scheme + host, never a path)
    pub url: String,
    /// URL path prefix that identifies requests belonging to this service
    pub prefix: String,
    /// All routes under the prefix require authentication
    #[serde(default)]
    pub fully_protected: bool,
    /// Relative paths requiring authentication when not fully protected
    #[serde(default)]
    pub protected_paths: Vec<String>,
    /// Relative paths exempt from authentication (win over protected rules)
    #[serde(default)]
    pub public_paths: Vec<String>,
    /// Service is used internally by the gateway (e.g. the authorization service)
    #[serde(default)]
    pub internal: bool,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Outbound request timeout in seconds (authorization calls and forwards)
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout: default_timeout(),
        }
    }
}

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Service definitions keyed by service name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl GatewayConfig {
    /// Load configuration from a YAML file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load configuration from a YAML string
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// An empty services map is allowed (the gateway starts with no routes);
    /// an entry missing its URL or prefix is an error.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, service) in &self.services {
            if service.url.is_empty() {
                anyhow::bail!("service '{}' is missing url", name);
            }
            if service.prefix.is_empty() {
                anyhow::bail!("service '{}' is missing prefix", name);
            }
            if !service.prefix.starts_with('/') {
                anyhow::bail!(
                    "service '{}' prefix '{}' must start with '/'",
                    name,
                    service.prefix
                );
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Each service URL can be overridden via `<UPPERCASED_NAME>_SERVICE_URL`
    /// (e.g. `AUTHORIZATION_SERVICE_URL`), and the listen port via `PORT`.
    pub fn apply_env_overrides(&mut self) {
        for (name, service) in self.services.iter_mut() {
            let var = format!("{}_SERVICE_URL", name).to_uppercase();
            if let Ok(url) = std::env::var(&var) {
                if !url.is_empty() {
                    tracing::info!(service = %name, url = %url, "using environment override");
                    service.url = url;
                }
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => {
                    tracing::warn!(value = %port, "invalid PORT override, keeping configured port")
                }
            }
        }
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
