//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Send engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Click/open tracking configuration.
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Delegated Gmail API sending configuration.
    #[serde(default)]
    pub gmail: GmailConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Send engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum send attempts per recipient (first try included).
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
    /// Interval between daily quota reset sweeps, in seconds.
    #[serde(default = "default_quota_sweep_secs")]
    pub quota_sweep_interval_secs: u64,
}

/// Tracking-link rewrite configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackingConfig {
    /// Base URL of the click-redirect endpoint. Rewriting is disabled when unset.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Delegated Gmail API sending configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailConfig {
    /// Service-identity access token used for domain-delegated sends.
    ///
    /// Token minting (service-account key exchange) is handled by the
    /// provisioning tooling outside this engine.
    #[serde(default)]
    pub access_token: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

const fn default_max_send_attempts() -> u32 {
    3
}

const fn default_quota_sweep_secs() -> u64 {
    3600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_send_attempts: default_max_send_attempts(),
            quota_sweep_interval_secs: default_quota_sweep_secs(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `MAILOPS_ENV`)
    /// 3. Environment variables with `MAILOPS_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("MAILOPS_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("MAILOPS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("MAILOPS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.max_send_attempts, 3);
        assert_eq!(engine.quota_sweep_interval_secs, 3600);
    }

    #[test]
    fn test_server_config_defaults() {
        let server: ServerConfig = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 3000);
    }

    #[test]
    fn test_tracking_config_default_disabled() {
        let tracking = TrackingConfig::default();
        assert!(tracking.base_url.is_none());
    }
}
