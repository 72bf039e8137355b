//! Application configuration
//!
//! This module defines the configuration structures for the session hub,
//! including environment variable loading and validation.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub store: StoreSettings,
    pub hub: HubSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Service name for logging
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Host to bind to
    pub host: String,
    /// Listen port; taken from `PORT`, fallback 3000
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Durable store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Store connection URL (`DATABASE_URL`)
    pub url: String,
    /// Maximum pooled connections
    pub max_connections: u32,
    /// Connect timeout in seconds
    pub connect_timeout_seconds: u64,
}

/// Hub behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Number of entries returned by get_ranking (10..=100)
    pub ranking_limit: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "duel-hub".to_string(),
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 3000,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://duel-hub.db?mode=rwc".to_string(),
            max_connections: 5,
            connect_timeout_seconds: 30,
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self { ranking_limit: 10 }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Ok(host) = env::var("HOST") {
            config.service.host = host;
        }
        if let Ok(port) = env::var("PORT") {
            config.service.port = port
                .parse()
                .map_err(|_| anyhow!("Invalid PORT value: {}", port))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            config.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        if let Ok(url) = env::var("DATABASE_URL") {
            config.store.url = url;
        }
        if let Ok(max) = env::var("DATABASE_MAX_CONNECTIONS") {
            config.store.max_connections = max
                .parse()
                .map_err(|_| anyhow!("Invalid DATABASE_MAX_CONNECTIONS value: {}", max))?;
        }
        if let Ok(timeout) = env::var("DATABASE_CONNECT_TIMEOUT_SECONDS") {
            config.store.connect_timeout_seconds = timeout.parse().map_err(|_| {
                anyhow!("Invalid DATABASE_CONNECT_TIMEOUT_SECONDS value: {}", timeout)
            })?;
        }

        if let Ok(limit) = env::var("RANKING_LIMIT") {
            config.hub.ranking_limit = limit
                .parse()
                .map_err(|_| anyhow!("Invalid RANKING_LIMIT value: {}", limit))?;
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get store connect timeout as Duration
    pub fn store_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.store.connect_timeout_seconds)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.port == 0 {
        return Err(anyhow!("Listen port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }

    if config.store.url.is_empty() {
        return Err(anyhow!("Store URL cannot be empty"));
    }
    if config.store.max_connections == 0 {
        return Err(anyhow!("Store max connections must be greater than 0"));
    }

    if !(10..=100).contains(&config.hub.ranking_limit) {
        return Err(anyhow!(
            "Ranking limit must be between 10 and 100, got {}",
            config.hub.ranking_limit
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.service.port, 3000);
        assert_eq!(config.hub.ranking_limit, 10);
    }

    #[test]
    fn rejects_bad_log_level() {
        let mut config = AppConfig::default();
        config.service.log_level = "verbose".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_out_of_range_ranking_limit() {
        let mut config = AppConfig::default();
        config.hub.ranking_limit = 5;
        assert!(validate_config(&config).is_err());
        config.hub.ranking_limit = 500;
        assert!(validate_config(&config).is_err());
        config.hub.ranking_limit = 100;
        assert!(validate_config(&config).is_ok());
    }
}
