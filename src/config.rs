//! Configuration management for servertool.
//!
//! This module handles loading and validating the JSON configuration file.
//! The configuration is loaded once at startup and immutable thereafter.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Discord identity and control channel settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    /// Bot token used to open the gateway session
    pub token: String,
    /// Channel commands are accepted from and replies are sent to
    pub channel_id: String,
    /// The bot's own user id, used for mention parsing and self-filtering
    pub bot_id: String,
}

/// Cloud control plane settings for the managed instance.
#[derive(Debug, Clone, Deserialize)]
pub struct GcpConfig {
    /// Project the instance lives in
    pub project: String,
    /// Zone the instance lives in
    pub zone: String,
    /// Instance name
    pub instance: String,
}

/// Game server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Query address of the game server (host:port)
    pub address: String,
}

/// Cache freshness and upstream deadline settings, all in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// How long a fetched instance status stays fresh
    #[serde(default = "default_instance_ttl")]
    pub instance_ttl_secs: u64,
    /// How long a fetched server status stays fresh; server liveness and
    /// player counts change far more often than instance lifecycle state
    #[serde(default = "default_server_ttl")]
    pub server_ttl_secs: u64,
    /// Deadline for any single upstream call
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,
}

fn default_instance_ttl() -> u64 {
    60
}

fn default_server_ttl() -> u64 {
    10
}

fn default_upstream_timeout() -> u64 {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            instance_ttl_secs: default_instance_ttl(),
            server_ttl_secs: default_server_ttl(),
            upstream_timeout_secs: default_upstream_timeout(),
        }
    }
}

/// Configuration for the application, loaded from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub gcp: GcpConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// A `DISCORD_TOKEN` environment variable (or `.env` entry, loaded via
    /// dotenv) overrides the token from the file, so the token can be kept
    /// out of the configuration file entirely.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        // Load .env file if present (ignore errors - it's optional)
        dotenv::dotenv().ok();

        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let mut config: Config = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        if let Ok(token) = env::var("DISCORD_TOKEN") {
            config.discord.token = token;
        }

        config.validate()?;
        Ok(config)
    }

    /// Freshness bound for cached instance statuses.
    pub fn instance_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.instance_ttl_secs)
    }

    /// Freshness bound for cached server statuses.
    pub fn server_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.server_ttl_secs)
    }

    /// Deadline for a single upstream call.
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.cache.upstream_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.discord.token.is_empty() {
            return Err(Error::Config(
                "Missing Discord token. Set discord.token in the config file or provide DISCORD_TOKEN in the environment.".to_string()
            ));
        }

        Self::validate_snowflake("discord.channel_id", &self.discord.channel_id)?;
        Self::validate_snowflake("discord.bot_id", &self.discord.bot_id)?;

        for (field, value) in [
            ("gcp.project", &self.gcp.project),
            ("gcp.zone", &self.gcp.zone),
            ("gcp.instance", &self.gcp.instance),
        ] {
            if value.is_empty() {
                return Err(Error::Config(format!("Missing required field: {}", field)));
            }
        }

        Self::validate_server_address(&self.server.address)?;

        if self.cache.upstream_timeout_secs == 0 {
            return Err(Error::Config(
                "cache.upstream_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate that a Discord id is a non-zero snowflake.
    fn validate_snowflake(field: &str, value: &str) -> Result<()> {
        match value.parse::<u64>() {
            Ok(0) | Err(_) => Err(Error::Config(format!(
                "Invalid {}: '{}'. Expected a numeric Discord id.",
                field, value
            ))),
            Ok(_) => Ok(()),
        }
    }

    /// Validate that the server address has a valid format.
    fn validate_server_address(address: &str) -> Result<()> {
        if !address.contains(':') {
            return Err(Error::Config(format!(
                "Invalid server.address format: '{}'. Expected 'host:port' format.",
                address
            )));
        }

        // Try to parse port
        if let Some((_, port_str)) = address.rsplit_once(':') {
            port_str.parse::<u16>().map_err(|_| {
                Error::Config(format!("Invalid port in server.address: '{}'", port_str))
            })?;
        }

        Ok(())
    }
}
