//! Configuration module - environment variable parsing

use std::env;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Match relay endpoint (ws:// or wss://)
    pub relay_url: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Enable the legacy fixed-interval tower-hp re-broadcast loop.
    /// The event-driven broadcast stays on either way.
    pub tower_hp_poll: bool,
    /// Prompt submitted by the headless reference client once matched
    pub prompt: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let relay_url = env::var("RELAY_URL").map_err(|_| ConfigError::Missing("RELAY_URL"))?;

        if !relay_url.starts_with("ws://") && !relay_url.starts_with("wss://") {
            return Err(ConfigError::InvalidRelayUrl);
        }

        Ok(Self {
            relay_url,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tower_hp_poll: env::var("TOWER_HP_POLL")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            prompt: env::var("PROMPT").ok(),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("RELAY_URL must be a ws:// or wss:// address")]
    InvalidRelayUrl,
}
