//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    /// Shared secret the bearer tokens are signed and verified with.
    pub token_secret: String,
    /// How long an issued token stays valid.
    pub token_ttl: Duration,
    /// Deliberate pause between a confirmed user turn and the start of
    /// generation. Cosmetic pacing only; zero is a valid setting.
    pub reply_delay: Duration,
    pub allowed_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Auth Settings ---
        let token_secret = std::env::var("TOKEN_SECRET")
            .map_err(|_| ConfigError::MissingVar("TOKEN_SECRET".to_string()))?;

        let token_ttl_hours = parse_var_or("TOKEN_TTL_HOURS", 24 * 7)?;
        let token_ttl = Duration::from_secs(token_ttl_hours * 3600);

        // --- Load API Keys (as optional) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        // --- Load Adapter-specific Settings ---
        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let reply_delay_ms = parse_var_or("REPLY_DELAY_MS", 1000)?;
        let reply_delay = Duration::from_millis(reply_delay_ms);

        let allowed_origin = std::env::var("ALLOWED_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            chat_model,
            token_secret,
            token_ttl,
            reply_delay,
            allowed_origin,
        })
    }
}

fn parse_var_or(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    /// A fixed configuration for unit tests; no environment access.
    pub fn for_tests() -> Self {
        Self {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            database_url: "postgres://localhost/test".to_string(),
            log_level: Level::DEBUG,
            openai_api_key: None,
            chat_model: "gpt-4o".to_string(),
            token_secret: "test-secret".to_string(),
            token_ttl: Duration::from_secs(3600),
            reply_delay: Duration::ZERO,
            allowed_origin: "http://localhost:3000".to_string(),
        }
    }
}
