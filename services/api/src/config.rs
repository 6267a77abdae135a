//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// SMTP delivery settings. Absent entirely when SMTP_HOST is unset, in which
/// case outbound email is logged instead of sent.
#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    pub smtp: Option<SmtpConfig>,
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

        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());

        // --- Load SMTP Settings (as optional) ---
        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) => {
                let port_str = std::env::var("SMTP_PORT").unwrap_or_else(|_| "587".to_string());
                let port = port_str.parse::<u16>().map_err(|e| {
                    ConfigError::InvalidValue("SMTP_PORT".to_string(), e.to_string())
                })?;
                let from_address = std::env::var("SMTP_FROM")
                    .map_err(|_| ConfigError::MissingVar("SMTP_FROM".to_string()))?;
                Some(SmtpConfig {
                    host,
                    port,
                    username: std::env::var("SMTP_USERNAME").ok(),
                    password: std::env::var("SMTP_PASSWORD").ok(),
                    from_address,
                })
            }
            Err(_) => None,
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            smtp,
        })
    }
}
