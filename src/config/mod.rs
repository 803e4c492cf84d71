//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or malformed.
//! The database URL is wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use chrono::Duration;
use secrecy::SecretString;

const DEFAULT_COOLDOWN_DAYS: i64 = 30;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// How long a posted record stays out of rotation.
    pub cooldown: Duration,
    pub max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").ok_or_else(|| {
            Error::Config("required environment variable DATABASE_URL is not set".to_string())
        })?;

        let cooldown = match lookup("ROTATION_COOLDOWN_DAYS") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|days| *days >= 0)
                .and_then(Duration::try_days)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "ROTATION_COOLDOWN_DAYS must be a non-negative integer, got {raw:?}"
                    ))
                })?,
            None => Duration::days(DEFAULT_COOLDOWN_DAYS),
        };

        let max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "DB_MAX_CONNECTIONS must be a positive integer, got {raw:?}"
                    ))
                })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url: SecretString::from(database_url),
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            cooldown,
            max_connections,
        })
    }
}
