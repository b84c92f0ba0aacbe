//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::Duration;
use conduz_core::invitations::{
    InvitationPolicy, RelinkPolicy, DEFAULT_INVITATION_TTL_DAYS, DEFAULT_USAGE_LIMIT,
};
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

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// A Postgres URL, or `memory` for the in-process store.
    pub database_url: String,
    pub log_level: Level,
    pub public_base_url: String,
    pub cors_origin: String,
    pub session_ttl: Duration,
    pub invitation_ttl: Duration,
    pub invitation_usage_limit: Option<u32>,
    pub relink_policy: RelinkPolicy,
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

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());

        // --- Load Session and Invitation Policy ---
        let session_ttl = Duration::hours(positive_var("SESSION_TTL_HOURS", 72)?);
        let invitation_ttl =
            Duration::days(positive_var("INVITATION_TTL_DAYS", DEFAULT_INVITATION_TTL_DAYS)?);

        let invitation_usage_limit = match std::env::var("INVITATION_USAGE_LIMIT") {
            Err(_) => DEFAULT_USAGE_LIMIT,
            Ok(raw) => parse_usage_limit(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "INVITATION_USAGE_LIMIT".to_string(),
                    format!(
                        "'{}' is neither 'unlimited' nor a positive integer up to {}",
                        raw,
                        i32::MAX
                    ),
                )
            })?,
        };

        let relink_policy = match std::env::var("RELINK_POLICY") {
            Err(_) => RelinkPolicy::default(),
            Ok(raw) => parse_relink_policy(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "RELINK_POLICY".to_string(),
                    format!("'{}' must be 'reject' or 'overwrite'", raw),
                )
            })?,
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            public_base_url,
            cors_origin,
            session_ttl,
            invitation_ttl,
            invitation_usage_limit,
            relink_policy,
        })
    }

    /// The one place the invitation settings are assembled.
    pub fn invitation_policy(&self) -> InvitationPolicy {
        InvitationPolicy {
            ttl: self.invitation_ttl,
            usage_limit: self.invitation_usage_limit,
            relink: self.relink_policy,
        }
    }
}

fn positive_var(name: &str, default: i64) -> Result<i64, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{}' is not a positive integer", raw),
            )),
        },
    }
}

/// `Some(None)` is unlimited; `None` is unparseable.
fn parse_usage_limit(raw: &str) -> Option<Option<u32>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("unlimited") {
        return Some(None);
    }
    // Stored in an INTEGER column, so the ceiling is i32::MAX.
    match raw.parse::<u32>() {
        Ok(limit) if limit > 0 && i32::try_from(limit).is_ok() => Some(Some(limit)),
        _ => None,
    }
}

fn parse_relink_policy(raw: &str) -> Option<RelinkPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "reject" => Some(RelinkPolicy::Reject),
        "overwrite" => Some(RelinkPolicy::Overwrite),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_limit_values() {
        assert_eq!(parse_usage_limit("unlimited"), Some(None));
        assert_eq!(parse_usage_limit(" Unlimited "), Some(None));
        assert_eq!(parse_usage_limit("1"), Some(Some(1)));
        assert_eq!(parse_usage_limit("25"), Some(Some(25)));
        assert_eq!(parse_usage_limit("0"), None);
        assert_eq!(parse_usage_limit("-3"), None);
        assert_eq!(parse_usage_limit("lots"), None);
        assert_eq!(parse_usage_limit("2147483647"), Some(Some(2_147_483_647)));
        assert_eq!(parse_usage_limit("2147483648"), None);
        assert_eq!(parse_usage_limit("4294967295"), None);
    }

    #[test]
    fn relink_policy_values() {
        assert_eq!(parse_relink_policy("reject"), Some(RelinkPolicy::Reject));
        assert_eq!(parse_relink_policy("OVERWRITE"), Some(RelinkPolicy::Overwrite));
        assert_eq!(parse_relink_policy("merge"), None);
    }
}
