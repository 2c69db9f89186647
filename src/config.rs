//! Service configuration
//!
//! Read once at startup from the environment (after `.env` is loaded). A
//! missing or weak signing secret refuses to start the service.

use crate::auth::{access::RuleError, jwt::TOKEN_TTL_SECS, AccessRules, AuthSettings};
use axum::http::HeaderName;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// HS256 secrets shorter than this are rejected.
pub const MIN_SECRET_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JWT_SECRET is not set")]
    MissingSecret,
    #[error("JWT_SECRET must be at least 32 bytes, got {0}")]
    WeakSecret(usize),
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
    #[error("invalid access rules in {path}: {source}")]
    InvalidRules {
        path: PathBuf,
        #[source]
        source: RuleError,
    },
}

pub struct Config {
    pub jwt_secret: Vec<u8>,
    pub token_ttl_secs: i64,
    pub auth: AuthSettings,
    pub rules: AccessRules,
    pub rules_path: Option<PathBuf>,
    pub db_path: String,
    pub bcrypt_cost: u32,
    pub store_timeout: Duration,
    pub bind_addr: SocketAddr,
    pub cors_origins: Vec<String>,
}

// Hand-written so the secret never reaches a log line.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("auth", &self.auth)
            .field("rules", &self.rules.len())
            .field("rules_path", &self.rules_path)
            .field("db_path", &self.db_path)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("store_timeout", &self.store_timeout)
            .field("bind_addr", &self.bind_addr)
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = var("JWT_SECRET").ok_or(ConfigError::MissingSecret)?.into_bytes();
        if jwt_secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::WeakSecret(jwt_secret.len()));
        }

        let token_ttl_secs = parse_or(var("JWT_TTL_SECS"), "JWT_TTL_SECS", TOKEN_TTL_SECS)?;
        if token_ttl_secs <= 0 {
            return Err(invalid("JWT_TTL_SECS", "must be positive"));
        }

        let header_name = match var("AUTH_HEADER") {
            Some(name) => HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|e| invalid("AUTH_HEADER", e))?,
            None => axum::http::header::AUTHORIZATION,
        };
        // The prefix is used verbatim, trailing space included.
        let bearer_prefix = lookup("AUTH_BEARER_PREFIX").unwrap_or_else(|| "Bearer ".to_string());
        let login_path = var("LOGIN_PATH").unwrap_or_else(|| "/login".to_string());
        if !login_path.starts_with('/') {
            return Err(invalid("LOGIN_PATH", "must start with '/'"));
        }

        let rules_path = var("ACCESS_RULES_PATH").map(PathBuf::from);
        let rules = match &rules_path {
            Some(path) => AccessRules::from_file(path).map_err(|source| ConfigError::InvalidRules {
                path: path.clone(),
                source,
            })?,
            None => AccessRules::default_rules(),
        };

        let bcrypt_cost = parse_or(var("BCRYPT_COST"), "BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(invalid("BCRYPT_COST", "must be between 4 and 31"));
        }

        let store_timeout_ms: u64 =
            parse_or(var("USER_STORE_TIMEOUT_MS"), "USER_STORE_TIMEOUT_MS", 2000)?;
        if store_timeout_ms == 0 {
            return Err(invalid("USER_STORE_TIMEOUT_MS", "must be positive"));
        }

        let bind_addr = match var("BIND_ADDR") {
            Some(addr) => addr.trim().parse().map_err(|e| invalid("BIND_ADDR", e))?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let cors_origins = var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:4200".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            jwt_secret,
            token_ttl_secs,
            auth: AuthSettings {
                header_name,
                bearer_prefix,
                login_path,
            },
            rules,
            rules_path,
            db_path: var("AUTH_DB_PATH").unwrap_or_else(|| "gatekeeper_auth.db".to_string()),
            bcrypt_cost,
            store_timeout: Duration::from_millis(store_timeout_ms),
            bind_addr,
            cors_origins,
        })
    }
}

fn invalid(name: &'static str, reason: impl fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        reason: reason.to_string(),
    }
}

fn parse_or<T>(value: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match value {
        Some(raw) => raw.trim().parse().map_err(|e| invalid(name, e)),
        None => Ok(default),
    }
}
