//! Process configuration read from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use loanportal_infra::ServiceSettings;
use loanportal_infra::services::SeedAdmin;

const DEV_SECRET: &str = "dev-secret";
/// One year.
const MAX_TOKEN_TTL_MINUTES: i64 = 525_600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is not valid: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub loan_cache_ttl: Duration,
    pub directory_cache_ttl: Duration,
    pub seed_admin: SeedAdmin,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            database_max_connections: 10,
            jwt_secret: DEV_SECRET.to_string(),
            token_ttl_minutes: 1440,
            loan_cache_ttl: Duration::from_secs(60),
            directory_cache_ttl: Duration::from_secs(300),
            seed_admin: SeedAdmin {
                name: "Super Admin".to_string(),
                email: "admin@example.com".to_string(),
                password: "Super@2025".to_string(),
            },
        }
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Builds a config from any key lookup; absent keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let jwt_secret = lookup("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; using insecure dev default");
            defaults.jwt_secret.clone()
        });

        let token_ttl_minutes = parsed(&lookup, "TOKEN_TTL_MINUTES", defaults.token_ttl_minutes)?;
        if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&token_ttl_minutes) {
            return Err(ConfigError::Invalid {
                key: "TOKEN_TTL_MINUTES",
                value: token_ttl_minutes.to_string(),
            });
        }

        Ok(Self {
            bind_addr: parsed(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            database_url: lookup("DATABASE_URL"),
            database_max_connections: parsed(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            jwt_secret,
            token_ttl_minutes,
            loan_cache_ttl: Duration::from_secs(parsed(
                &lookup,
                "LOAN_CACHE_TTL_SECS",
                defaults.loan_cache_ttl.as_secs(),
            )?),
            directory_cache_ttl: Duration::from_secs(parsed(
                &lookup,
                "DIRECTORY_CACHE_TTL_SECS",
                defaults.directory_cache_ttl.as_secs(),
            )?),
            seed_admin: SeedAdmin {
                name: lookup("SEED_ADMIN_NAME").unwrap_or(defaults.seed_admin.name),
                email: lookup("SEED_ADMIN_EMAIL").unwrap_or(defaults.seed_admin.email),
                password: lookup("SEED_ADMIN_PASSWORD").unwrap_or(defaults.seed_admin.password),
            },
        })
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            token_ttl: chrono::Duration::minutes(self.token_ttl_minutes),
            loan_cache_ttl: self.loan_cache_ttl,
            directory_cache_ttl: self.directory_cache_ttl,
        }
    }
}
