//! Database connections resolved from symbolic connection ids
//!
//! A connection id such as `db_origem` maps to the environment variable
//! `ETL_CONN_DB_ORIGEM`, which holds the Postgres URL. Credentials therefore
//! never appear in the pipeline configuration itself.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

pub const CONNECTION_ENV_PREFIX: &str = "ETL_CONN_";

/// Pool settings shared by every connection the pipeline opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 0,
            connect_timeout_secs: 30,
            idle_timeout_secs: Some(600),
            max_lifetime_secs: Some(1800),
        }
    }
}

impl PoolSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_connections),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_connections),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.connect_timeout_secs),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(defaults.idle_timeout_secs),
            max_lifetime_secs: std::env::var("DB_MAX_LIFETIME")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(defaults.max_lifetime_secs),
        }
    }

    fn pool_options(&self) -> PgPoolOptions {
        let mut options = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs));

        if let Some(idle_timeout) = self.idle_timeout_secs {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }
        if let Some(max_lifetime) = self.max_lifetime_secs {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        options
    }
}

/// Resolves connection ids to Postgres pools
#[derive(Debug, Clone, Default)]
pub struct ConnectionProvider {
    settings: PoolSettings,
}

impl ConnectionProvider {
    pub fn new(settings: PoolSettings) -> Self {
        Self { settings }
    }

    pub fn from_env() -> Self {
        Self::new(PoolSettings::from_env())
    }

    /// Name of the variable holding the URL for `conn_id`
    pub fn env_var_for(conn_id: &str) -> String {
        let suffix: String = conn_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}", CONNECTION_ENV_PREFIX, suffix)
    }

    pub fn resolve_url(&self, conn_id: &str) -> PipelineResult<String> {
        let env_var = Self::env_var_for(conn_id);
        match std::env::var(&env_var) {
            Ok(url) if !url.trim().is_empty() => Ok(url),
            _ => Err(PipelineError::ConnectionNotConfigured {
                conn_id: conn_id.to_string(),
                env_var,
            }),
        }
    }

    /// Build a pool without connecting
    ///
    /// Connectivity problems surface on first use, inside whichever unit of
    /// work issues the first query.
    pub fn connect_lazy(&self, conn_id: &str) -> PipelineResult<PgPool> {
        let url = self.resolve_url(conn_id)?;
        self.settings
            .pool_options()
            .connect_lazy(&url)
            .map_err(|source| PipelineError::Connection {
                conn_id: conn_id.to_string(),
                source,
            })
    }

    /// Build a pool and open its first connection eagerly
    pub async fn connect(&self, conn_id: &str) -> PipelineResult<PgPool> {
        let url = self.resolve_url(conn_id)?;
        let pool = self
            .settings
            .pool_options()
            .connect(&url)
            .await
            .map_err(|source| PipelineError::Connection {
                conn_id: conn_id.to_string(),
                source,
            })?;

        tracing::info!(
            conn_id,
            max_connections = self.settings.max_connections,
            "Database connection pool created"
        );

        Ok(pool)
    }
}

pub async fn health_check(pool: &PgPool, conn_id: &str) -> PipelineResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|source| PipelineError::Connection {
            conn_id: conn_id.to_string(),
            source,
        })
}
