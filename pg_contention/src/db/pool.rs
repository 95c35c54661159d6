//! Connection pool construction.

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;

use crate::config::{DatabaseConfig, PoolConfig};
use crate::error::BootstrapError;

const APPLICATION_NAME: &str = "pg-contention";

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently open, idle or checked out
    pub size: u32,
    pub idle: usize,
}

impl PoolStats {
    pub fn of(pool: &PgPool) -> Self {
        Self {
            size: pool.size(),
            idle: pool.num_idle(),
        }
    }
}

fn connect_options(database: &DatabaseConfig) -> Result<PgConnectOptions, BootstrapError> {
    let options = match &database.url_override {
        Some(url) => url
            .parse::<PgConnectOptions>()
            .map_err(|source| BootstrapError::Connect {
                target: database.display_target(),
                source,
            })?,
        None => PgConnectOptions::new()
            .host(&database.host)
            .port(database.port)
            .username(&database.user)
            .password(&database.password)
            .database(&database.database)
            .ssl_mode(PgSslMode::Disable),
    };
    Ok(options.application_name(APPLICATION_NAME))
}

fn pool_options(pool: &PoolConfig) -> PgPoolOptions {
    // sqlx cannot cap idle connections; `max_idle` becomes the warm floor
    // and idle connections above it are reaped after `idle_timeout`.
    PgPoolOptions::new()
        .max_connections(pool.max_open)
        .min_connections(pool.max_idle.min(pool.max_open))
        .max_lifetime(pool.max_lifetime)
        .idle_timeout(pool.idle_timeout)
        .acquire_timeout(pool.acquire_timeout)
}

/// Open the shared pool and verify the server is reachable.
pub async fn connect(database: &DatabaseConfig, pool: &PoolConfig) -> Result<PgPool, BootstrapError> {
    let options = connect_options(database)?;

    tracing::info!(
        target_db = %database.display_target(),
        max_open = pool.max_open,
        max_idle = pool.max_idle,
        max_lifetime_secs = pool.max_lifetime.as_secs(),
        "Connecting to PostgreSQL"
    );

    pool_options(pool)
        .connect_with(options)
        .await
        .map_err(|source| BootstrapError::Connect {
            target: database.display_target(),
            source,
        })
}

/// Build the pool without opening any connection.
///
/// Connections are established on first use.
pub fn connect_lazy(database: &DatabaseConfig, pool: &PoolConfig) -> Result<PgPool, BootstrapError> {
    let options = connect_options(database)?;
    Ok(pool_options(pool)
        .min_connections(0)
        .connect_lazy_with(options))
}
