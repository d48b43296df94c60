//! Bootstrap utilities for embedding applications.
//!
//! Tracing setup and connection pool provisioning from
//! [`StorageConfig`](crate::config::StorageConfig).

use std::future::Future;
use std::time::Duration;

use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the KVDEX_LOG environment variable.
///
/// Defaults to "info" level if KVDEX_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Open a SQLite pool for the configured database file (or memory).
#[cfg(feature = "sqlite")]
pub async fn connect_sqlite(
    config: &crate::config::StorageConfig,
) -> crate::error::Result<sqlx::SqlitePool> {
    use sqlx::sqlite::SqlitePoolOptions;

    let url = config.sqlite.url();
    let url = url.as_str();
    // Every connection to `sqlite::memory:` opens a distinct database.
    let max_connections = if config.sqlite.path.is_some() {
        config.max_connections
    } else {
        1
    };

    let pool = connect_with_retry("sqlite", || {
        SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
    })
    .await?;
    Ok(pool)
}

/// Open a PostgreSQL pool, retrying while the server comes up.
#[cfg(feature = "postgres")]
pub async fn connect_postgres(
    config: &crate::config::StorageConfig,
) -> crate::error::Result<sqlx::PgPool> {
    use sqlx::postgres::PgPoolOptions;

    let uri = config.postgres.uri.as_str();
    let pool = connect_with_retry("postgres", || {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(uri)
    })
    .await?;
    Ok(pool)
}

/// Run `connect` until a pool opens, doubling the pause between attempts.
pub(crate) async fn connect_with_retry<T, E, F, Fut>(
    backend: &str,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    const MAX_ATTEMPTS: u32 = 10;
    const MAX_DELAY: Duration = Duration::from_secs(5);

    let mut delay = Duration::from_millis(100);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match connect().await {
            Ok(pool) => {
                tracing::info!(backend, attempt, "Storage pool open");
                return Ok(pool);
            }
            Err(error) if attempt < MAX_ATTEMPTS => {
                warn!(backend, attempt, %error, ?delay, "Storage pool not ready, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(error) => {
                tracing::error!(backend, attempts = attempt, %error, "Giving up on storage pool");
                return Err(error);
            }
        }
    }
}
