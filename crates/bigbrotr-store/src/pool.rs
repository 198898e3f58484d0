//! Pool construction (§4.1 "Connection model").
//!
//! Ported from `chem-persistence::pg::build_pool` (validate min/max sizing)
//! and the root `src/config.rs::create_pool` auto-create-database fallback
//! (connect, and on SQLSTATE `3D000` "database does not exist", connect to
//! the `postgres` maintenance database and issue `CREATE DATABASE`).

use crate::error::StorageError;
use bigbrotr_core::{PoolConfig, TypedError};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, Pool, Postgres};
use std::time::Duration;

pub type PgPool = Pool<Postgres>;

fn connection_url(config: &PoolConfig, password: &str) -> String {
    format!(
        "postgres://{user}:{password}@{host}:{port}/{database}",
        user = config.user,
        password = password,
        host = config.host,
        port = config.port,
        database = config.database,
    )
}

/// Builds an async Postgres pool from a [`PoolConfig`], reading the
/// password from the environment variable the config names. If the target
/// database does not exist (SQLSTATE `3D000`), connects to the `postgres`
/// maintenance database and creates it before retrying once. Transient
/// failures during acquisition (connection refused, pool timeout) are
/// retried with capped exponential backoff per `config.retry` (§4.1); on
/// exhaustion the caller gets the last transient error.
pub async fn build_pool(config: &PoolConfig) -> Result<PgPool, StorageError> {
    let password = std::env::var(&config.password_env)
        .map_err(|_| StorageError::Permanent(format!("environment variable {} not set", config.password_env)))?;
    let url = connection_url(config, &password);

    let (min, max) = if config.min_size > config.max_size {
        tracing::warn!(min = config.min_size, max = config.max_size, "pool min_size > max_size, clamping min to max");
        (config.max_size, config.max_size)
    } else {
        (config.min_size, config.max_size)
    };

    let statement_timeout_ms = config.statement_timeout_ms;
    let options = PgPoolOptions::new()
        .min_connections(min)
        .max_connections(max)
        .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                conn.execute(format!("SET statement_timeout = {statement_timeout_ms}").as_str()).await?;
                Ok(())
            })
        });

    connect_with_retry(&options, &url, config, &password).await
}

/// Retries `options.connect(url)` with capped exponential backoff while
/// the failure is retryable per `ErrorKind::is_retryable`. The
/// database-missing path runs once, outside the retry loop, since it is
/// self-healing rather than transient.
async fn connect_with_retry(options: &PgPoolOptions, url: &str, config: &PoolConfig, password: &str) -> Result<PgPool, StorageError> {
    let mut attempt = 0u32;
    loop {
        match options.connect(url).await {
            Ok(pool) => return Ok(pool),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("3D000") => {
                tracing::warn!(database = %config.database, "target database missing, attempting to create it");
                ensure_database_exists(config, password).await?;
                return options.connect(url).await.map_err(StorageError::from);
            }
            Err(e) => {
                let err = StorageError::from(e);
                if !err.kind().is_retryable() {
                    return Err(err);
                }
                if attempt + 1 >= config.retry.max_attempts {
                    tracing::error!(attempt, error = %err, "pool acquisition exhausted retries");
                    return Err(err);
                }
                let delay = config.retry.delay_for(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient pool acquisition error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

async fn ensure_database_exists(config: &PoolConfig, password: &str) -> Result<(), StorageError> {
    if !config.database.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(StorageError::Permanent(format!("refusing to auto-create database with unsafe name: {}", config.database)));
    }
    let mut admin_config = config.clone();
    admin_config.database = "postgres".to_string();
    let admin_url = connection_url(&admin_config, password);
    let admin_pool = PgPoolOptions::new().max_connections(1).connect(&admin_url).await.map_err(StorageError::from)?;

    let exists: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pg_database WHERE datname = $1")
        .bind(&config.database)
        .fetch_one(&admin_pool)
        .await
        .map_err(StorageError::from)?;

    if exists.0 == 0 {
        let create_stmt = format!("CREATE DATABASE \"{}\"", config.database.replace('"', ""));
        admin_pool.execute(create_stmt.as_str()).await.map_err(StorageError::from)?;
        tracing::info!(database = %config.database, "database created");
    }
    Ok(())
}
