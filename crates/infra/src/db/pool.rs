use std::time::Duration;

use sqlx::migrate::MigrateError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

pub type DbPool = PgPool;

const MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum DbPoolError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("sqlx migrate error: {0}")]
    Migrate(#[from] MigrateError),
}

pub fn connect_lazy(database_url: &str, acquire_timeout: Duration) -> Result<DbPool, DbPoolError> {
    Ok(PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(acquire_timeout)
        .connect_lazy(database_url)?)
}
