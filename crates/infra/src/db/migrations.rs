use sqlx::migrate::Migrator;
use tracing::info;

use super::{DbPool, DbPoolError};

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_migrations(pool: &DbPool) -> Result<(), DbPoolError> {
    MIGRATOR.run(pool).await?;
    info!(known = MIGRATOR.iter().count(), "database migrations applied");
    Ok(())
}
