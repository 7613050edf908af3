//! # Database Migrations
//!
//! SQL files under `migrations/sqlite/` at the workspace root, embedded at
//! compile time and applied in filename order. Applied migrations are
//! recorded in `_sqlx_migrations`.
//!
//! ## Adding New Migrations
//!
//! 1. Add `NNN_description.sql` with the next sequence number
//! 2. Use `IF NOT EXISTS` where possible
//! 3. **NEVER** modify an applied migration - add a new one

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies pending migrations. Safe to run on every start.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!(
        available = MIGRATOR.migrations.len(),
        "Checking for pending migrations"
    );
    MIGRATOR.run(pool).await?;
    info!("All migrations applied successfully");
    Ok(())
}

/// (total embedded, applied) for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await?;
    Ok((total, applied as usize))
}
