//! Federation store database schema.

use sqlx::migrate::Migrator;

/// Migrations for the federation store and the local `events` table,
/// embedded from the workspace `migrations/` directory.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
