//! Persistent storage for the tunnl control plane
//!
//! SeaORM entities and migrations for the session registry. SQLite
//! (including `sqlite::memory:` in tests) and Postgres are supported.

pub mod entities;
pub mod migrator;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

pub use migrator::Migrator;

/// Connect to the database at `database_url`
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;
    info!(backend = ?db.get_database_backend(), "Database connected");
    Ok(db)
}

/// Apply all pending migrations
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    Migrator::up(db, None).await?;
    info!("Database migrations applied");
    Ok(())
}
