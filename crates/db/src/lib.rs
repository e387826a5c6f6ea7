pub mod connection;
pub mod kv;
pub mod migrations;

use aureus_core::config::DatabaseConfig;

pub use connection::{connect, DbPool};
pub use kv::SqliteKvStore;

/// Connects and applies pending migrations.
pub async fn open(database: &DatabaseConfig) -> Result<SqliteKvStore, sqlx::Error> {
    let pool = connect(database).await?;
    migrations::run_pending(&pool).await?;
    Ok(SqliteKvStore::new(pool))
}
