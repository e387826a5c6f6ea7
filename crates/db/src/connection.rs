use std::str::FromStr;
use std::time::Duration;

use aureus_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

/// Opens the pool described by `[database]`. File databases are created on
/// first use and run in WAL mode; `timeout_secs` bounds both pool acquisition
/// and lock waits.
pub async fn connect(database: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    let timeout = Duration::from_secs(database.timeout_secs.max(1));
    let options = SqliteConnectOptions::from_str(database.url.trim())?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(database.max_connections.max(1))
        .acquire_timeout(timeout)
        .connect_with(options)
        .await?;

    tracing::debug!(
        event_name = "db.connected",
        url = %database.url,
        max_connections = database.max_connections,
        "database pool ready"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use aureus_core::config::DatabaseConfig;
    use sqlx::Row;
    use tempfile::TempDir;

    use super::connect;

    #[tokio::test]
    async fn file_database_is_created_in_wal_mode() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("governance.db");
        let database = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            max_connections: 2,
            timeout_secs: 5,
        };

        let pool = connect(&database).await.expect("connect");
        let mode: String = sqlx::query("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("journal mode")
            .get(0);
        pool.close().await;

        assert_eq!(mode.to_lowercase(), "wal");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn missing_parent_directory_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let database = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("absent").join("governance.db").display()),
            max_connections: 1,
            timeout_secs: 1,
        };
        assert!(connect(&database).await.is_err());
    }

    #[tokio::test]
    async fn in_memory_settings_connect() {
        let pool = connect(&DatabaseConfig::in_memory()).await.expect("connect");
        let one: i64 = sqlx::query("SELECT 1").fetch_one(&pool).await.expect("select").get(0);
        assert_eq!(one, 1);
    }
}
