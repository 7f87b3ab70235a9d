use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::config::DatabaseConfig;

/// Open a connection pool to the ledger database.
///
/// File-backed databases are created if they do not exist. In-memory databases
/// are restricted to a single connection so every caller sees the same data.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool, sqlx::Error> {
    let dsn = config.dsn.as_str();
    log::info!("Connecting to ledger database with DSN: {dsn}");

    let in_memory = dsn.contains(":memory:");
    let dsn_with_create = if in_memory || dsn.contains("mode=") {
        dsn.to_string()
    } else if dsn.contains('?') {
        format!("{dsn}&mode=rwc")
    } else {
        format!("{dsn}?mode=rwc")
    };

    let mut options = SqlitePoolOptions::new();
    if in_memory {
        options = options.max_connections(1).idle_timeout(None).max_lifetime(None);
    }

    let pool = options.connect(&dsn_with_create).await.map_err(|e| {
        log::error!("Failed to connect to SQLite database with DSN '{dsn_with_create}': {e}");
        e
    })?;

    log::info!("Database connection established successfully");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_pool_shares_state() {
        let pool = connect(&DatabaseConfig::in_memory()).await.unwrap();

        sqlx::query("CREATE TABLE block (height INTEGER NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO block (height) VALUES (7)")
            .execute(&pool)
            .await
            .unwrap();

        let height: i64 = sqlx::query_scalar("SELECT MAX(height) FROM block")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(height, 7);
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let config = DatabaseConfig {
            dsn: format!("sqlite://{}", path.display()),
        };

        let pool = connect(&config).await.unwrap();
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
        assert!(path.exists());
    }
}
