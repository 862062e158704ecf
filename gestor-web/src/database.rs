use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{migrate::MigrateDatabase, Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        if let Some(db_path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let in_memory = database_url.contains(":memory:");
        if !in_memory && !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            tracing::info!("Creating database at {}", database_url);
            Sqlite::create_database(database_url).await?;
        }

        // An in-memory database lives and dies with its connection, so the
        // pool is pinned to exactly one that never expires.
        let options = if in_memory {
            sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .max_lifetime(None)
                .idle_timeout(None)
        } else {
            sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(20)
                .min_connections(5)
                .max_lifetime(Some(Duration::from_secs(30 * 60)))
                .idle_timeout(Some(Duration::from_secs(10 * 60)))
        };

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = options
            .acquire_timeout(Duration::from_secs(30))
            .test_before_acquire(true)
            .connect_with(connect_options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(self.pool()).await?;
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(self.pool()).await?;
        Ok(())
    }
}
