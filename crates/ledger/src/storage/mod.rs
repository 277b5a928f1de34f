//! SQLite-backed persistence.
//!
//! One [`Storage`] handle wraps the connection pool; the per-domain modules
//! (`event`, `batch`, `escrow`) hang their queries off it. Every write that
//! touches both the log and a projection runs inside a single transaction
//! obtained from [`Storage::begin`], so the two can never drift apart.

mod batch;
mod escrow;
mod event;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

/// Handle to the ledger database.
#[derive(Clone, Debug)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (creating if missing) the database at `database_url`.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Failed to parse database URL")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// In-memory database for tests. Single connection: SQLite gives every
    /// `:memory:` connection its own database.
    pub async fn in_memory() -> Result<Self> {
        let storage = Self::new("sqlite::memory:", 1).await?;
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Apply any pending schema migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Begin a write transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin transaction")
    }

    /// The underlying pool, for read-only queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness probe.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    /// Close the pool, flushing outstanding connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
