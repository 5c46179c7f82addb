//! Durable persistence layer: a single embedded SQLite database accessed
//! through a bounded connection pool, with write-ahead logging and
//! numbered migrations tracked in `_migrations`.
//!
//! Every routing, execution, and task mutation goes through [`Store`];
//! there is no in-memory cache that influences control flow, so a crash
//! at any point leaves the database as the single source of truth.

pub mod agents;
pub mod attachments;
pub mod comments;
pub mod executions;
pub mod migrations;
pub mod routing;
pub mod tasks;
pub mod workspaces;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Maximum attempts for a write that hits a busy/locked SQLite error.
const MAX_BUSY_RETRIES: u32 = 3;
/// Base delay for the busy-retry backoff; doubles each attempt, capped at
/// one second.
const BUSY_RETRY_BASE: Duration = Duration::from_millis(100);
const BUSY_RETRY_CAP: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Open (creating if absent) the SQLite database at `path`, set WAL
    /// mode, a 5-second busy timeout, and foreign-key enforcement, then
    /// run any outstanding migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .pragma("journal_mode", "WAL")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Closes every idle connection and waits for in-use ones to finish,
    /// for a clean shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        for migration in migrations::ALL {
            let already_applied: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM _migrations WHERE name = ?1")
                    .bind(migration.name)
                    .fetch_optional(&self.pool)
                    .await?;
            if already_applied.is_some() {
                continue;
            }

            info!(migration = migration.name, "applying migration");
            self.with_retry(|| async {
                let mut tx = self.pool.begin().await?;
                sqlx::query(migration.sql).execute(&mut *tx).await?;
                sqlx::query("INSERT INTO _migrations (name, applied_at) VALUES (?1, ?2)")
                    .bind(migration.name)
                    .bind(crate::domain::ids::now_millis())
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(())
            })
            .await?;
        }
        Ok(())
    }

    /// Runs `f` inside a single SQLite transaction: every write it issues
    /// through the borrowed `Transaction` commits or rolls back together.
    /// The whole transaction is retried, from `BEGIN`, up to
    /// [`MAX_BUSY_RETRIES`] times with exponential backoff when SQLite
    /// reports the database busy or locked.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        for<'c> F: Fn(&'c mut sqlx::Transaction<'static, Sqlite>) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>,
    {
        self.with_retry(|| async {
            let mut tx = self.pool.begin().await?;
            match f(&mut tx).await {
                Ok(value) => {
                    tx.commit().await?;
                    Ok(value)
                }
                Err(e) => {
                    tx.rollback().await?;
                    Err(e)
                }
            }
        })
        .await
    }

    async fn with_retry<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = BUSY_RETRY_BASE;
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(Error::Database(sqlx::Error::Database(db_err)))
                    if is_busy(db_err.message()) && attempt < MAX_BUSY_RETRIES =>
                {
                    attempt += 1;
                    warn!(attempt, "database busy, retrying after backoff");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(BUSY_RETRY_CAP);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_busy(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("busy") || m.contains("locked")
}
