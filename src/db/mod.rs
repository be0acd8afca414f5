//! Database connection pool, migrations, and health check.
//!
//! SQLite is the device storage primitive: one `records` table of
//! key/value JSON documents. WAL journal with `synchronous=FULL`, so a
//! completed write survives an abrupt process exit and a crash mid-write
//! leaves the previous value intact.

pub mod queue;
pub mod records;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

/// Database handle. Owns the connection pool shared by the queue store and
/// the scheduler's registration records.
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (creating if missing) the database file at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create a migrated in-memory database (for testing).
    ///
    /// The pool is pinned to one connection that never expires; the
    /// database lives exactly as long as that connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Round-trip a `SELECT 1`.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
