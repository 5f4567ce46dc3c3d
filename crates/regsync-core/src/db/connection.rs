//! Database connection management

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use super::migrations;
use crate::error::Result;

/// Connection-level settings for the registry store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a writer waits on a lock held by a concurrent run
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(30),
        }
    }
}

impl StoreConfig {
    /// Set the lock wait bound
    #[must_use]
    pub const fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// Database wrapper for the `SQLite` registry
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let mut database = Self { conn };
        database.configure(config)?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut database = Self { conn };
        database.configure(&StoreConfig::default())?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for a single-writer batch job
    fn configure(&self, config: &StoreConfig) -> Result<()> {
        // WAL is unavailable for in-memory databases; ignore the failure there
        self.conn
            .pragma_update(None, "journal_mode", "WAL")
            .ok();
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.busy_timeout(config.busy_timeout)?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&mut self) -> Result<()> {
        migrations::run(&mut self.conn)
    }

    /// Begin the write transaction that scopes one reconciliation run.
    ///
    /// IMMEDIATE takes the write lock up front, so a concurrent run waits
    /// (bounded by the busy timeout) instead of reading stale state.
    pub fn begin_run(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let version: i32 = db
            .connection()
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert!(version >= 1);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("registry.db");

        let db = Database::open(&path, &StoreConfig::default()).unwrap();
        drop(db);

        assert!(path.exists());
    }

    #[test]
    fn test_store_config_busy_timeout() {
        let config = StoreConfig::default().with_busy_timeout(Duration::from_secs(5));
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_begin_run_rolls_back_when_dropped() {
        let mut db = Database::open_in_memory().unwrap();
        {
            let tx = db.begin_run().unwrap();
            tx.execute(
                "INSERT INTO devices (identifier, created_at, updated_at) VALUES ('111', 1, 1)",
                [],
            )
            .unwrap();
        }

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_concurrent_run_waits_then_times_out() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("registry.db");
        let config = StoreConfig::default().with_busy_timeout(Duration::from_millis(50));

        let mut first = Database::open(&path, &config).unwrap();
        let mut second = Database::open(&path, &config).unwrap();

        let held = first.begin_run().unwrap();
        let error = second.begin_run().unwrap_err();
        assert!(error.to_string().contains("locked"));

        held.commit().unwrap();
        second.begin_run().unwrap();
    }
}
