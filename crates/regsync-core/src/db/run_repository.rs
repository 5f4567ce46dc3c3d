//! Sync run history repository

#![allow(clippy::cast_possible_wrap)] // SQLite stores counts as i64

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{NotificationStatus, SyncRun, SyncStats};

/// Trait for run history storage operations
pub trait RunRepository {
    /// Record a finished run
    fn record(&self, run: &SyncRun) -> Result<()>;

    /// Update the notification status of a run
    fn set_notification(&self, run_id: &str, status: &NotificationStatus) -> Result<()>;

    /// Get a run by ID
    fn get(&self, run_id: &str) -> Result<Option<SyncRun>>;

    /// List runs, newest first
    fn list(&self, limit: usize) -> Result<Vec<SyncRun>>;
}

/// `SQLite` implementation of `RunRepository`
pub struct SqliteRunRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRunRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRun> {
        let count = |index: usize| -> rusqlite::Result<usize> {
            Ok(usize::try_from(row.get::<_, i64>(index)?).unwrap_or_default())
        };
        let notification: String = row.get(14)?;

        Ok(SyncRun {
            id: row.get(0)?,
            source: row.get(1)?,
            actor: row.get(2)?,
            started_at: row.get(3)?,
            finished_at: row.get(4)?,
            stats: SyncStats {
                processed: count(5)?,
                inserted: count(6)?,
                updated: count(7)?,
                unchanged: count(8)?,
                deactivated: count(9)?,
                conflicts: count(10)?,
                skipped: count(11)?,
                duplicates: count(12)?,
                active_total: count(13)?,
            },
            notification: NotificationStatus::from_db_value(&notification),
        })
    }
}

const RUN_COLUMNS: &str = "id, source, actor, started_at, finished_at, processed, inserted, updated,
     unchanged, deactivated, conflicts, skipped, duplicates, active_total, notification";

impl RunRepository for SqliteRunRepository<'_> {
    fn record(&self, run: &SyncRun) -> Result<()> {
        let stats = &run.stats;
        self.conn.execute(
            &format!(
                "INSERT INTO sync_runs ({RUN_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                run.id,
                run.source,
                run.actor,
                run.started_at,
                run.finished_at,
                stats.processed as i64,
                stats.inserted as i64,
                stats.updated as i64,
                stats.unchanged as i64,
                stats.deactivated as i64,
                stats.conflicts as i64,
                stats.skipped as i64,
                stats.duplicates as i64,
                stats.active_total as i64,
                run.notification.to_db_value(),
            ],
        )?;
        Ok(())
    }

    fn set_notification(&self, run_id: &str, status: &NotificationStatus) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_runs SET notification = ? WHERE id = ?",
            params![status.to_db_value(), run_id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(run_id.to_string()));
        }
        Ok(())
    }

    fn get(&self, run_id: &str) -> Result<Option<SyncRun>> {
        let result = self.conn.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = ?"),
            params![run_id],
            Self::parse_run,
        );

        match result {
            Ok(run) => Ok(Some(run)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?"
        ))?;

        let runs = stmt
            .query_map(params![limit as i64], Self::parse_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(runs)
    }
}
