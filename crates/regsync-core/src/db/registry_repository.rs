//! Device registry repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ToSql};

use crate::error::{Error, Result};
use crate::models::{ActivityFilter, Device, DeviceState, RegistryCounts};
use crate::reconcile::RegistrySnapshot;

/// Identifiers per `UPDATE ... IN (...)` statement, below `SQLite`'s bound
/// parameter limit.
const DEACTIVATE_CHUNK_SIZE: usize = 500;

/// Store operations the reconciliation engine needs
pub trait RegistryStore {
    /// Read every known identifier with its stored date and activity flag
    fn snapshot(&self) -> Result<RegistrySnapshot>;

    /// Insert a new record; fails on an existing identifier
    fn insert(&self, device: &Device) -> Result<()>;

    /// Reactivate a record and refresh its client date
    fn refresh(
        &self,
        identifier: &str,
        client_timestamp: Option<DateTime<FixedOffset>>,
        actor: &str,
        now_ms: i64,
    ) -> Result<()>;

    /// Deactivate every listed identifier as one unit; returns rows changed
    fn deactivate(&self, identifiers: &[String], actor: &str, now_ms: i64) -> Result<usize>;

    /// Count records currently marked active
    fn count_active(&self) -> Result<usize>;

    /// Whether the enclosing run transaction was rolled back by the store,
    /// leaving later writes to autocommit
    fn transaction_lost(&self) -> bool {
        false
    }
}

/// `SQLite` implementation of `RegistryStore`
pub struct SqliteRegistryRepository<'a> {
    conn: &'a Connection,
    /// A transaction was open when the repository was created
    in_transaction: bool,
}

impl<'a> SqliteRegistryRepository<'a> {
    /// Create a new repository with the given connection (or transaction)
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            in_transaction: !conn.is_autocommit(),
        }
    }

    /// Get one record by identifier, active or not
    pub fn get(&self, identifier: &str) -> Result<Option<Device>> {
        let result = self.conn.query_row(
            "SELECT identifier, client_timestamp, created_at, updated_at, active, tag, created_by, updated_by
             FROM devices WHERE identifier = ?",
            params![identifier.trim()],
            Self::parse_device,
        );

        match result {
            Ok(device) => Ok(Some(device)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List records, most recently touched first
    pub fn list(&self, filter: ActivityFilter, limit: usize, offset: usize) -> Result<Vec<Device>> {
        let condition = match filter {
            ActivityFilter::Active => "WHERE active = 1",
            ActivityFilter::Inactive => "WHERE active = 0",
            ActivityFilter::All => "",
        };
        let sql = format!(
            "SELECT identifier, client_timestamp, created_at, updated_at, active, tag, created_by, updated_by
             FROM devices
             {condition}
             ORDER BY updated_at DESC, identifier ASC
             LIMIT ? OFFSET ?"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let devices = stmt
            .query_map(params![limit as i64, offset as i64], Self::parse_device)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(devices)
    }

    /// Count records by activity
    pub fn counts(&self) -> Result<RegistryCounts> {
        let (active, inactive): (i64, i64) = self.conn.query_row(
            "SELECT COALESCE(SUM(active = 1), 0), COALESCE(SUM(active = 0), 0) FROM devices",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(RegistryCounts {
            active: usize::try_from(active).unwrap_or_default(),
            inactive: usize::try_from(inactive).unwrap_or_default(),
        })
    }

    fn deactivate_chunks(&self, identifiers: &[String], actor: &str, now_ms: i64) -> Result<usize> {
        let mut changed = 0;

        for chunk in identifiers.chunks(DEACTIVATE_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "UPDATE devices
                 SET active = 0, updated_at = MAX(updated_at, ?1), updated_by = ?2
                 WHERE active = 1 AND identifier IN ({placeholders})"
            );

            let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() + 2);
            values.push(&now_ms);
            values.push(&actor);
            values.extend(chunk.iter().map(|identifier| identifier as &dyn ToSql));

            changed += self.conn.execute(&sql, values.as_slice())?;
        }

        Ok(changed)
    }

    /// Parse a device from a database row
    fn parse_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
        Ok(Device {
            identifier: row.get(0)?,
            client_timestamp: parse_timestamp(row, 1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
            active: row.get::<_, i32>(4)? != 0,
            tag: row.get(5)?,
            created_by: row.get(6)?,
            updated_by: row.get(7)?,
        })
    }
}

impl RegistryStore for SqliteRegistryRepository<'_> {
    fn snapshot(&self) -> Result<RegistrySnapshot> {
        let mut stmt = self
            .conn
            .prepare("SELECT identifier, client_timestamp, active FROM devices")?;

        let states = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    DeviceState {
                        client_timestamp: parse_timestamp(row, 1)?,
                        active: row.get::<_, i32>(2)? != 0,
                    },
                ))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;

        Ok(RegistrySnapshot::from_states(states))
    }

    fn insert(&self, device: &Device) -> Result<()> {
        self.conn.execute(
            "INSERT INTO devices (identifier, client_timestamp, created_at, updated_at, active, tag, created_by, updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                device.identifier,
                device.client_timestamp.map(|ts| ts.to_rfc3339()),
                device.created_at,
                device.updated_at,
                i32::from(device.active),
                device.tag,
                device.created_by,
                device.updated_by,
            ],
        )?;
        Ok(())
    }

    fn refresh(
        &self,
        identifier: &str,
        client_timestamp: Option<DateTime<FixedOffset>>,
        actor: &str,
        now_ms: i64,
    ) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE devices
             SET client_timestamp = ?1, active = 1, updated_at = MAX(updated_at, ?2), updated_by = ?3
             WHERE identifier = ?4",
            params![
                client_timestamp.map(|ts| ts.to_rfc3339()),
                now_ms,
                actor,
                identifier
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(identifier.to_string()));
        }
        Ok(())
    }

    fn deactivate(&self, identifiers: &[String], actor: &str, now_ms: i64) -> Result<usize> {
        if identifiers.is_empty() {
            return Ok(0);
        }

        // One savepoint so a failing chunk undoes the chunks before it
        self.conn.execute_batch("SAVEPOINT deactivate_obsolete")?;
        match self.deactivate_chunks(identifiers, actor, now_ms) {
            Ok(changed) => {
                self.conn.execute_batch("RELEASE deactivate_obsolete")?;
                Ok(changed)
            }
            Err(error) => {
                if let Err(rollback) = self
                    .conn
                    .execute_batch("ROLLBACK TO deactivate_obsolete; RELEASE deactivate_obsolete")
                {
                    tracing::warn!("Failed to roll back partial deactivation: {rollback}");
                }
                Err(error)
            }
        }
    }

    fn count_active(&self) -> Result<usize> {
        Ok(self.counts()?.active)
    }

    fn transaction_lost(&self) -> bool {
        self.in_transaction && self.conn.is_autocommit()
    }
}

fn parse_timestamp(
    row: &rusqlite::Row<'_>,
    index: usize,
) -> rusqlite::Result<Option<DateTime<FixedOffset>>> {
    row.get::<_, Option<String>>(index)?
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
            })
        })
        .transpose()
}
