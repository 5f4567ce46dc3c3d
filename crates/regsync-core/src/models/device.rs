//! Device record model

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// A persisted registry record, keyed by its identifier (IMEI or serial).
///
/// Records are never removed; `active = false` marks an identifier that is
/// no longer reported by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unique, trimmed, non-empty identifier
    pub identifier: String,
    /// Date reported by the client feed, if it could be parsed
    pub client_timestamp: Option<DateTime<FixedOffset>>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms), never decreases
    pub updated_at: i64,
    /// Whether the identifier is currently reported
    pub active: bool,
    /// Origin/category annotation
    pub tag: Option<String>,
    /// Actor that created the record
    pub created_by: Option<String>,
    /// Actor that last touched the record
    pub updated_by: Option<String>,
}

impl Device {
    /// Build a freshly inserted, active record.
    #[must_use]
    pub fn new(
        identifier: impl Into<String>,
        client_timestamp: Option<DateTime<FixedOffset>>,
        tag: impl Into<String>,
        actor: &str,
        now_ms: i64,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            client_timestamp,
            created_at: now_ms,
            updated_at: now_ms,
            active: true,
            tag: Some(tag.into()),
            created_by: Some(actor.to_string()),
            updated_by: Some(actor.to_string()),
        }
    }

    /// The slice of state the reconciliation engine compares against.
    #[must_use]
    pub const fn state(&self) -> DeviceState {
        DeviceState {
            client_timestamp: self.client_timestamp,
            active: self.active,
        }
    }
}

/// Stored date and activity flag of one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub client_timestamp: Option<DateTime<FixedOffset>>,
    pub active: bool,
}

/// Which records a listing should include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityFilter {
    #[default]
    Active,
    Inactive,
    All,
}

/// Record counts by activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCounts {
    pub active: usize,
    pub inactive: usize,
}

impl RegistryCounts {
    pub const fn total(&self) -> usize {
        self.active + self.inactive
    }
}
