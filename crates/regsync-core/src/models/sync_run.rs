//! Sync run history model

use serde::{Deserialize, Serialize};

/// Aggregate counts of one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Distinct identifiers in the batch
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deactivated: usize,
    pub conflicts: usize,
    /// Rows dropped for a blank or invalid identifier
    pub skipped: usize,
    /// Repeated identifiers collapsed within the batch
    pub duplicates: usize,
    /// Active records after the run's mutations
    pub active_total: usize,
}

/// Delivery state of a run's notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Skipped,
    Delivered,
    Failed { reason: String },
}

impl NotificationStatus {
    /// Stored form: `pending`, `skipped`, `delivered` or `failed: <reason>`.
    pub fn to_db_value(&self) -> String {
        match self {
            Self::Pending => "pending".to_string(),
            Self::Skipped => "skipped".to_string(),
            Self::Delivered => "delivered".to_string(),
            Self::Failed { reason } => format!("failed: {reason}"),
        }
    }

    pub fn from_db_value(value: &str) -> Self {
        match value {
            "skipped" => Self::Skipped,
            "delivered" => Self::Delivered,
            other => other.strip_prefix("failed: ").map_or(Self::Pending, |reason| {
                Self::Failed {
                    reason: reason.to_string(),
                }
            }),
        }
    }
}

/// A recorded synchronization run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    /// UUID v7 (time-sortable)
    pub id: String,
    /// Free-form label of the feed (file name, mail subject)
    pub source: Option<String>,
    pub actor: String,
    /// Start timestamp (Unix ms)
    pub started_at: i64,
    /// Finish timestamp (Unix ms)
    pub finished_at: i64,
    pub stats: SyncStats,
    pub notification: NotificationStatus,
}
