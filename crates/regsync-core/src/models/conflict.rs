//! Sync conflict model

use serde::{Deserialize, Serialize};

/// What kind of mutation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Insert lost a race on the identifier's uniqueness
    DuplicateIdentifier,
    /// Insert failed for another reason
    InsertFailed,
    /// Update of an existing identifier failed
    UpdateFailed,
    /// The bulk deactivation step failed as a whole
    DeactivationFailed,
}

impl ConflictKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateIdentifier => "duplicate_identifier",
            Self::InsertFailed => "insert_failed",
            Self::UpdateFailed => "update_failed",
            Self::DeactivationFailed => "deactivation_failed",
        }
    }
}

/// A per-identifier or per-group failure isolated during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Identifier involved, `None` for group-level failures
    pub identifier: Option<String>,
    pub kind: ConflictKind,
    /// Human-readable reason
    pub reason: String,
    /// Underlying store error code, when known
    pub code: Option<String>,
}

impl SyncConflict {
    /// Build a conflict from a store error.
    pub fn from_error(identifier: Option<&str>, kind: ConflictKind, error: &crate::Error) -> Self {
        Self {
            identifier: identifier.map(str::to_string),
            kind,
            reason: error.to_string(),
            code: error.code(),
        }
    }
}
