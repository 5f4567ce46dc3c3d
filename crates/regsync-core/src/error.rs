//! Error types for regsync-core

use thiserror::Error;

/// Result type alias using regsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in regsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device not found
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No acting identity was supplied for a run
    #[error("Actor identity is required to run a sync")]
    MissingActor,

    /// The batch holds no valid identifiers
    #[error("Batch contains no valid identifiers")]
    EmptyBatch,

    /// The store rolled back the run's transaction after a write failed
    #[error("Run transaction was rolled back by the store: {0}")]
    TransactionLost(String),

    /// Notification delivery error
    #[error("Notification error: {0}")]
    Notification(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Underlying store error code, when the error came from SQLite.
    ///
    /// Rendered as `<code name> (<extended code>)`, e.g.
    /// `ConstraintViolation (1555)`.
    pub fn code(&self) -> Option<String> {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => {
                Some(format!("{:?} ({})", failure.code, failure.extended_code))
            }
            Self::Sqlite(_) => Some("Sqlite".to_string()),
            Self::Http(error) => error.status().map(|status| status.as_u16().to_string()),
            _ => None,
        }
    }

    /// Whether this error is an identifier uniqueness violation.
    pub fn is_unique_violation(&self) -> bool {
        const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
        const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
                if failure.extended_code == SQLITE_CONSTRAINT_PRIMARYKEY
                    || failure.extended_code == SQLITE_CONSTRAINT_UNIQUE
        )
    }
}
