//! Incoming entries of one synchronization batch

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// One decoded row: an identifier and the date the feed reported for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingEntry {
    pub identifier: String,
    pub client_timestamp: Option<DateTime<FixedOffset>>,
}

impl IncomingEntry {
    pub fn new(
        identifier: impl Into<String>,
        client_timestamp: Option<DateTime<FixedOffset>>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            client_timestamp,
        }
    }
}

/// A deduplicated batch of incoming entries.
///
/// Identifiers are trimmed; blank identifiers are dropped and counted as
/// skipped. When an identifier repeats, the last occurrence wins but keeps
/// the position of the first one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingBatch {
    entries: Vec<IncomingEntry>,
    duplicates: usize,
    skipped: usize,
}

impl IncomingBatch {
    /// Build a batch from raw entries.
    pub fn from_entries(entries: impl IntoIterator<Item = IncomingEntry>) -> Self {
        let mut batch = Self::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for entry in entries {
            let identifier = entry.identifier.trim();
            if identifier.is_empty() {
                batch.skipped += 1;
                continue;
            }

            let entry = IncomingEntry::new(identifier, entry.client_timestamp);
            if let Some(&position) = positions.get(identifier) {
                tracing::debug!("Duplicate identifier in batch, keeping last: {identifier}");
                batch.entries[position] = entry;
                batch.duplicates += 1;
            } else {
                positions.insert(entry.identifier.clone(), batch.entries.len());
                batch.entries.push(entry);
            }
        }

        batch
    }

    /// Add rows dropped before they reached the batch (e.g. by the decoder).
    #[must_use]
    pub const fn with_skipped(mut self, skipped: usize) -> Self {
        self.skipped += skipped;
        self
    }

    pub fn entries(&self) -> &[IncomingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of repeated identifiers that were collapsed.
    pub const fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Number of rows dropped for a blank or invalid identifier.
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Number of entries without a parsed date.
    pub fn undated(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.client_timestamp.is_none())
            .count()
    }

    pub fn identifiers(&self) -> HashSet<&str> {
        self.entries
            .iter()
            .map(|entry| entry.identifier.as_str())
            .collect()
    }
}
