//! Run report: a structured document built from a reconciliation result.

mod render;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::models::{SyncConflict, SyncRun};
use crate::reconcile::{DeviceOutcome, ReconciliationResult};

pub use render::{
    bar_chart, render_json_report, render_markdown_report, render_report,
    suggested_report_file_name,
};

/// Sample rows listed per category.
pub const SAMPLE_LIMIT: usize = 10;

/// Report output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
}

impl ReportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }

    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Markdown => "text/markdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Inserted,
    Updated,
    Unchanged,
    Deactivated,
}

impl Category {
    pub const ALL: [Self; 4] = [
        Self::Inserted,
        Self::Updated,
        Self::Unchanged,
        Self::Deactivated,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Inserted => "Inserted",
            Self::Updated => "Updated",
            Self::Unchanged => "Unchanged",
            Self::Deactivated => "Deactivated",
        }
    }
}

/// One sample row of a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSample {
    pub identifier: String,
    pub client_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_date: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub reactivated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportCategory {
    pub category: Category,
    pub count: usize,
    /// Share of the four categories, one decimal
    pub percentage: f64,
    pub samples: Vec<ReportSample>,
    /// Rows beyond the sample limit
    pub omitted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConflict {
    /// Identifier, or `<group>` for a group-level failure
    pub identifier: String,
    pub kind: String,
    pub reason: String,
    pub code: Option<String>,
}

impl From<&SyncConflict> for ReportConflict {
    fn from(conflict: &SyncConflict) -> Self {
        Self {
            identifier: conflict
                .identifier
                .clone()
                .unwrap_or_else(|| GROUP_IDENTIFIER.to_string()),
            kind: conflict.kind.as_str().to_string(),
            reason: conflict.reason.clone(),
            code: conflict.code.clone(),
        }
    }
}

/// Placeholder identifier of a group-level conflict.
pub const GROUP_IDENTIFIER: &str = "<group>";

/// The report document of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: String,
    pub source: Option<String>,
    pub actor: String,
    /// Run start (Unix ms)
    pub started_at: i64,
    pub processed: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub active_total: usize,
    pub categories: Vec<ReportCategory>,
    pub conflicts: Vec<ReportConflict>,
}

impl SyncReport {
    pub fn category(&self, category: Category) -> Option<&ReportCategory> {
        self.categories
            .iter()
            .find(|entry| entry.category == category)
    }

    pub fn count(&self, category: Category) -> usize {
        self.category(category).map_or(0, |entry| entry.count)
    }

    /// One-line summary for notification subjects and logs.
    pub fn summary_line(&self) -> String {
        format!(
            "{} inserted, {} updated, {} unchanged, {} deactivated, {} conflicts; {} active",
            self.count(Category::Inserted),
            self.count(Category::Updated),
            self.count(Category::Unchanged),
            self.count(Category::Deactivated),
            self.conflicts.len(),
            self.active_total
        )
    }
}

/// Build the report of a run. Pure.
pub fn build_report(run: &SyncRun, result: &ReconciliationResult) -> SyncReport {
    let groups: [(Category, &[DeviceOutcome]); 4] = [
        (Category::Inserted, &result.inserted),
        (Category::Updated, &result.updated),
        (Category::Unchanged, &result.unchanged),
        (Category::Deactivated, &result.deactivated),
    ];
    let total: usize = groups.iter().map(|(_, outcomes)| outcomes.len()).sum();

    let categories = groups
        .into_iter()
        .map(|(category, outcomes)| ReportCategory {
            category,
            count: outcomes.len(),
            percentage: percentage(outcomes.len(), total),
            samples: outcomes
                .iter()
                .take(SAMPLE_LIMIT)
                .map(|outcome| sample(category, outcome))
                .collect(),
            omitted: outcomes.len().saturating_sub(SAMPLE_LIMIT),
        })
        .collect();

    SyncReport {
        run_id: run.id.clone(),
        source: run.source.clone(),
        actor: run.actor.clone(),
        started_at: run.started_at,
        processed: run.stats.processed,
        skipped: run.stats.skipped,
        duplicates: run.stats.duplicates,
        active_total: run.stats.active_total,
        categories,
        conflicts: result.conflicts.iter().map(ReportConflict::from).collect(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 * 1000.0 / total as f64).round() / 10.0
}

fn sample(category: Category, outcome: &DeviceOutcome) -> ReportSample {
    ReportSample {
        identifier: outcome.identifier.clone(),
        client_date: outcome.client_timestamp.map(format_date),
        previous_date: if category == Category::Updated {
            outcome.previous_timestamp.map(format_date)
        } else {
            None
        },
        reactivated: outcome.reactivated,
    }
}

fn format_date(date: DateTime<FixedOffset>) -> String {
    date.format("%Y-%m-%d %H:%M %:z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictKind, NotificationStatus, SyncStats};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    pub(super) fn outcome(identifier: &str) -> DeviceOutcome {
        DeviceOutcome {
            identifier: identifier.to_string(),
            client_timestamp: FixedOffset::west_opt(6 * 3600)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 2, 9, 30, 0)
                .single(),
            previous_timestamp: None,
            reactivated: false,
        }
    }

    pub(super) fn fixture() -> (SyncRun, ReconciliationResult) {
        let mut updated = outcome("U1");
        updated.previous_timestamp = FixedOffset::west_opt(6 * 3600)
            .unwrap()
            .with_ymd_and_hms(2023, 12, 1, 0, 0, 0)
            .single();
        updated.reactivated = true;

        let result = ReconciliationResult {
            inserted: (0..12).map(|i| outcome(&format!("N{i:02}"))).collect(),
            updated: vec![updated],
            unchanged: vec![outcome("S1"), outcome("S2")],
            deactivated: vec![],
            conflicts: vec![
                SyncConflict {
                    identifier: Some("X1".to_string()),
                    kind: ConflictKind::InsertFailed,
                    reason: "disk | full".to_string(),
                    code: Some("DiskFull (13)".to_string()),
                },
                SyncConflict {
                    identifier: None,
                    kind: ConflictKind::DeactivationFailed,
                    reason: "database is locked".to_string(),
                    code: None,
                },
            ],
            stats: SyncStats {
                processed: 16,
                inserted: 12,
                updated: 1,
                unchanged: 2,
                deactivated: 0,
                conflicts: 2,
                skipped: 1,
                duplicates: 3,
                active_total: 15,
            },
        };
        let run = SyncRun {
            id: "0190c3a1-0000-7000-8000-000000000001".to_string(),
            source: Some("feed.tsv".to_string()),
            actor: "ops".to_string(),
            started_at: 1_704_200_000_000,
            finished_at: 1_704_200_000_500,
            stats: result.stats,
            notification: NotificationStatus::Pending,
        };
        (run, result)
    }

    #[test]
    fn test_counts_and_percentages() {
        let (run, result) = fixture();
        let report = build_report(&run, &result);

        let shares = report
            .categories
            .iter()
            .map(|c| (c.category, c.count, c.percentage))
            .collect::<Vec<_>>();
        assert_eq!(
            shares,
            vec![
                (Category::Inserted, 12, 80.0),
                (Category::Updated, 1, 6.7),
                (Category::Unchanged, 2, 13.3),
                (Category::Deactivated, 0, 0.0),
            ]
        );
        assert_eq!(report.processed, 16);
        assert_eq!(report.active_total, 15);
    }

    #[test]
    fn test_samples_are_capped() {
        let (run, result) = fixture();
        let report = build_report(&run, &result);

        let inserted = report.category(Category::Inserted).unwrap();
        assert_eq!(inserted.samples.len(), SAMPLE_LIMIT);
        assert_eq!(inserted.omitted, 2);
        assert_eq!(inserted.samples[0].identifier, "N00");
        assert_eq!(
            inserted.samples[0].client_date.as_deref(),
            Some("2024-01-02 09:30 -06:00")
        );
        assert_eq!(inserted.samples[0].previous_date, None);
    }

    #[test]
    fn test_updated_samples_carry_previous_date() {
        let (run, result) = fixture();
        let report = build_report(&run, &result);

        let updated = &report.category(Category::Updated).unwrap().samples[0];
        assert_eq!(updated.previous_date.as_deref(), Some("2023-12-01 00:00 -06:00"));
        assert!(updated.reactivated);
    }

    #[test]
    fn test_group_conflict_uses_placeholder() {
        let (run, result) = fixture();
        let report = build_report(&run, &result);

        assert_eq!(report.conflicts.len(), 2);
        assert_eq!(report.conflicts[1].identifier, GROUP_IDENTIFIER);
        assert_eq!(report.conflicts[1].kind, "deactivation_failed");
    }

    #[test]
    fn test_empty_result_has_zero_percentages() {
        let (run, _) = fixture();
        let report = build_report(&run, &ReconciliationResult::default());
        assert!(report.categories.iter().all(|c| c.percentage == 0.0));
    }

    #[test]
    fn test_summary_line() {
        let (run, result) = fixture();
        assert_eq!(
            build_report(&run, &result).summary_line(),
            "12 inserted, 1 updated, 2 unchanged, 0 deactivated, 2 conflicts; 15 active"
        );
    }
}
