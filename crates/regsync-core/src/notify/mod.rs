//! Notification dispatch for finished (or failed) runs
//!
//! A [`Notifier`] delivers one [`Notification`] through an outbound channel.
//! [`dispatch`] wraps delivery so a failure is logged and returned as a
//! [`DeliveryOutcome`], never as an error: a failed notification must not
//! cause a sync to be re-run.

mod outbox;
mod smtp;
mod webhook;

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{NotificationStatus, SyncStats};
use crate::report::{render_report, suggested_report_file_name, ReportFormat, SyncReport};
use crate::util::compact_text;

pub use outbox::OutboxNotifier;
pub use smtp::{SmtpNotifier, SmtpSecurity, SmtpSettings, DEFAULT_SMTP_TIMEOUT};
pub use webhook::WebhookNotifier;

const SUBJECT_PREFIX: &str = "[regsync]";

/// Rendered report carried alongside the message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub content: String,
}

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub subject: String,
    pub recipients: Vec<String>,
    pub body: String,
    /// Summary counts of the run, absent for failure notices
    pub summary: Option<SyncStats>,
    pub attachment: Option<Attachment>,
}

impl Notification {
    /// Confirmation of a completed run, with the rendered report attached.
    pub fn from_report(
        report: &SyncReport,
        stats: SyncStats,
        recipients: Vec<String>,
        format: ReportFormat,
    ) -> serde_json::Result<Self> {
        let subject = if report.conflicts.is_empty() {
            format!("{SUBJECT_PREFIX} Sync completed: {}", report.summary_line())
        } else {
            format!(
                "{SUBJECT_PREFIX} Sync completed with {} conflicts: {}",
                report.conflicts.len(),
                report.summary_line()
            )
        };

        let mut body = String::new();
        body.push_str("Registry synchronization finished.\n\n");
        let _ = writeln!(body, "Run: {}", report.run_id);
        if let Some(source) = &report.source {
            let _ = writeln!(body, "Source: {source}");
        }
        let _ = writeln!(body, "Actor: {}", report.actor);
        let _ = writeln!(body, "Processed: {}", stats.processed);
        let _ = writeln!(body, "Inserted: {}", stats.inserted);
        let _ = writeln!(body, "Updated: {}", stats.updated);
        let _ = writeln!(body, "Unchanged: {}", stats.unchanged);
        let _ = writeln!(body, "Deactivated: {}", stats.deactivated);
        let _ = writeln!(body, "Conflicts: {}", stats.conflicts);
        let _ = writeln!(body, "Active records: {}\n", stats.active_total);
        body.push_str("The full report is attached.\n");

        Ok(Self {
            subject,
            recipients,
            body,
            summary: Some(stats),
            attachment: Some(Attachment {
                file_name: suggested_report_file_name(format, &report.run_id),
                content_type: format.content_type().to_string(),
                content: render_report(report, format)?,
            }),
        })
    }

    /// Notice of a run that failed before any change was made.
    pub fn failure(reason: &str, source: Option<&str>, recipients: Vec<String>) -> Self {
        let mut body = String::new();
        body.push_str("Registry synchronization failed. No changes were made.\n\n");
        if let Some(source) = source {
            let _ = writeln!(body, "Source: {source}");
        }
        let _ = writeln!(body, "Reason: {reason}");

        Self {
            subject: format!("{SUBJECT_PREFIX} Sync FAILED: {}", compact_text(reason)),
            recipients,
            body,
            summary: None,
            attachment: None,
        }
    }
}

/// An outbound notification channel.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    /// Short channel name for logs
    fn channel(&self) -> &'static str;

    /// Deliver one notification
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Any configured channel.
#[derive(Debug, Clone)]
pub enum NotifierChannel {
    Outbox(OutboxNotifier),
    Smtp(SmtpNotifier),
    Webhook(WebhookNotifier),
}

impl Notifier for NotifierChannel {
    fn channel(&self) -> &'static str {
        match self {
            Self::Outbox(notifier) => notifier.channel(),
            Self::Smtp(notifier) => notifier.channel(),
            Self::Webhook(notifier) => notifier.channel(),
        }
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        match self {
            Self::Outbox(notifier) => notifier.send(notification).await,
            Self::Smtp(notifier) => notifier.send(notification).await,
            Self::Webhook(notifier) => notifier.send(notification).await,
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// The status recorded on the run.
    pub fn to_status(&self) -> NotificationStatus {
        match self {
            Self::Delivered => NotificationStatus::Delivered,
            Self::Failed { reason } => NotificationStatus::Failed {
                reason: reason.clone(),
            },
        }
    }
}

/// Deliver a notification, logging instead of propagating failure.
pub async fn dispatch<N: Notifier + ?Sized>(
    notifier: &N,
    notification: &Notification,
) -> DeliveryOutcome {
    match notifier.send(notification).await {
        Ok(()) => {
            tracing::info!(
                "Notification delivered via {}: {}",
                notifier.channel(),
                notification.subject
            );
            DeliveryOutcome::Delivered
        }
        Err(error) => {
            tracing::warn!("Notification via {} failed: {error}", notifier.channel());
            DeliveryOutcome::Failed {
                reason: compact_text(&error.to_string()),
            }
        }
    }
}
