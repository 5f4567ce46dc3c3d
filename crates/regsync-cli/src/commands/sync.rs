use std::path::{Path, PathBuf};

use regsync_core::decode::decode_rows;
use regsync_core::models::NotificationStatus;
use regsync_core::notify::{dispatch, Notification, NotifierChannel};
use regsync_core::reconcile::validate_run;
use regsync_core::report::{build_report, render_report, ReportFormat, SyncReport};
use regsync_core::services::{RegistryService, SyncOutcome};

use crate::commands::common::{source_label, Settings};
use crate::error::CliError;
use crate::feed::read_feed;

#[derive(Debug, Clone)]
pub struct SyncArgs {
    pub feed: PathBuf,
    pub actor: Option<String>,
    pub source: Option<String>,
    pub report: Option<PathBuf>,
    pub format: ReportFormat,
    pub notify: bool,
}

/// What a completed sync command produced.
#[derive(Debug)]
pub struct SyncSummary {
    pub outcome: SyncOutcome,
    pub report: SyncReport,
    /// Where the report was written, when a path was requested and the
    /// write succeeded
    pub report_file: Option<PathBuf>,
    pub notification: NotificationStatus,
}

pub async fn run_sync(args: &SyncArgs, settings: &Settings) -> Result<(), CliError> {
    let summary = sync_feed(args, settings).await?;

    if let Some(path) = &summary.report_file {
        println!("{}", path.display());
    } else {
        match render_report(&summary.report, args.format) {
            Ok(rendered) => print!("{rendered}"),
            Err(error) => tracing::warn!("Failed to render report: {error}"),
        }
    }
    eprintln!(
        "Run {}: {} (notification: {})",
        summary.outcome.run.id,
        summary.report.summary_line(),
        summary.notification.to_db_value()
    );
    Ok(())
}

/// Decode, reconcile, report and notify.
///
/// A fatal failure sends a failure notice through the configured channel
/// before the error is returned.
pub async fn sync_feed(args: &SyncArgs, settings: &Settings) -> Result<SyncSummary, CliError> {
    let source = source_label(args.source.as_deref(), &args.feed);
    let notifier = if args.notify {
        settings.notifier()?
    } else {
        None
    };

    let (service, outcome) = match reconcile_feed(args, settings, source.as_deref()).await {
        Ok(result) => result,
        Err(error) => {
            if let Some(notifier) = &notifier {
                let notice = Notification::failure(
                    &error.to_string(),
                    source.as_deref(),
                    settings.recipients.clone(),
                );
                dispatch(notifier, &notice).await;
            }
            return Err(error);
        }
    };

    // The run is committed from here on: nothing below may fail the command
    let report = build_report(&outcome.run, &outcome.result);
    let report_file = args.report.as_ref().and_then(|path| {
        match write_report(path, &report, args.format) {
            Ok(()) => {
                tracing::info!("Report written to {}", path.display());
                Some(path.clone())
            }
            Err(error) => {
                tracing::warn!(
                    "Failed to write report to {}: {error}; printing it instead",
                    path.display()
                );
                None
            }
        }
    });

    let notification = notify(
        notifier.as_ref(),
        &report,
        &outcome,
        args.format,
        &settings.recipients,
    )
    .await;

    if outcome.recorded {
        if let Err(error) = service
            .set_notification(&outcome.run.id, &notification)
            .await
        {
            tracing::warn!("Failed to record notification status: {error}");
        }
    }

    Ok(SyncSummary {
        outcome,
        report,
        report_file,
        notification,
    })
}

async fn reconcile_feed(
    args: &SyncArgs,
    settings: &Settings,
    source: Option<&str>,
) -> Result<(RegistryService, SyncOutcome), CliError> {
    let actor = settings.resolve_actor(args.actor.as_deref());
    let rows = read_feed(&args.feed, &settings.feed)?;
    let decoded = decode_rows(rows, settings.decode);

    // Fail fast before the registry is opened
    validate_run(&decoded.batch, actor.as_deref())?;

    let service = settings.open_service()?;
    let outcome = service
        .sync_batch(&decoded.batch, actor.as_deref(), &settings.reconcile, source)
        .await?;
    Ok((service, outcome))
}

fn write_report(path: &Path, report: &SyncReport, format: ReportFormat) -> Result<(), CliError> {
    let content = render_report(report, format)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    Ok(())
}

async fn notify(
    notifier: Option<&NotifierChannel>,
    report: &SyncReport,
    outcome: &SyncOutcome,
    format: ReportFormat,
    recipients: &[String],
) -> NotificationStatus {
    let Some(notifier) = notifier else {
        return NotificationStatus::Skipped;
    };

    match Notification::from_report(report, outcome.run.stats, recipients.to_vec(), format) {
        Ok(notification) => dispatch(notifier, &notification).await.to_status(),
        Err(error) => {
            tracing::warn!("Failed to render notification for run {}: {error}", outcome.run.id);
            NotificationStatus::Failed {
                reason: format!("report rendering failed: {error}"),
            }
        }
    }
}
