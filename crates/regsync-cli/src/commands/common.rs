use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use regsync_core::db::StoreConfig;
use regsync_core::decode::{DecodeOptions, Region};
use regsync_core::models::{Device, SyncRun};
use regsync_core::notify::{
    NotifierChannel, OutboxNotifier, SmtpNotifier, SmtpSettings, WebhookNotifier,
    DEFAULT_SMTP_TIMEOUT,
};
use regsync_core::reconcile::{ReconcileOptions, DEFAULT_TAG};
use regsync_core::services::RegistryService;
use serde::Serialize;

use crate::config_profiles::{normalize_text_option, Profile, ProfilesConfig};
use crate::error::CliError;
use crate::feed::{parse_column, parse_delimiter, FeedOptions};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a command needs, resolved from flags, environment and the
/// active profile.
#[derive(Debug, Clone)]
pub struct Settings {
    pub profile_name: String,
    pub db_path: PathBuf,
    pub actor: Option<String>,
    pub reconcile: ReconcileOptions,
    pub decode: DecodeOptions,
    pub feed: FeedOptions,
    pub recipients: Vec<String>,
    pub outbox_dir: Option<PathBuf>,
    pub webhook_url: Option<String>,
    pub smtp: Option<SmtpSettings>,
    pub store: StoreConfig,
}

impl Settings {
    pub fn resolve(
        cli_db_path: Option<PathBuf>,
        profile_name: Option<&str>,
    ) -> Result<Self, CliError> {
        let config = ProfilesConfig::load().map_err(CliError::Config)?;
        let name = config.resolve_profile_name(profile_name);
        let profile = config.profile(&name).cloned().unwrap_or_default();
        Self::from_profile(name, &profile, cli_db_path)
    }

    pub fn from_profile(
        profile_name: String,
        profile: &Profile,
        cli_db_path: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let region = profile
            .region
            .as_deref()
            .map_or_else(Region::default, Region::from_code_or_default);

        let feed = FeedOptions {
            identifier_column: profile
                .identifier_column
                .as_deref()
                .map_or(Ok(FeedOptions::default().identifier_column), parse_column)?,
            date_column: profile
                .date_column
                .as_deref()
                .map_or(Ok(FeedOptions::default().date_column), parse_column)?,
            delimiter: profile.delimiter.as_deref().map(parse_delimiter).transpose()?,
        };

        let mut store = StoreConfig::default();
        if let Some(seconds) = profile.busy_timeout_secs {
            store = store.with_busy_timeout(Duration::from_secs(seconds));
        }

        Ok(Self {
            db_path: resolve_db_path(cli_db_path, profile)?,
            actor: profile.actor.clone(),
            reconcile: ReconcileOptions {
                tag: profile.tag.clone().unwrap_or_else(|| DEFAULT_TAG.to_string()),
                comparison: profile.date_comparison.unwrap_or_default(),
            },
            decode: DecodeOptions {
                region,
                rule: profile.identifier_rule.unwrap_or_default(),
            },
            feed,
            recipients: profile.recipients.clone(),
            outbox_dir: profile.outbox_dir.as_ref().map(PathBuf::from),
            webhook_url: profile.webhook_url.clone(),
            smtp: smtp_settings(profile)?,
            store,
            profile_name,
        })
    }

    /// Acting identity: flag, then `REGSYNC_ACTOR`, then the profile.
    pub fn resolve_actor(&self, explicit: Option<&str>) -> Option<String> {
        normalize_text_option(explicit.map(ToString::to_string))
            .or_else(|| normalize_text_option(env::var("REGSYNC_ACTOR").ok()))
            .or_else(|| self.actor.clone())
    }

    /// The configured notification channel: webhook, then SMTP, then the
    /// outbox.
    pub fn notifier(&self) -> Result<Option<NotifierChannel>, CliError> {
        if let Some(url) = &self.webhook_url {
            return Ok(Some(NotifierChannel::Webhook(WebhookNotifier::new(
                url.as_str(),
                WEBHOOK_TIMEOUT,
            )?)));
        }
        if let Some(smtp) = &self.smtp {
            return Ok(Some(NotifierChannel::Smtp(SmtpNotifier::new(smtp)?)));
        }
        Ok(self
            .outbox_dir
            .as_ref()
            .map(|dir| NotifierChannel::Outbox(OutboxNotifier::new(dir))))
    }

    pub fn open_service(&self) -> Result<RegistryService, CliError> {
        Ok(RegistryService::open_path(&self.db_path, &self.store)?)
    }
}

/// SMTP relay settings when the profile names a host.
///
/// The password is read from `REGSYNC_SMTP_PASSWORD` so it never lands in the
/// profile file.
pub fn smtp_settings(profile: &Profile) -> Result<Option<SmtpSettings>, CliError> {
    let Some(host) = profile.smtp_host.clone() else {
        return Ok(None);
    };
    let from = profile
        .smtp_from
        .clone()
        .ok_or_else(|| CliError::Config("smtp_from is required when smtp_host is set".to_string()))?;

    Ok(Some(SmtpSettings {
        host,
        port: profile.smtp_port,
        security: profile.smtp_security.unwrap_or_default(),
        username: profile.smtp_username.clone(),
        password: normalize_text_option(env::var("REGSYNC_SMTP_PASSWORD").ok()),
        from,
        timeout: DEFAULT_SMTP_TIMEOUT,
    }))
}

pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    profile: &Profile,
) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("REGSYNC_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    if let Some(path) = &profile.db_path {
        return Ok(PathBuf::from(path));
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("regsync").join("registry.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve data directory".to_string()))
}

/// Feed label: explicit, else the file name.
pub fn source_label(explicit: Option<&str>, feed: &Path) -> Option<String> {
    normalize_text_option(explicit.map(ToString::to_string)).or_else(|| {
        feed.file_name()
            .map(|name| name.to_string_lossy().into_owned())
    })
}

pub fn normalize_identifier(identifier: &str) -> Result<String, CliError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyIdentifier)
    } else {
        Ok(trimmed.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct DeviceItem {
    pub identifier: String,
    pub client_timestamp: Option<String>,
    pub active: bool,
    pub tag: Option<String>,
    pub created_at: i64,
    pub created_at_iso: String,
    pub updated_at: i64,
    pub updated_at_iso: String,
    pub relative_time: String,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

pub fn device_to_item(device: &Device) -> DeviceItem {
    let now_ms = Utc::now().timestamp_millis();
    DeviceItem {
        identifier: device.identifier.clone(),
        client_timestamp: device.client_timestamp.map(|date| date.to_rfc3339()),
        active: device.active,
        tag: device.tag.clone(),
        created_at: device.created_at,
        created_at_iso: format_timestamp(device.created_at),
        updated_at: device.updated_at,
        updated_at_iso: format_timestamp(device.updated_at),
        relative_time: format_relative_time(device.updated_at, now_ms),
        created_by: device.created_by.clone(),
        updated_by: device.updated_by.clone(),
    }
}

pub fn format_device_lines(devices: &[Device]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    devices
        .iter()
        .map(|device| {
            let state = if device.active { "active" } else { "inactive" };
            let client_date = device.client_timestamp.map_or_else(
                || "-".to_string(),
                |date| date.format("%Y-%m-%d").to_string(),
            );
            let relative_time = format_relative_time(device.updated_at, now_ms);
            format!(
                "{:<20}  {state:<8}  {client_date:<10}  {relative_time}",
                device.identifier
            )
        })
        .collect()
}

pub fn format_run_lines(runs: &[SyncRun]) -> Vec<String> {
    runs.iter()
        .map(|run| {
            let stats = &run.stats;
            format!(
                "{}  {}  by {}  +{} ~{} ={} -{} !{}  active={}  notify={}  {}",
                format_timestamp(run.started_at),
                run.id.chars().take(13).collect::<String>(),
                run.actor,
                stats.inserted,
                stats.updated,
                stats.unchanged,
                stats.deactivated,
                stats.conflicts,
                stats.active_total,
                run.notification.to_db_value(),
                run.source.as_deref().unwrap_or("-")
            )
        })
        .collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
