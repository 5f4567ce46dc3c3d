use std::path::PathBuf;

use regsync_core::decode::{IdentifierRule, Region};
use regsync_core::notify::SmtpSecurity;
use regsync_core::reconcile::DateComparison;
use regsync_core::util::is_http_url;
use serde::Serialize;

use crate::cli::ConfigCommands;
use crate::commands::common::{resolve_db_path, smtp_settings};
use crate::config_profiles::{normalize_text_option, Profile, ProfilesConfig};
use crate::error::CliError;
use crate::feed::{parse_column, parse_delimiter};

/// Values passed to `config init`; unset fields keep the stored value.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub database: Option<String>,
    pub actor: Option<String>,
    pub tag: Option<String>,
    pub region: Option<String>,
    pub date_comparison: Option<DateComparison>,
    pub identifier_column: Option<String>,
    pub date_column: Option<String>,
    pub delimiter: Option<String>,
    pub identifier_rule: Option<IdentifierRule>,
    pub recipients: Vec<String>,
    pub outbox_dir: Option<String>,
    pub webhook_url: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_security: Option<String>,
    pub smtp_username: Option<String>,
    pub smtp_from: Option<String>,
    pub busy_timeout_secs: Option<u64>,
    pub no_activate: bool,
}

pub fn run_config(
    command: ConfigCommands,
    global_profile: Option<&str>,
    cli_db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            database,
            actor,
            tag,
            region,
            date_comparison,
            identifier_column,
            date_column,
            delimiter,
            identifier_rule,
            recipients,
            outbox_dir,
            webhook_url,
            smtp_host,
            smtp_port,
            smtp_security,
            smtp_username,
            smtp_from,
            busy_timeout_secs,
            no_activate,
        } => run_config_init(
            global_profile,
            InitOptions {
                database: database.or_else(|| {
                    cli_db_path.map(|path| path.display().to_string())
                }),
                actor,
                tag,
                region,
                date_comparison: date_comparison.map(Into::into),
                identifier_column,
                date_column,
                delimiter,
                identifier_rule: identifier_rule.map(Into::into),
                recipients,
                outbox_dir,
                webhook_url,
                smtp_host,
                smtp_port,
                smtp_security,
                smtp_username,
                smtp_from,
                busy_timeout_secs,
                no_activate,
            },
        ),
        ConfigCommands::Show => run_config_show(global_profile, cli_db_path),
    }
}

pub fn run_config_init(profile_name: Option<&str>, options: InitOptions) -> Result<(), CliError> {
    let mut config = ProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);

    apply_init(&mut config, &profile_name, options)?;

    let path = config.save().map_err(CliError::Config)?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let missing = config
        .profile(&profile_name)
        .map(missing_fields)
        .unwrap_or_default();
    if !missing.is_empty() {
        println!(
            "Profile '{}' is missing: {}",
            profile_name,
            missing.join(", ")
        );
    }
    Ok(())
}

/// Merge `config init` values into a profile and validate the result.
pub fn apply_init(
    config: &mut ProfilesConfig,
    profile_name: &str,
    options: InitOptions,
) -> Result<(), CliError> {
    let profile = config.profile_mut_or_default(profile_name);

    merge(&mut profile.db_path, options.database);
    merge(&mut profile.actor, options.actor);
    merge(&mut profile.tag, options.tag);
    merge(&mut profile.region, options.region);
    merge(&mut profile.identifier_column, options.identifier_column);
    merge(&mut profile.date_column, options.date_column);
    merge(&mut profile.delimiter, options.delimiter);
    merge(&mut profile.outbox_dir, options.outbox_dir);
    merge(&mut profile.webhook_url, options.webhook_url);
    merge(&mut profile.smtp_host, options.smtp_host);
    merge(&mut profile.smtp_username, options.smtp_username);
    merge(&mut profile.smtp_from, options.smtp_from);
    if let Some(port) = options.smtp_port {
        profile.smtp_port = Some(port);
    }
    if let Some(security) = normalize_text_option(options.smtp_security) {
        profile.smtp_security = Some(security.parse::<SmtpSecurity>().map_err(CliError::Config)?);
    }
    if let Some(value) = options.date_comparison {
        profile.date_comparison = Some(value);
    }
    if let Some(value) = options.identifier_rule {
        profile.identifier_rule = Some(value);
    }
    if let Some(value) = options.busy_timeout_secs {
        profile.busy_timeout_secs = Some(value);
    }
    let recipients = options
        .recipients
        .into_iter()
        .filter_map(|recipient| normalize_text_option(Some(recipient)))
        .collect::<Vec<_>>();
    if !recipients.is_empty() {
        profile.recipients = recipients;
    }

    validate_profile(profile)?;

    if !options.no_activate {
        config.active_profile = Some(profile_name.to_string());
    }
    Ok(())
}

fn merge(target: &mut Option<String>, value: Option<String>) {
    if let Some(value) = normalize_text_option(value) {
        *target = Some(value);
    }
}

pub fn validate_profile(profile: &Profile) -> Result<(), CliError> {
    if let Some(region) = &profile.region {
        region.parse::<Region>().map_err(CliError::Config)?;
    }
    if let Some(column) = &profile.identifier_column {
        parse_column(column)?;
    }
    if let Some(column) = &profile.date_column {
        parse_column(column)?;
    }
    if let Some(delimiter) = &profile.delimiter {
        parse_delimiter(delimiter)?;
    }
    if let Some(url) = &profile.webhook_url {
        if !is_http_url(url) {
            return Err(CliError::Config(
                "webhook_url must include http:// or https://".to_string(),
            ));
        }
    }
    smtp_settings(profile)?;
    if profile.smtp_port == Some(0) {
        return Err(CliError::Config(
            "smtp_port must be greater than zero".to_string(),
        ));
    }
    if profile.busy_timeout_secs == Some(0) {
        return Err(CliError::Config(
            "busy_timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

pub fn missing_fields(profile: &Profile) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if profile.actor.is_none() {
        missing.push("actor");
    }
    if profile.outbox_dir.is_none() && profile.webhook_url.is_none() && profile.smtp_host.is_none()
    {
        missing.push("outbox_dir, webhook_url or smtp_host");
    }
    if profile.recipients.is_empty() {
        missing.push("recipients");
    }
    missing
}

#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub name: String,
    pub active: bool,
    pub resolved_db_path: String,
    pub profile: Profile,
}

pub fn run_config_show(
    profile_name: Option<&str>,
    cli_db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = ProfilesConfig::load().map_err(CliError::Config)?;
    let name = config.resolve_profile_name(profile_name);
    let profile = config.profile(&name).cloned().unwrap_or_default();

    let view = ProfileView {
        active: config.active_profile.as_deref() == Some(name.as_str()),
        resolved_db_path: resolve_db_path(cli_db_path, &profile)?
            .display()
            .to_string(),
        name,
        profile,
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
