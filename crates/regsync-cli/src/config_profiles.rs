//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regsync_core::decode::IdentifierRule;
use regsync_core::notify::SmtpSecurity;
use regsync_core::reconcile::DateComparison;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub date_comparison: Option<DateComparison>,
    #[serde(default)]
    pub identifier_column: Option<String>,
    #[serde(default)]
    pub date_column: Option<String>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub identifier_rule: Option<IdentifierRule>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub outbox_dir: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default)]
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub smtp_security: Option<SmtpSecurity>,
    #[serde(default)]
    pub smtp_username: Option<String>,
    /// Sender mailbox; the password comes from `REGSYNC_SMTP_PASSWORD`
    #[serde(default)]
    pub smtp_from: Option<String>,
    #[serde(default)]
    pub busy_timeout_secs: Option<u64>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join("regsync").join(CONFIG_FILE_NAME))
        .ok_or_else(|| "Failed to resolve config directory".to_string())
}

pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    regsync_core::util::normalize_text_option(value)
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl ProfilesConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        if let Some(profile) = normalize_profile_name(explicit) {
            return profile;
        }
        if let Some(profile) =
            normalize_profile_name(std::env::var("REGSYNC_PROFILE").ok().as_deref())
        {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(self.active_profile.as_deref()) {
            return profile;
        }
        "default".to_string()
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut Profile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl Profile {
    fn normalize(&mut self) {
        self.db_path = normalize_text_option(self.db_path.take());
        self.actor = normalize_text_option(self.actor.take());
        self.tag = normalize_text_option(self.tag.take());
        self.region =
            normalize_text_option(self.region.take()).map(|region| region.to_ascii_uppercase());
        self.identifier_column = normalize_text_option(self.identifier_column.take());
        self.date_column = normalize_text_option(self.date_column.take());
        // A bare tab would be trimmed away, so the delimiter is stored by name
        self.delimiter = normalize_text_option(self.delimiter.take());
        self.recipients = std::mem::take(&mut self.recipients)
            .into_iter()
            .filter_map(|recipient| normalize_text_option(Some(recipient)))
            .collect();
        self.outbox_dir = normalize_text_option(self.outbox_dir.take());
        self.webhook_url = normalize_text_option(self.webhook_url.take());
        self.smtp_host = normalize_text_option(self.smtp_host.take());
        self.smtp_username = normalize_text_option(self.smtp_username.take());
        self.smtp_from = normalize_text_option(self.smtp_from.take());
    }
}
