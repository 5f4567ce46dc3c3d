use regsync_core::models::{RegistryCounts, SyncRun};
use serde::Serialize;

use crate::commands::common::{format_run_lines, Settings};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub profile: String,
    pub db_path: String,
    pub active: usize,
    pub inactive: usize,
    pub total: usize,
    pub last_run: Option<SyncRun>,
}

pub async fn run_status(as_json: bool, settings: &Settings) -> Result<(), CliError> {
    let service = settings.open_service()?;
    let counts = service.counts().await?;
    let last_run = service.last_run().await?;
    let item = status_item(settings, counts, last_run);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    println!("Profile:  {}", item.profile);
    println!("Database: {}", item.db_path);
    println!(
        "Records:  {} active, {} inactive, {} total",
        item.active, item.inactive, item.total
    );
    match &item.last_run {
        Some(run) => {
            for line in format_run_lines(std::slice::from_ref(run)) {
                println!("Last run: {line}");
            }
        }
        None => println!("Last run: none"),
    }
    Ok(())
}

pub fn status_item(settings: &Settings, counts: RegistryCounts, last_run: Option<SyncRun>) -> StatusItem {
    StatusItem {
        profile: settings.profile_name.clone(),
        db_path: settings.db_path.display().to_string(),
        active: counts.active,
        inactive: counts.inactive,
        total: counts.total(),
        last_run,
    }
}
