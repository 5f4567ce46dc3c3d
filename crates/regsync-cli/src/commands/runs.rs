use crate::commands::common::{format_run_lines, Settings};
use crate::error::CliError;

pub async fn run_runs(limit: usize, as_json: bool, settings: &Settings) -> Result<(), CliError> {
    let service = settings.open_service()?;
    let runs = service.list_runs(limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    for line in format_run_lines(&runs) {
        println!("{line}");
    }
    Ok(())
}
