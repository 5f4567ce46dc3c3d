use regsync_core::models::ActivityFilter;

use crate::commands::common::{device_to_item, format_device_lines, DeviceItem, Settings};
use crate::error::CliError;

pub async fn run_list(
    filter: ActivityFilter,
    limit: usize,
    offset: usize,
    as_json: bool,
    settings: &Settings,
) -> Result<(), CliError> {
    let service = settings.open_service()?;
    let devices = service.list_devices(filter, limit, offset).await?;

    if as_json {
        let json_items = devices
            .iter()
            .map(device_to_item)
            .collect::<Vec<DeviceItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No records.");
        return Ok(());
    }

    for line in format_device_lines(&devices) {
        println!("{line}");
    }
    Ok(())
}
