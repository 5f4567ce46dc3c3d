use regsync_core::models::Device;
use regsync_core::services::RegistryService;

use crate::commands::common::{device_to_item, format_timestamp, normalize_identifier, Settings};
use crate::error::CliError;

pub async fn run_show(identifier: &str, as_json: bool, settings: &Settings) -> Result<(), CliError> {
    let service = settings.open_service()?;
    let device = find_device(identifier, &service).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&device_to_item(&device))?);
        return Ok(());
    }

    println!("Identifier:  {}", device.identifier);
    println!("State:       {}", if device.active { "active" } else { "inactive" });
    println!(
        "Client date: {}",
        device
            .client_timestamp
            .map_or_else(|| "-".to_string(), |date| date.to_rfc3339())
    );
    println!("Tag:         {}", device.tag.as_deref().unwrap_or("-"));
    println!(
        "Created:     {} by {}",
        format_timestamp(device.created_at),
        device.created_by.as_deref().unwrap_or("-")
    );
    println!(
        "Updated:     {} by {}",
        format_timestamp(device.updated_at),
        device.updated_by.as_deref().unwrap_or("-")
    );
    Ok(())
}

pub async fn find_device(identifier: &str, service: &RegistryService) -> Result<Device, CliError> {
    let identifier = normalize_identifier(identifier)?;
    let device = service.get_device(&identifier).await?;
    device.ok_or(CliError::DeviceNotFound(identifier))
}
