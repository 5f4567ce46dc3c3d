//! Webhook channel: JSON POST to a relay endpoint

use std::time::Duration;

use serde::Serialize;

use super::{Attachment, Notification, Notifier};
use crate::error::{Error, Result};
use crate::models::SyncStats;
use crate::util::{compact_text, is_http_url};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    recipients: &'a [String],
    body: &'a str,
    summary: Option<&'a SyncStats>,
    attachment: Option<&'a Attachment>,
}

/// POSTs each notification as JSON to a configured URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into().trim().to_string();
        if !is_http_url(&url) {
            return Err(Error::InvalidInput(format!(
                "webhook URL must start with http:// or https://: {url}"
            )));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Notifier for WebhookNotifier {
    fn channel(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let payload = WebhookPayload {
            subject: &notification.subject,
            recipients: &notification.recipients,
            body: &notification.body,
            summary: notification.summary.as_ref(),
            attachment: notification.attachment.as_ref(),
        };

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!(
                "webhook responded with HTTP {status}: {}",
                compact_text(&body)
            )));
        }
        Ok(())
    }
}
