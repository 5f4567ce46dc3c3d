//! Outbox channel: one file per message in a directory

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::{Notification, Notifier};
use crate::error::Result;

/// Writes each notification into an outbox directory for a mail relay (or a
/// human) to pick up.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn render(notification: &Notification) -> String {
        let mut message = String::new();
        let _ = writeln!(message, "To: {}", notification.recipients.join(", "));
        let _ = writeln!(message, "Subject: {}", notification.subject);
        let _ = writeln!(message, "Date: {}", chrono::Utc::now().to_rfc2822());
        let _ = writeln!(message);
        message.push_str(&notification.body);

        if let Some(attachment) = &notification.attachment {
            let _ = writeln!(message);
            let _ = writeln!(
                message,
                "--- attachment: {} ({}) ---",
                attachment.file_name, attachment.content_type
            );
            message.push_str(&attachment.content);
            if !attachment.content.ends_with('\n') {
                message.push('\n');
            }
        }
        message
    }
}

impl Notifier for OutboxNotifier {
    fn channel(&self) -> &'static str {
        "outbox"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // Written under a temporary name, then renamed so pickers never see
        // a partial message
        let name = Uuid::now_v7().to_string();
        let partial = self.dir.join(format!(".{name}.tmp"));
        let path = self.dir.join(format!("{name}.txt"));

        tokio::fs::write(&partial, Self::render(notification)).await?;
        tokio::fs::rename(&partial, &path).await?;

        tracing::debug!("Wrote notification to {}", path.display());
        Ok(())
    }
}
