//! SMTP channel: mail the report to the configured recipients

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};

use super::{Notification, Notifier};
use crate::error::{Error, Result};

/// Default connection and command timeout.
pub const DEFAULT_SMTP_TIMEOUT: Duration = Duration::from_secs(10);

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS (submission port)
    #[default]
    Starttls,
    /// TLS from the first byte
    Tls,
    /// No encryption; only for relays on a trusted network
    Plain,
}

impl SmtpSecurity {
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Starttls => 587,
            Self::Tls => 465,
            Self::Plain => 25,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starttls => "starttls",
            Self::Tls => "tls",
            Self::Plain => "plain",
        }
    }
}

impl fmt::Display for SmtpSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SmtpSecurity {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "starttls" => Ok(Self::Starttls),
            "tls" | "ssl" => Ok(Self::Tls),
            "none" | "plain" => Ok(Self::Plain),
            other => Err(format!("unknown SMTP security '{other}'")),
        }
    }
}

/// Relay connection settings.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    /// Defaults to the security mode's standard port
    pub port: Option<u16>,
    pub security: SmtpSecurity,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender mailbox, e.g. `Registry <registry@example.com>`
    pub from: String,
    pub timeout: Duration,
}

impl SmtpSettings {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.security.default_port())
    }
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Sends each notification as a mail, with the report as an attachment.
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
    endpoint: String,
}

impl fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("endpoint", &self.endpoint)
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let host = settings.host.trim();
        if host.is_empty() {
            return Err(Error::InvalidInput("SMTP host cannot be empty".to_string()));
        }
        let from = parse_mailbox(&settings.from, "sender")?;

        let builder = match settings.security {
            SmtpSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(smtp_error)?
            }
            SmtpSecurity::Tls => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(smtp_error)?
            }
            SmtpSecurity::Plain => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };
        let mut builder = builder
            .port(settings.port())
            .timeout(Some(settings.timeout));
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        let transport: AsyncSmtpTransport<Tokio1Executor> = builder.build();

        Ok(Self {
            transport: Arc::new(transport),
            from,
            endpoint: format!("{host}:{}", settings.port()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the MIME message: plain-text body, report as attachment.
    pub fn message(&self, notification: &Notification) -> Result<Message> {
        if notification.recipients.is_empty() {
            return Err(Error::InvalidInput(
                "no notification recipients configured".to_string(),
            ));
        }

        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(notification.subject.clone());
        for recipient in &notification.recipients {
            builder = builder.to(parse_mailbox(recipient, "recipient")?);
        }

        let body = SinglePart::plain(notification.body.clone());
        let message = match &notification.attachment {
            Some(attachment) => {
                let content_type = ContentType::parse(&attachment.content_type).map_err(|error| {
                    Error::InvalidInput(format!(
                        "invalid attachment content type '{}': {error}",
                        attachment.content_type
                    ))
                })?;
                let part = MailAttachment::new(attachment.file_name.clone())
                    .body(attachment.content.clone(), content_type);
                builder.multipart(MultiPart::mixed().singlepart(body).singlepart(part))
            }
            None => builder.singlepart(body),
        };

        message.map_err(|error| Error::Notification(format!("could not build mail: {error}")))
    }
}

fn parse_mailbox(value: &str, role: &str) -> Result<Mailbox> {
    value
        .trim()
        .parse::<Mailbox>()
        .map_err(|error| Error::InvalidInput(format!("invalid {role} address '{value}': {error}")))
}

fn smtp_error(error: lettre::transport::smtp::Error) -> Error {
    Error::Notification(format!("SMTP: {error}"))
}

impl Notifier for SmtpNotifier {
    fn channel(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let message = self.message(notification)?;
        self.transport.send(message).await.map_err(|error| {
            Error::Notification(format!("SMTP delivery via {} failed: {error}", self.endpoint))
        })?;
        Ok(())
    }
}
