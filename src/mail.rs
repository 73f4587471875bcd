//! Sending books to a Kindle address as email attachments.

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_SMTP_PORT: u16 = 587;

const SMTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Sends one file as an attachment.
pub trait Mailer {
    fn send(&self, recipient: &str, attachment: &[u8], filename: &str) -> Result<()>;
}

/// SMTP account used to send mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    /// Login name; the sender address when empty.
    pub username: String,
    pub password: String,
    /// Sender address. Must be on the Kindle account's approved list.
    pub from: String,
}

/// [`Mailer`] over SMTP with STARTTLS and login.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    settings: SmtpSettings,
}

impl SmtpMailer {
    pub fn new(settings: SmtpSettings) -> Result<Self> {
        if settings.server.is_empty() {
            return Err(Error::Config("SMTP server is not set".into()));
        }
        if settings.from.is_empty() {
            return Err(Error::Config("sender address is not set".into()));
        }
        Ok(Self { settings })
    }

    /// The message [`Mailer::send`] would deliver: empty subject and body,
    /// one `application/octet-stream` attachment.
    pub fn build_message(&self, recipient: &str, attachment: &[u8], filename: &str) -> Result<Message> {
        let from: Mailbox = self
            .settings
            .from
            .parse()
            .map_err(|e| Error::Mail(format!("invalid sender address {}: {e}", self.settings.from)))?;
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| Error::Mail(format!("invalid recipient address {recipient}: {e}")))?;
        let content_type = ContentType::parse("application/octet-stream")
            .map_err(|e| Error::Mail(e.to_string()))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject("")
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(String::new()))
                    .singlepart(
                        Attachment::new(filename.to_string()).body(attachment.to_vec(), content_type),
                    ),
            )
            .map_err(|e| Error::Mail(e.to_string()))
    }

    fn transport(&self) -> Result<SmtpTransport> {
        let username = if self.settings.username.is_empty() {
            &self.settings.from
        } else {
            &self.settings.username
        };
        let transport = SmtpTransport::starttls_relay(&self.settings.server)
            .map_err(|e| Error::Mail(e.to_string()))?
            .port(self.settings.port)
            .credentials(Credentials::new(username.clone(), self.settings.password.clone()))
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Ok(transport)
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, recipient: &str, attachment: &[u8], filename: &str) -> Result<()> {
        let message = self.build_message(recipient, attachment, filename)?;
        debug!(
            "Sending {} ({} bytes) via {}:{}",
            filename,
            attachment.len(),
            self.settings.server,
            self.settings.port
        );
        self.transport()?
            .send(&message)
            .map_err(|e| Error::Mail(e.to_string()))?;
        info!("Sent {} to {}", filename, recipient);
        Ok(())
    }
}
