use std::time::Duration;

use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::config::SmtpConfig;
use crate::constants::SMTP_SEND_RETRIES;
use crate::credentials::{CredentialStore, SMTP_HOST, SMTP_PASSWORD, SMTP_PORT, SMTP_SENDER};
use crate::retry::{RetryConfig, with_retry};

/// Failure to deliver a reply. Independent of whether generation succeeded.
#[derive(Debug, Error)]
pub enum MailSendError {
    #[error("Missing SMTP credentials: {0}")]
    MissingCredentials(String),
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("Failed to build email message: {0}")]
    Build(String),
    #[error("Failed to send email: {0}")]
    Transport(String),
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    retry: RetryConfig,
}

impl SmtpMailer {
    pub fn new(
        config: &SmtpConfig,
        sender: &str,
        password: &str,
        from_name: Option<&str>,
    ) -> Result<Self, MailSendError> {
        let from = parse_mailbox(sender)?;
        let from = match from_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => Mailbox::new(Some(name.to_string()), from.email),
            None => from,
        };

        let creds = Credentials::new(sender.trim().to_string(), password.to_string());

        // Always STARTTLS - plaintext SMTP exposes credentials
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
            .map_err(|e| MailSendError::Transport(format!("{}: {}", config.server, e)))?
            .port(config.port)
            .credentials(creds)
            .authentication(vec![Mechanism::Plain, Mechanism::Login])
            .build();

        Ok(Self {
            transport,
            from,
            retry: RetryConfig::new(
                SMTP_SEND_RETRIES,
                Duration::from_secs(1),
                Duration::from_secs(4),
            ),
        })
    }

    /// Build a mailer from stored credentials. `SMTP_HOST`/`SMTP_PORT`
    /// secrets override the config file.
    pub fn from_credentials(
        config: &SmtpConfig,
        creds: &CredentialStore,
        from_name: Option<&str>,
    ) -> Result<Self, MailSendError> {
        let sender = creds
            .get(SMTP_SENDER)
            .ok_or_else(|| MailSendError::MissingCredentials(SMTP_SENDER.to_string()))?;
        let password = creds
            .get(SMTP_PASSWORD)
            .ok_or_else(|| MailSendError::MissingCredentials(SMTP_PASSWORD.to_string()))?;

        let mut config = config.clone();
        if let Some(host) = creds.get(SMTP_HOST) {
            config.server = host;
        }
        if let Some(port) = creds.get(SMTP_PORT) {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(_) => tracing::warn!("Ignoring invalid SMTP_PORT value '{}'", port),
            }
        }

        Self::new(&config, &sender, &password, from_name)
    }

    pub fn build_message(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<Message, MailSendError> {
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);

        // Comma-separated recipients, ignoring trailing commas
        let mut any_recipient = false;
        for to_addr in recipient.split(',') {
            let to_addr = to_addr.trim();
            if !to_addr.is_empty() {
                builder = builder.to(parse_mailbox(to_addr)?);
                any_recipient = true;
            }
        }
        if !any_recipient {
            return Err(MailSendError::InvalidAddress {
                address: recipient.to_string(),
                reason: "no recipient given".to_string(),
            });
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| MailSendError::Build(e.to_string()))
    }

    pub async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), MailSendError> {
        let message = self.build_message(recipient, subject, body)?;

        with_retry(
            &self.retry,
            |e: &lettre::transport::smtp::Error| e.is_transient() || e.is_timeout(),
            || self.transport.send(message.clone()),
        )
        .await
        .map_err(|e| MailSendError::Transport(e.to_string()))?;

        tracing::info!("Email sent to {}", recipient);
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailSendError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| MailSendError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}
