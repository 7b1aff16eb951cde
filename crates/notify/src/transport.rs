//! SMTP transport behind a seam so tests can record outbound mail.

use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Deserialize;

use crate::error::NotifyError;

/// Custom header carrying the history id, read back from provider feedback
/// events to locate the row to update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationIdHeader(pub String);

impl Header for NotificationIdHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("NotificationId")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

pub trait MailTransport: Send + Sync {
    fn send(&self, message: &Message) -> Result<(), NotifyError>;
}

/// SMTP mailer; unauthenticated when no credentials are configured (e.g. a
/// local MailDev relay).
pub struct SmtpMailer {
    mailer: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let mailer = if config.username.is_empty() || config.password.is_empty() {
            tracing::info!(
                smtp_host = %config.host,
                smtp_port = config.port,
                "SMTP credentials not configured, using unauthenticated connection"
            );
            SmtpTransport::builder_dangerous(&config.host)
                .port(config.port)
                .build()
        } else {
            tracing::info!(
                smtp_host = %config.host,
                smtp_port = config.port,
                from = %config.from_address,
                "SMTP transport initialized with authentication and TLS"
            );
            let creds = Credentials::new(config.username.clone(), config.password.clone());
            SmtpTransport::relay(&config.host)
                .map_err(|err| NotifyError::Transport(err.to_string()))?
                .port(config.port)
                .credentials(creds)
                .build()
        };

        Ok(Self { mailer })
    }
}

impl MailTransport for SmtpMailer {
    fn send(&self, message: &Message) -> Result<(), NotifyError> {
        self.mailer
            .send(message)
            .map(|_| ())
            .map_err(|err| NotifyError::Transport(err.to_string()))
    }
}
