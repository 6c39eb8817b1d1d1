//! Delivery providers.
//!
//! - [`SendGridProvider`]: SendGrid v3 HTTP API, used in production
//! - [`SmtpProvider`]: plain SMTP via lettre, for Mailpit/MailHog in development
//! - [`RecordingProvider`]: in-process provider with scripted outcomes

mod recording;
mod sendgrid;
mod smtp;

pub use recording::{RecordingProvider, Scripted};
pub use sendgrid::{SendGridConfig, SendGridProvider};
pub use smtp::{SmtpConfig, SmtpProvider};

use async_trait::async_trait;

use crate::error::DeliveryError;

/// A fully rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from_email: String,
    pub from_name: String,
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Correlates with the provider's own delivery record
    pub message_id: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, DeliveryError>;

    /// Provider name for logs and metrics.
    fn name(&self) -> &'static str;

    async fn health_check(&self) -> Result<(), DeliveryError>;
}

/// Host part of an address, used to build RFC 5322 Message-IDs.
pub(crate) fn address_domain(address: &str) -> &str {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost")
}
