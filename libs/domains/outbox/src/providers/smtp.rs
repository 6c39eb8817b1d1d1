//! SMTP provider built on lettre.
//!
//! Intended for Mailpit/MailHog during local development, but works against
//! any relay when TLS and credentials are configured.

use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_or_default, env_parse};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::{DeliveryProvider, OutgoingEmail, SendReceipt, address_domain};
use crate::error::{DeliveryError, OutboxError, OutboxResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Off for local catch-all servers
    pub use_tls: bool,
}

impl SmtpConfig {
    /// Mailpit on its default port.
    pub fn mailpit() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1025,
            username: None,
            password: None,
            use_tls: false,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Environment variables: `SMTP_HOST` (localhost), `SMTP_PORT` (1025),
/// `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_USE_TLS` (false).
impl FromEnv for SmtpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_or_default("SMTP_HOST", "localhost"),
            port: env_parse("SMTP_PORT", 1025u16)?,
            username: std::env::var("SMTP_USERNAME").ok(),
            password: std::env::var("SMTP_PASSWORD").ok(),
            use_tls: env_parse("SMTP_USE_TLS", false)?,
        })
    }
}

pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: SmtpConfig,
}

impl SmtpProvider {
    pub fn new(config: SmtpConfig) -> OutboxResult<Self> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| {
                    OutboxError::Config(format!("Invalid SMTP relay {}: {}", config.host, e))
                })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let builder = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => {
                builder.credentials(Credentials::new(user.clone(), pass.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            transport: builder.port(config.port).build(),
            config,
        })
    }

    pub fn from_env() -> OutboxResult<Self> {
        Self::new(SmtpConfig::from_env()?)
    }
}

fn mailbox(name: Option<&str>, address: &str) -> Result<Mailbox, DeliveryError> {
    let address = address
        .parse()
        .map_err(|e| DeliveryError::permanent(format!("Invalid address '{}': {}", address, e)))?;
    Ok(Mailbox::new(name.filter(|n| !n.is_empty()).map(str::to_string), address))
}

/// Build the MIME message. The returned id doubles as the provider message id.
fn build_message(email: &OutgoingEmail) -> Result<(Message, String), DeliveryError> {
    let message_id = format!("<{}@{}>", Uuid::now_v7(), address_domain(&email.from_email));

    let message = Message::builder()
        .from(mailbox(Some(&email.from_name), &email.from_email)?)
        .to(mailbox(email.to_name.as_deref(), &email.to_email)?)
        .subject(&email.subject)
        .message_id(Some(message_id.clone()))
        .multipart(MultiPart::alternative_plain_html(
            email.text.clone(),
            email.html.clone(),
        ))
        .map_err(|e| DeliveryError::permanent(format!("Failed to build message: {}", e)))?;

    Ok((message, message_id))
}

#[async_trait]
impl DeliveryProvider for SmtpProvider {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, DeliveryError> {
        debug!(
            to = %email.to_email,
            host = %self.config.host,
            port = self.config.port,
            "Sending email via SMTP"
        );

        let (message, message_id) = build_message(email)?;

        self.transport.send(message).await.map_err(|e| {
            if e.is_permanent() {
                DeliveryError::permanent(format!("SMTP rejected message: {}", e))
            } else {
                DeliveryError::transient(format!("SMTP send failed: {}", e))
            }
        })?;

        info!(to = %email.to_email, message_id = %message_id, "Email accepted by SMTP server");
        Ok(SendReceipt { message_id })
    }

    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn health_check(&self) -> Result<(), DeliveryError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(DeliveryError::transient("SMTP server did not answer NOOP")),
            Err(e) => Err(DeliveryError::transient(format!("SMTP health check failed: {}", e))),
        }
    }
}
