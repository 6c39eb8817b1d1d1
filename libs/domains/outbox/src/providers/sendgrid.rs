//! SendGrid v3 mail-send provider.

use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_or_default, env_parse, env_required};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DeliveryProvider, OutgoingEmail, SendReceipt};
use crate::error::{DeliveryError, OutboxError, OutboxResult};

#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub api_key: String,
    /// Defaults to the production API
    pub api_url: String,
    /// HTTP-level timeout; the processor applies its own overall send timeout too
    pub request_timeout: Duration,
}

impl SendGridConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: "https://api.sendgrid.com/v3".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

/// Environment variables:
/// - `SENDGRID_API_KEY` (required)
/// - `SENDGRID_API_URL` (default `https://api.sendgrid.com/v3`)
/// - `SENDGRID_TIMEOUT_SECS` (default 15)
impl FromEnv for SendGridConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: env_required("SENDGRID_API_KEY")?,
            api_url: env_or_default("SENDGRID_API_URL", "https://api.sendgrid.com/v3"),
            request_timeout: Duration::from_secs(env_parse("SENDGRID_TIMEOUT_SECS", 15u64)?),
        })
    }
}

pub struct SendGridProvider {
    config: SendGridConfig,
    client: Client,
}

impl SendGridProvider {
    pub fn new(config: SendGridConfig) -> OutboxResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| OutboxError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn from_env() -> OutboxResult<Self> {
        Self::new(SendGridConfig::from_env()?)
    }
}

#[derive(Debug, Serialize)]
struct MailSendRequest<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    subject: &'a str,
    content: [Content<'a>; 2],
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl<'a> MailSendRequest<'a> {
    fn from_email(email: &'a OutgoingEmail) -> Self {
        Self {
            personalizations: [Personalization {
                to: [Address {
                    email: &email.to_email,
                    name: email.to_name.as_deref().filter(|n| !n.is_empty()),
                }],
            }],
            from: Address {
                email: &email.from_email,
                name: Some(email.from_name.as_str()).filter(|n| !n.is_empty()),
            },
            subject: &email.subject,
            // SendGrid requires text/plain before text/html
            content: [
                Content {
                    content_type: "text/plain",
                    value: &email.text,
                },
                Content {
                    content_type: "text/html",
                    value: &email.html,
                },
            ],
        }
    }
}

/// 429 and 5xx are worth retrying; any other rejection is about the message.
fn classify(status: StatusCode, body: &str) -> DeliveryError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .map(|b| {
            b.errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_else(|_| body.to_string());
    let message = format!("SendGrid {}: {}", status.as_u16(), detail);

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DeliveryError::Transient(message)
    } else {
        DeliveryError::Permanent(message)
    }
}

#[async_trait]
impl DeliveryProvider for SendGridProvider {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, DeliveryError> {
        debug!(to = %email.to_email, subject = %email.subject, "Sending email via SendGrid");

        let response = self
            .client
            .post(format!("{}/mail/send", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(&MailSendRequest::from_email(email))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(self.config.request_timeout)
                } else {
                    DeliveryError::transient(format!("SendGrid request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        let message_id = match response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
        {
            Some(id) => id.to_string(),
            None => {
                let id = format!("sendgrid-{}", Uuid::now_v7());
                warn!(
                    to = %email.to_email,
                    fallback_id = %id,
                    "SendGrid accepted message without X-Message-Id"
                );
                id
            }
        };

        info!(to = %email.to_email, message_id = %message_id, "Email accepted by SendGrid");
        Ok(SendReceipt { message_id })
    }

    fn name(&self) -> &'static str {
        "sendgrid"
    }

    async fn health_check(&self) -> Result<(), DeliveryError> {
        // No dedicated health endpoint; validate the key shape instead of spending quota
        if self.config.api_key.starts_with("SG.") {
            Ok(())
        } else {
            Err(DeliveryError::permanent("SENDGRID_API_KEY does not look like a SendGrid key"))
        }
    }
}
