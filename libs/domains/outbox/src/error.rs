//! Error types for the outbox domain.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Infrastructure and input errors.
///
/// Delivery failures are not represented here; they are [`DeliveryError`]
/// values that the processor turns into `FAILED`/`CANCELLED` transitions.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Outbox entry not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// A persisted row could not be mapped back to the domain model.
    #[error("Corrupt outbox row {id}: {details}")]
    CorruptRow { id: Uuid, details: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for OutboxError {
    fn from(err: sea_orm::DbErr) -> Self {
        OutboxError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for OutboxError {
    fn from(err: serde_json::Error) -> Self {
        OutboxError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<core_config::ConfigError> for OutboxError {
    fn from(err: core_config::ConfigError) -> Self {
        OutboxError::Config(err.to_string())
    }
}

/// A failed attempt to hand a message to the delivery provider.
///
/// Every variant is retried under the same backoff schedule; the category
/// is kept for logs, metrics and the audit trail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network failure, provider 5xx, rate limiting
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The provider rejected the message itself (bad address, auth, payload)
    #[error("provider rejected message: {0}")]
    Permanent(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

impl DeliveryError {
    pub fn transient(message: impl Into<String>) -> Self {
        DeliveryError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        DeliveryError::Permanent(message.into())
    }

    /// Label used in metrics and audit metadata.
    pub fn category(&self) -> &'static str {
        match self {
            DeliveryError::Transient(_) => "transient",
            DeliveryError::Permanent(_) => "permanent",
            DeliveryError::Timeout(_) => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_error_categories() {
        assert_eq!(DeliveryError::transient("503").category(), "transient");
        assert_eq!(DeliveryError::permanent("bad address").category(), "permanent");
        assert_eq!(
            DeliveryError::Timeout(Duration::from_secs(10)).category(),
            "timeout"
        );
    }

    #[test]
    fn test_timeout_message_mentions_duration() {
        let err = DeliveryError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "provider call timed out after 1.5s");
    }

    #[test]
    fn test_db_error_maps_to_database() {
        let err: OutboxError = sea_orm::DbErr::Custom("pool closed".into()).into();
        assert!(matches!(err, OutboxError::Database(msg) if msg.contains("pool closed")));
    }
}
