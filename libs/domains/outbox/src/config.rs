//! Worker configuration loaded from the environment.

use core_config::{ConfigError, FromEnv, env_or_default, env_parse};
use std::time::Duration;
use strum::{Display, EnumString};

/// How an entry whose `(template_key, template_version)` does not resolve is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MissingTemplatePolicy {
    /// Cancel on the first pass; a retry cannot make the template appear.
    #[default]
    Cancel,
    /// Treat it like any other failed attempt.
    Retry,
}

/// Settings for the delivery loop and the stale-claim reconciler.
///
/// Environment variables:
/// - `OUTBOX_POLL_INTERVAL_MS` (default 5000)
/// - `OUTBOX_BATCH_SIZE` (default 10)
/// - `OUTBOX_SEND_TIMEOUT_MS` (default 10000)
/// - `EMAIL_FROM_ADDRESS`, `EMAIL_FROM_NAME`
/// - `OUTBOX_MISSING_TEMPLATE_POLICY` (`cancel` | `retry`)
/// - `OUTBOX_STALE_CLAIM_SECS` (default 600)
/// - `OUTBOX_RECONCILE_INTERVAL_SECS` (default 60)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: u64,
    pub send_timeout: Duration,
    pub from_email: String,
    pub from_name: String,
    pub missing_template: MissingTemplatePolicy,
    pub stale_claim_after: Duration,
    pub reconcile_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5_000),
            batch_size: 10,
            send_timeout: Duration::from_millis(10_000),
            from_email: "no-reply@lms.local".to_string(),
            from_name: "Continuing Education".to_string(),
            missing_template: MissingTemplatePolicy::Cancel,
            stale_claim_after: Duration::from_secs(600),
            reconcile_interval: Duration::from_secs(60),
        }
    }
}

impl FromEnv for WorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            poll_interval: Duration::from_millis(env_parse("OUTBOX_POLL_INTERVAL_MS", 5_000u64)?),
            batch_size: env_parse("OUTBOX_BATCH_SIZE", defaults.batch_size)?,
            send_timeout: Duration::from_millis(env_parse("OUTBOX_SEND_TIMEOUT_MS", 10_000u64)?),
            from_email: env_or_default("EMAIL_FROM_ADDRESS", &defaults.from_email),
            from_name: env_or_default("EMAIL_FROM_NAME", &defaults.from_name),
            missing_template: env_parse(
                "OUTBOX_MISSING_TEMPLATE_POLICY",
                defaults.missing_template,
            )?,
            stale_claim_after: Duration::from_secs(env_parse("OUTBOX_STALE_CLAIM_SECS", 600u64)?),
            reconcile_interval: Duration::from_secs(env_parse(
                "OUTBOX_RECONCILE_INTERVAL_SECS",
                60u64,
            )?),
        };

        config.validate()?;
        Ok(config)
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("OUTBOX_BATCH_SIZE must be at least 1".into()));
        }
        if self.poll_interval.is_zero() || self.reconcile_interval.is_zero() {
            return Err(ConfigError::Invalid("poll intervals must be non-zero".into()));
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::Invalid("OUTBOX_SEND_TIMEOUT_MS must be non-zero".into()));
        }
        // A live batch must never look abandoned to the reconciler
        let batch = u32::try_from(self.batch_size).unwrap_or(u32::MAX);
        if self.stale_claim_after <= self.send_timeout.saturating_mul(batch) {
            return Err(ConfigError::Invalid(
                "OUTBOX_STALE_CLAIM_SECS must exceed OUTBOX_BATCH_SIZE x the send timeout".into(),
            ));
        }
        if !self.from_email.contains('@') {
            return Err(ConfigError::Invalid(format!(
                "EMAIL_FROM_ADDRESS is not an address: {}",
                self.from_email
            )));
        }
        Ok(())
    }
}
