//! Per-recipient email opt-out.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::OutboxResult;

/// Recipients are identified by their address, trimmed and lower-cased.
pub fn recipient_key(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// `true` unless the recipient has opted out. Unknown recipients may be emailed.
    async fn can_send(&self, recipient: &str) -> OutboxResult<bool>;

    async fn set_opt_out(&self, recipient: &str, opted_out: bool) -> OutboxResult<()>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryPreferenceStore {
    opted_out: Arc<RwLock<HashMap<String, bool>>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn can_send(&self, recipient: &str) -> OutboxResult<bool> {
        let prefs = self.opted_out.read().await;
        Ok(!prefs.get(&recipient_key(recipient)).copied().unwrap_or(false))
    }

    async fn set_opt_out(&self, recipient: &str, opted_out: bool) -> OutboxResult<()> {
        self.opted_out
            .write()
            .await
            .insert(recipient_key(recipient), opted_out);
        Ok(())
    }
}
