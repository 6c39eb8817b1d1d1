use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{DeliveryProvider, OutgoingEmail, SendReceipt};
use crate::error::DeliveryError;

/// Next outcome for [`RecordingProvider::send`].
#[derive(Debug, Clone)]
pub enum Scripted {
    Accept,
    Fail(DeliveryError),
    /// Sleep before accepting, to exercise send timeouts
    Stall(Duration),
    Panic(&'static str),
}

/// Provider that records every message instead of delivering it.
///
/// Outcomes are taken from a script, one per call; once the script runs out
/// every send is accepted (or fails, for [`RecordingProvider::failing`]).
/// Clones share the script and the outbox.
#[derive(Debug, Clone, Default)]
pub struct RecordingProvider {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    fallback: Option<DeliveryError>,
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
    calls: Arc<Mutex<usize>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send fails with a transient error.
    pub fn failing(message: &str) -> Self {
        Self {
            fallback: Some(DeliveryError::transient(message)),
            ..Self::default()
        }
    }

    pub async fn push(&self, outcome: Scripted) {
        self.script.lock().await.push_back(outcome);
    }

    /// Messages that were accepted.
    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }

    /// Every call, accepted or not.
    pub async fn calls(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait]
impl DeliveryProvider for RecordingProvider {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, DeliveryError> {
        let call = {
            let mut calls = self.calls.lock().await;
            *calls += 1;
            *calls
        };
        let outcome = self.script.lock().await.pop_front().unwrap_or_else(|| {
            match &self.fallback {
                Some(err) => Scripted::Fail(err.clone()),
                None => Scripted::Accept,
            }
        });

        match outcome {
            Scripted::Accept => {}
            Scripted::Fail(err) => return Err(err),
            Scripted::Stall(delay) => tokio::time::sleep(delay).await,
            Scripted::Panic(msg) => panic!("{msg}"),
        }

        self.sent.lock().await.push(email.clone());
        Ok(SendReceipt {
            message_id: format!("recorded-{call}"),
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }

    async fn health_check(&self) -> Result<(), DeliveryError> {
        Ok(())
    }
}
