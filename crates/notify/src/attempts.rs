//! Durable notification attempt records.
//!
//! One [`NotificationAttempt`] exists per delivery key. It carries enough of
//! the original request to resume retries after a restart, and its terminal
//! outcome makes repeated dispatches for the same key a no-op.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::channels::Channel;
use crate::error::AttemptStoreError;

/// Identity of one notification within an escalation run, before a provider
/// has been chosen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryKey {
    pub event_id: Uuid,
    pub rule_id: String,
    /// Id of the notified entity (user id for fanned-out targets)
    pub target_id: String,
    /// Pass number; repeat passes notify again
    pub pass: u32,
}

impl DeliveryKey {
    /// Complete the key with the provider that will deliver it.
    #[must_use]
    pub fn with_provider(self, provider: &str) -> AttemptKey {
        AttemptKey {
            event_id: self.event_id,
            rule_id: self.rule_id,
            target_id: self.target_id,
            pass: self.pass,
            provider: provider.to_string(),
        }
    }
}

/// Idempotency key of a notification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptKey {
    pub event_id: Uuid,
    pub rule_id: String,
    pub target_id: String,
    pub pass: u32,
    pub provider: String,
}

/// Terminal outcome of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Delivered,
    Exhausted,
}

/// Durable state of one notification's delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub key: AttemptKey,
    pub channel: Channel,
    pub recipient: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    /// Attempts made so far
    pub attempt_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the next retry is due, while retries remain
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcome: Option<AttemptOutcome>,
}

impl NotificationAttempt {
    /// Fresh record with no attempts made.
    #[must_use]
    pub fn new(
        key: AttemptKey,
        channel: Channel,
        recipient: &str,
        subject: Option<&str>,
        message: &str,
    ) -> Self {
        Self {
            key,
            channel,
            recipient: recipient.to_string(),
            subject: subject.map(str::to_string),
            message: message.to_string(),
            attempt_count: 0,
            last_error: None,
            last_attempt_at: None,
            next_retry_at: None,
            outcome: None,
        }
    }

    /// True once delivered or out of retries.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// True when at least one attempt failed and retries remain.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.attempt_count > 0 && !self.is_terminal()
    }
}

/// Persistence for attempt records.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn get_attempt(
        &self,
        key: &AttemptKey,
    ) -> Result<Option<NotificationAttempt>, AttemptStoreError>;

    async fn save_attempt(&self, attempt: &NotificationAttempt) -> Result<(), AttemptStoreError>;

    /// Non-terminal attempts with at least one failure for an event.
    async fn pending_attempts(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<NotificationAttempt>, AttemptStoreError>;
}

/// In-memory attempt store.
#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    attempts: RwLock<HashMap<AttemptKey, NotificationAttempt>>,
}

impl MemoryAttemptStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records for an event.
    pub async fn attempts_for(&self, event_id: Uuid) -> Vec<NotificationAttempt> {
        self.attempts
            .read()
            .await
            .values()
            .filter(|a| a.key.event_id == event_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn get_attempt(
        &self,
        key: &AttemptKey,
    ) -> Result<Option<NotificationAttempt>, AttemptStoreError> {
        Ok(self.attempts.read().await.get(key).cloned())
    }

    async fn save_attempt(&self, attempt: &NotificationAttempt) -> Result<(), AttemptStoreError> {
        self.attempts
            .write()
            .await
            .insert(attempt.key.clone(), attempt.clone());
        Ok(())
    }

    async fn pending_attempts(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<NotificationAttempt>, AttemptStoreError> {
        Ok(self
            .attempts
            .read()
            .await
            .values()
            .filter(|a| a.key.event_id == event_id && a.is_pending())
            .cloned()
            .collect())
    }
}
