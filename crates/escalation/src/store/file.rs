//! File-backed state for escalation runs and notification attempts.
//!
//! State lives in two JSON documents under a state directory:
//! `events.json` and `attempts.json`. Each write replaces the whole document
//! through a temporary file and a rename, so a crash leaves either the old or
//! the new contents on disk.
//!
//! Finished runs older than the retention window, measured back from the
//! latest saved event, are dropped together with their settled attempts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use notify::{AttemptKey, AttemptStore, AttemptStoreError, NotificationAttempt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::memory::latest;
use super::traits::{EventStore, StoreResult};
use crate::error::StoreError;
use crate::model::AlertEscalationEvent;

const EVENTS_FILE: &str = "events.json";
const ATTEMPTS_FILE: &str = "attempts.json";

/// Default retention of finished runs.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Durable event and attempt store.
#[derive(Debug)]
pub struct FileStateStore {
    state_dir: PathBuf,
    retention: Duration,
    events: Mutex<HashMap<Uuid, AlertEscalationEvent>>,
    attempts: Mutex<HashMap<AttemptKey, NotificationAttempt>>,
}

impl FileStateStore {
    /// Open the state directory, creating it if needed.
    pub async fn open(state_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let state_dir = state_dir.as_ref().to_path_buf();
        fs::create_dir_all(&state_dir)
            .await
            .map_err(|e| StoreError::io(&state_dir, e))?;

        let events: Vec<AlertEscalationEvent> = read_json(&state_dir.join(EVENTS_FILE)).await?;
        let attempts: Vec<NotificationAttempt> =
            read_json(&state_dir.join(ATTEMPTS_FILE)).await?;

        debug!(
            path = %state_dir.display(),
            events = events.len(),
            attempts = attempts.len(),
            "Opened escalation state"
        );

        Ok(Self {
            events: Mutex::new(events.into_iter().map(|e| (e.id, e)).collect()),
            attempts: Mutex::new(attempts.into_iter().map(|a| (a.key.clone(), a)).collect()),
            state_dir,
            retention: DEFAULT_RETENTION,
        })
    }

    /// Keep finished runs for `retention` instead of the default.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Get the state directory path
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

/// Read a JSON array, treating a missing file as empty.
async fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

async fn write_json<T: Serialize>(path: &Path, items: &[&T]) -> StoreResult<()> {
    let content = serde_json::to_string_pretty(items)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

async fn write_attempts(
    state_dir: &Path,
    attempts: &HashMap<AttemptKey, NotificationAttempt>,
) -> StoreResult<()> {
    let mut all: Vec<&NotificationAttempt> = attempts.values().collect();
    all.sort_by(|a, b| {
        (a.key.event_id, a.key.pass, &a.key.rule_id, &a.key.target_id).cmp(&(
            b.key.event_id,
            b.key.pass,
            &b.key.rule_id,
            &b.key.target_id,
        ))
    });
    write_json(&state_dir.join(ATTEMPTS_FILE), &all).await
}

#[async_trait]
impl EventStore for FileStateStore {
    async fn save_event(&self, event: &AlertEscalationEvent) -> StoreResult<()> {
        let mut events = self.events.lock().await;
        events.insert(event.id, event.clone());

        // Out-of-range windows keep everything.
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| event.updated_at.checked_sub_signed(retention));
        let expired: Vec<Uuid> = events
            .values()
            .filter(|e| !e.needs_recovery() && cutoff.is_some_and(|cutoff| e.updated_at < cutoff))
            .map(|e| e.id)
            .collect();
        if !expired.is_empty() {
            for id in &expired {
                events.remove(id);
            }
            let mut attempts = self.attempts.lock().await;
            let before = attempts.len();
            attempts.retain(|key, attempt| {
                !(expired.contains(&key.event_id) && attempt.is_terminal())
            });
            debug!(
                events = expired.len(),
                attempts = before - attempts.len(),
                "Compacted expired escalation state"
            );
            if attempts.len() != before {
                write_attempts(&self.state_dir, &attempts).await?;
            }
        }

        let mut all: Vec<&AlertEscalationEvent> = events.values().collect();
        all.sort_by_key(|e| e.created_at);
        write_json(&self.state_dir.join(EVENTS_FILE), &all).await
    }

    async fn get_event(&self, event_id: Uuid) -> StoreResult<Option<AlertEscalationEvent>> {
        Ok(self.events.lock().await.get(&event_id).cloned())
    }

    async fn latest_for_alert(
        &self,
        alert_id: &str,
    ) -> StoreResult<Option<AlertEscalationEvent>> {
        Ok(latest(self.events.lock().await.values(), alert_id))
    }

    async fn recoverable_events(&self) -> StoreResult<Vec<AlertEscalationEvent>> {
        Ok(self
            .events
            .lock()
            .await
            .values()
            .filter(|e| e.needs_recovery())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AttemptStore for FileStateStore {
    async fn get_attempt(
        &self,
        key: &AttemptKey,
    ) -> Result<Option<NotificationAttempt>, AttemptStoreError> {
        Ok(self.attempts.lock().await.get(key).cloned())
    }

    async fn save_attempt(&self, attempt: &NotificationAttempt) -> Result<(), AttemptStoreError> {
        let mut attempts = self.attempts.lock().await;
        attempts.insert(attempt.key.clone(), attempt.clone());
        write_attempts(&self.state_dir, &attempts)
            .await
            .map_err(AttemptStoreError::from)
    }

    async fn pending_attempts(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<NotificationAttempt>, AttemptStoreError> {
        Ok(self
            .attempts
            .lock()
            .await
            .values()
            .filter(|a| a.key.event_id == event_id && a.is_pending())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notify::{Channel, DeliveryKey};

    use crate::model::EventType;

    fn attempt(event_id: Uuid, target: &str) -> NotificationAttempt {
        let key = DeliveryKey {
            event_id,
            rule_id: "r0".to_string(),
            target_id: target.to_string(),
            pass: 0,
        };
        NotificationAttempt::new(
            key.with_provider("webhook"),
            Channel::Webhook,
            target,
            Some("[CRITICAL] api down"),
            "api down",
        )
    }

    #[tokio::test]
    async fn test_events_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut event = AlertEscalationEvent::new("a-1", "pol-1", Utc::now());
        {
            let store = FileStateStore::open(dir.path()).await.unwrap();
            assert_eq!(store.state_dir(), dir.path());
            store.save_event(&event).await.unwrap();
            event.event_type = EventType::Acknowledged;
            store.save_event(&event).await.unwrap();
        }

        let reopened = FileStateStore::open(dir.path()).await.unwrap();
        let loaded = reopened.get_event(event.id).await.unwrap().unwrap();
        assert_eq!(loaded.event_type, EventType::Acknowledged);
        assert!(reopened.recoverable_events().await.unwrap().is_empty());
        assert!(!dir.path().join("events.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_pending_attempts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let event_id = Uuid::new_v4();
        {
            let store = FileStateStore::open(dir.path()).await.unwrap();

            let mut failing = attempt(event_id, "alice");
            failing.attempt_count = 1;
            failing.last_error = Some("timeout".to_string());
            store.save_attempt(&failing).await.unwrap();

            let mut delivered = attempt(event_id, "bob");
            delivered.attempt_count = 1;
            delivered.outcome = Some(notify::AttemptOutcome::Delivered);
            store.save_attempt(&delivered).await.unwrap();
        }

        let reopened = FileStateStore::open(dir.path()).await.unwrap();
        let pending = reopened.pending_attempts(event_id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key.target_id, "alice");
        assert_eq!(pending[0].last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_expired_finished_runs_are_compacted() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let store = FileStateStore::open(dir.path())
            .await
            .unwrap()
            .with_retention(Duration::from_secs(3600));

        let mut old = AlertEscalationEvent::new("a-1", "pol-1", now - chrono::Duration::hours(3));
        old.event_type = EventType::Completed;
        old.next_step = None;
        let mut stale_active =
            AlertEscalationEvent::new("a-2", "pol-1", now - chrono::Duration::hours(3));
        stale_active.next_escalation_at = Some(now);
        store.save_event(&old).await.unwrap();
        store.save_event(&stale_active).await.unwrap();

        let mut delivered = attempt(old.id, "alice");
        delivered.attempt_count = 1;
        delivered.outcome = Some(notify::AttemptOutcome::Delivered);
        store.save_attempt(&delivered).await.unwrap();
        let mut other = attempt(stale_active.id, "bob");
        other.attempt_count = 1;
        other.outcome = Some(notify::AttemptOutcome::Delivered);
        store.save_attempt(&other).await.unwrap();

        let current = AlertEscalationEvent::new("a-3", "pol-1", now);
        store.save_event(&current).await.unwrap();

        let reopened = FileStateStore::open(dir.path()).await.unwrap();
        assert!(reopened.get_event(old.id).await.unwrap().is_none());
        assert!(reopened.get_event(stale_active.id).await.unwrap().is_some());
        assert!(reopened.get_attempt(&delivered.key).await.unwrap().is_none());
        assert!(reopened.get_attempt(&other.key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("events.json"), "not json").unwrap();
        assert!(matches!(
            FileStateStore::open(dir.path()).await,
            Err(StoreError::Serialization(_))
        ));
    }
}
