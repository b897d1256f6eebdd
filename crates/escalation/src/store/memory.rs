//! In-memory stores backed by a JSON catalog.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::traits::{
    AlertStore, EventStore, PolicyStore, ScheduleResolver, StoreResult, TeamStore, UserDirectory,
};
use crate::error::StoreError;
use crate::model::{
    Alert, AlertEscalationEvent, AlertStatus, EscalationPolicy, Schedule, Team, User,
};

/// Directory data loaded at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub policies: Vec<EscalationPolicy>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

impl Catalog {
    /// Load a catalog from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Every store trait over in-process maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    policies: RwLock<HashMap<String, EscalationPolicy>>,
    alerts: RwLock<HashMap<String, Alert>>,
    users: RwLock<HashMap<String, User>>,
    teams: RwLock<HashMap<String, Team>>,
    schedules: RwLock<HashMap<String, Schedule>>,
    events: RwLock<HashMap<Uuid, AlertEscalationEvent>>,
}

fn index<T>(items: Vec<T>, id: impl Fn(&T) -> String) -> RwLock<HashMap<String, T>> {
    RwLock::new(items.into_iter().map(|item| (id(&item), item)).collect())
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_catalog(catalog: Catalog) -> Self {
        Self {
            policies: index(catalog.policies, |p| p.id.clone()),
            alerts: index(catalog.alerts, |a| a.id.clone()),
            users: index(catalog.users, |u| u.id.clone()),
            teams: index(catalog.teams, |t| t.id.clone()),
            schedules: index(catalog.schedules, |s| s.id.clone()),
            events: RwLock::default(),
        }
    }

    pub async fn insert_policy(&self, policy: EscalationPolicy) {
        self.policies.write().await.insert(policy.id.clone(), policy);
    }

    pub async fn insert_alert(&self, alert: Alert) {
        self.alerts.write().await.insert(alert.id.clone(), alert);
    }

    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn remove_user(&self, user_id: &str) -> Option<User> {
        self.users.write().await.remove(user_id)
    }

    pub async fn insert_team(&self, team: Team) {
        self.teams.write().await.insert(team.id.clone(), team);
    }

    pub async fn insert_schedule(&self, schedule: Schedule) {
        self.schedules
            .write()
            .await
            .insert(schedule.id.clone(), schedule);
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn get_policy(&self, policy_id: &str) -> StoreResult<Option<EscalationPolicy>> {
        Ok(self.policies.read().await.get(policy_id).cloned())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn get_alert(&self, alert_id: &str) -> StoreResult<Option<Alert>> {
        Ok(self.alerts.read().await.get(alert_id).cloned())
    }

    async fn set_alert_status(&self, alert_id: &str, status: AlertStatus) -> StoreResult<()> {
        if let Some(alert) = self.alerts.write().await.get_mut(alert_id) {
            alert.status = status;
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }
}

#[async_trait]
impl TeamStore for MemoryStore {
    async fn team_members(&self, team_id: &str) -> StoreResult<Option<Vec<String>>> {
        Ok(self
            .teams
            .read()
            .await
            .get(team_id)
            .map(|t| t.members.clone()))
    }
}

#[async_trait]
impl ScheduleResolver for MemoryStore {
    async fn on_call_user(
        &self,
        schedule_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<String>> {
        Ok(self
            .schedules
            .read()
            .await
            .get(schedule_id)
            .and_then(|s| s.on_call_at(at))
            .map(str::to_string))
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn save_event(&self, event: &AlertEscalationEvent) -> StoreResult<()> {
        self.events.write().await.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, event_id: Uuid) -> StoreResult<Option<AlertEscalationEvent>> {
        Ok(self.events.read().await.get(&event_id).cloned())
    }

    async fn latest_for_alert(
        &self,
        alert_id: &str,
    ) -> StoreResult<Option<AlertEscalationEvent>> {
        Ok(latest(self.events.read().await.values(), alert_id))
    }

    async fn recoverable_events(&self) -> StoreResult<Vec<AlertEscalationEvent>> {
        Ok(self
            .events
            .read()
            .await
            .values()
            .filter(|e| e.needs_recovery())
            .cloned()
            .collect())
    }
}

pub(crate) fn latest<'a>(
    events: impl Iterator<Item = &'a AlertEscalationEvent>,
    alert_id: &str,
) -> Option<AlertEscalationEvent> {
    events
        .filter(|e| e.alert_id == alert_id)
        .max_by_key(|e| e.created_at)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn catalog() -> Catalog {
        serde_json::from_value(json!({
            "policies": [{
                "id": "pol-1",
                "name": "Primary",
                "repeat_enabled": true,
                "repeat_count": 1,
                "rules": [{
                    "id": "r0",
                    "position": 0,
                    "escalation_delay": 0,
                    "targets": [{"target_type": "team", "target_id": "ops"}]
                }]
            }],
            "alerts": [{"id": "a-1", "title": "api down", "severity": "critical"}],
            "users": [{
                "id": "alice",
                "name": "Alice",
                "contact_methods": [{"channel": "email", "address": "alice@example.com"}]
            }],
            "teams": [{"id": "ops", "members": ["alice", "bob"]}],
            "schedules": [{
                "id": "primary",
                "shifts": [{
                    "user_id": "alice",
                    "start": "2026-01-01T00:00:00Z",
                    "end": "2026-01-02T00:00:00Z"
                }]
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_catalog_lookups() {
        let store = MemoryStore::from_catalog(catalog());

        assert!(store.get_policy("pol-1").await.unwrap().is_some());
        assert!(store.get_policy("missing").await.unwrap().is_none());
        assert_eq!(
            store.team_members("ops").await.unwrap(),
            Some(vec!["alice".to_string(), "bob".to_string()])
        );
        assert!(store.team_members("nobody").await.unwrap().is_none());

        let alert = store.get_alert("a-1").await.unwrap().unwrap();
        assert_eq!(alert.status, AlertStatus::Triggered);
    }

    #[tokio::test]
    async fn test_schedule_lookup_uses_instant() {
        let store = MemoryStore::from_catalog(catalog());
        let inside = "2026-01-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();

        assert_eq!(
            store.on_call_user("primary", inside).await.unwrap(),
            Some("alice".to_string())
        );
        assert_eq!(
            store
                .on_call_user("primary", inside + Duration::days(1))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_set_alert_status() {
        let store = MemoryStore::from_catalog(catalog());
        store
            .set_alert_status("a-1", AlertStatus::Acknowledged)
            .await
            .unwrap();
        let alert = store.get_alert("a-1").await.unwrap().unwrap();
        assert_eq!(alert.status, AlertStatus::Acknowledged);

        // Unknown alerts are ignored.
        store
            .set_alert_status("missing", AlertStatus::Closed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_latest_and_recoverable_events() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut old = AlertEscalationEvent::new("a-1", "pol-1", now - Duration::hours(1));
        old.event_type = crate::model::EventType::Completed;
        let current = AlertEscalationEvent::new("a-1", "pol-1", now);
        let mut settling = AlertEscalationEvent::new("a-3", "pol-1", now);
        settling.event_type = crate::model::EventType::Completed;
        settling.delivery_pending = true;
        store.save_event(&old).await.unwrap();
        store.save_event(&current).await.unwrap();
        store.save_event(&settling).await.unwrap();

        let latest = store.latest_for_alert("a-1").await.unwrap().unwrap();
        assert_eq!(latest.id, current.id);

        let mut recoverable: Vec<_> = store
            .recoverable_events()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        recoverable.sort();
        let mut expected = vec![current.id, settling.id];
        expected.sort();
        assert_eq!(recoverable, expected);
        assert!(store.latest_for_alert("a-2").await.unwrap().is_none());
    }
}
