//! Storage traits the escalation engine reads and writes through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Alert, AlertEscalationEvent, AlertStatus, EscalationPolicy, User};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_policy(&self, policy_id: &str) -> StoreResult<Option<EscalationPolicy>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn get_alert(&self, alert_id: &str) -> StoreResult<Option<Alert>>;

    /// Record an acknowledgement or closure; unknown alerts are ignored.
    async fn set_alert_status(&self, alert_id: &str, status: AlertStatus) -> StoreResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TeamStore: Send + Sync {
    /// Member user ids in membership order, `None` for an unknown team.
    async fn team_members(&self, team_id: &str) -> StoreResult<Option<Vec<String>>>;
}

/// Answers "who is on call for this schedule at this instant".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScheduleResolver: Send + Sync {
    async fn on_call_user(
        &self,
        schedule_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<String>>;
}

/// Durable escalation run records.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn save_event(&self, event: &AlertEscalationEvent) -> StoreResult<()>;

    async fn get_event(&self, event_id: Uuid) -> StoreResult<Option<AlertEscalationEvent>>;

    /// Most recently created run for an alert.
    async fn latest_for_alert(&self, alert_id: &str)
        -> StoreResult<Option<AlertEscalationEvent>>;

    /// Runs a restart must pick up: active ones, and finished ones with
    /// notification work outstanding.
    async fn recoverable_events(&self) -> StoreResult<Vec<AlertEscalationEvent>>;
}
