//! Escalation domain records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::Channel;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity levels for alerts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - normal operations
    Info,
    /// Warning - something needs attention
    #[default]
    Warning,
    /// Critical - immediate action required
    Critical,
}

impl Severity {
    /// Label used in notification subjects.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Lifecycle status of an alert as kept by the alert store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Triggered,
    Acknowledged,
    Closed,
}

/// An alert as seen by the escalation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub status: AlertStatus,
}

// =============================================================================
// Policies
// =============================================================================

/// How often a policy's rule list is traversed.
///
/// Stored as the `repeat_enabled` / `repeat_count` pair; a missing count
/// with repetition enabled means repeat until acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RepeatFields", into = "RepeatFields")]
pub enum RepeatPolicy {
    /// One pass only
    Never,
    /// One pass plus this many repeats
    Times(u32),
    /// Repeat until the run is acknowledged or stopped
    Forever,
}

impl RepeatPolicy {
    /// Whether another pass may start after pass number `pass` (0-based).
    #[must_use]
    pub const fn allows_pass_after(&self, pass: u32) -> bool {
        match self {
            Self::Never => false,
            Self::Times(repeats) => pass < *repeats,
            Self::Forever => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RepeatFields {
    #[serde(default)]
    repeat_enabled: bool,
    #[serde(default)]
    repeat_count: Option<u32>,
}

impl From<RepeatFields> for RepeatPolicy {
    fn from(fields: RepeatFields) -> Self {
        match (fields.repeat_enabled, fields.repeat_count) {
            (false, _) => Self::Never,
            (true, Some(count)) => Self::Times(count),
            (true, None) => Self::Forever,
        }
    }
}

impl From<RepeatPolicy> for RepeatFields {
    fn from(policy: RepeatPolicy) -> Self {
        match policy {
            RepeatPolicy::Never => Self {
                repeat_enabled: false,
                repeat_count: None,
            },
            RepeatPolicy::Times(count) => Self {
                repeat_enabled: true,
                repeat_count: Some(count),
            },
            RepeatPolicy::Forever => Self {
                repeat_enabled: true,
                repeat_count: None,
            },
        }
    }
}

/// Kinds of entities a rule can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    User,
    Team,
    Schedule,
}

impl TargetType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "team" => Some(Self::Team),
            "schedule" => Some(Self::Schedule),
            _ => None,
        }
    }
}

/// Who a rule notifies.
///
/// `target_type` is kept as stored so that unknown types surface as a
/// resolution failure for this target only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationTarget {
    pub target_type: String,
    pub target_id: String,
}

impl EscalationTarget {
    #[must_use]
    pub fn new(target_type: TargetType, target_id: impl Into<String>) -> Self {
        let target_type = match target_type {
            TargetType::User => "user",
            TargetType::Team => "team",
            TargetType::Schedule => "schedule",
        };
        Self {
            target_type: target_type.to_string(),
            target_id: target_id.into(),
        }
    }

    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self::new(TargetType::User, id)
    }

    #[must_use]
    pub fn team(id: impl Into<String>) -> Self {
        Self::new(TargetType::Team, id)
    }

    #[must_use]
    pub fn schedule(id: impl Into<String>) -> Self {
        Self::new(TargetType::Schedule, id)
    }

    /// Parsed target type, `None` when unknown.
    #[must_use]
    pub fn kind(&self) -> Option<TargetType> {
        TargetType::parse(&self.target_type)
    }
}

/// One step of a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRule {
    pub id: String,
    /// Firing order within a pass (0-based, unique per policy)
    pub position: u32,
    /// Minutes to wait after the previous rule (or the trigger, for
    /// position 0) before notifying this rule's targets
    #[serde(default)]
    pub escalation_delay: u32,
    #[serde(default)]
    pub targets: Vec<EscalationTarget>,
}

impl EscalationRule {
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.escalation_delay) * 60)
    }
}

/// Ordered escalation rules plus repetition behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub repeat: RepeatPolicy,
    #[serde(default)]
    pub rules: Vec<EscalationRule>,
}

/// Why a policy cannot drive an escalation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDefect {
    NoRules,
    DuplicatePosition(u32),
}

impl EscalationPolicy {
    /// Sort rules by position and check the ordering invariants.
    pub fn into_ordered(mut self) -> Result<Self, PolicyDefect> {
        if self.rules.is_empty() {
            return Err(PolicyDefect::NoRules);
        }
        self.rules.sort_by_key(|r| r.position);
        if let Some(pair) = self.rules.windows(2).find(|w| w[0].position == w[1].position) {
            return Err(PolicyDefect::DuplicatePosition(pair[0].position));
        }
        Ok(self)
    }
}

// =============================================================================
// Runtime records
// =============================================================================

/// Persisted state of an escalation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Triggered,
    Acknowledged,
    Completed,
    Stopped,
}

impl EventType {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Triggered)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Acknowledged => "acknowledged",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }
}

/// Position in a run: rule index and pass number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    pub level: usize,
    pub pass: u32,
}

impl Step {
    pub const FIRST: Self = Self { level: 0, pass: 0 };
}

/// One escalation run of an alert through a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEscalationEvent {
    pub id: Uuid,
    pub alert_id: String,
    pub policy_id: String,
    pub event_type: EventType,
    /// Index of the most recently notified rule
    pub current_level: usize,
    /// Full passes completed
    pub repeat_count: u32,
    /// When the armed timer fires; `None` unless waiting on a timer
    #[serde(default)]
    pub next_escalation_at: Option<DateTime<Utc>>,
    /// Step the armed timer will notify
    #[serde(default)]
    pub next_step: Option<Step>,
    /// Levels issued whose first dispatches have not all been recorded yet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub in_flight: Vec<Step>,
    /// Finished run whose notifications may still be retrying
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delivery_pending: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertEscalationEvent {
    /// Fresh run waiting on its first step.
    #[must_use]
    pub fn new(alert_id: &str, policy_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_id: alert_id.to_string(),
            policy_id: policy_id.to_string(),
            event_type: EventType::Triggered,
            current_level: 0,
            repeat_count: 0,
            next_escalation_at: None,
            next_step: Some(Step::FIRST),
            in_flight: Vec::new(),
            delivery_pending: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.event_type.is_terminal()
    }

    /// True while a timer is armed for this run.
    #[must_use]
    pub fn is_escalating(&self) -> bool {
        self.is_active() && self.next_escalation_at.is_some()
    }

    /// True when a restart has work to pick up for this run.
    #[must_use]
    pub fn needs_recovery(&self) -> bool {
        self.is_active() || self.delivery_pending || !self.in_flight.is_empty()
    }
}

// =============================================================================
// Directory records
// =============================================================================

/// A way to reach a user on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMethod {
    pub channel: Channel,
    pub address: String,
}

/// A notifiable person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Contact methods in order of preference
    #[serde(default)]
    pub contact_methods: Vec<ContactMethod>,
}

/// A group of users, members kept in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// One on-call shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub user_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A pre-computed on-call schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub shifts: Vec<Shift>,
}

impl Schedule {
    /// User on call at `at`: the first shift covering the instant.
    #[must_use]
    pub fn on_call_at(&self, at: DateTime<Utc>) -> Option<&str> {
        self.shifts
            .iter()
            .find(|s| s.start <= at && at < s.end)
            .map(|s| s.user_id.as_str())
    }
}
