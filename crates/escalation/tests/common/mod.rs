//! Shared fixtures for escalation integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use escalation::{
    Alert, AlertStatus, ContactMethod, EscalationPolicy, EscalationRule, EscalationScheduler,
    EscalationTarget, MemoryStore, RepeatPolicy, SchedulerConfig, SchedulerDeps, Severity,
    TargetResolver, User,
};
use notify::{
    Channel, ChannelError, Clock, MemoryAttemptStore, MemorySink, NotificationDispatcher,
    NotificationProvider, ProviderRegistry, RetryPolicy, TokioClock,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;

// =============================================================================
// Recording provider
// =============================================================================

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub recipient: String,
    pub subject: Option<String>,
    pub message: String,
    pub at: Instant,
}

/// Webhook-channel provider that records every send.
///
/// Sends to recipients in `failing` always fail.
pub struct RecordingProvider {
    failing: HashSet<String>,
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingProvider {
    pub fn new() -> Arc<Self> {
        Self::failing_for(&[])
    }

    pub fn failing_for(recipients: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: recipients.iter().map(ToString::to_string).collect(),
            sent: Mutex::new(vec![]),
        })
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.recipient == recipient)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationProvider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn channel(&self) -> Channel {
        Channel::Webhook
    }

    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        message: &str,
    ) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(SentMessage {
            recipient: recipient.to_string(),
            subject: subject.map(str::to_string),
            message: message.to_string(),
            at: Instant::now(),
        });
        if self.failing.contains(recipient) {
            Err(ChannelError::Other("mailbox unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Catalog builders
// =============================================================================

/// A user reachable on the webhook channel at their own id.
pub fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        name: id.to_string(),
        contact_methods: vec![ContactMethod {
            channel: Channel::Webhook,
            address: id.to_string(),
        }],
    }
}

pub fn alert(id: &str) -> Alert {
    Alert {
        id: id.to_string(),
        organization_id: None,
        title: "api down".to_string(),
        description: Some("api-gateway is not responding".to_string()),
        severity: Severity::Critical,
        status: AlertStatus::Triggered,
    }
}

pub fn rule(position: u32, delay_minutes: u32, targets: Vec<EscalationTarget>) -> EscalationRule {
    EscalationRule {
        id: format!("rule-{position}"),
        position,
        escalation_delay: delay_minutes,
        targets,
    }
}

pub fn policy(id: &str, repeat: RepeatPolicy, rules: Vec<EscalationRule>) -> EscalationPolicy {
    EscalationPolicy {
        id: id.to_string(),
        organization_id: None,
        name: id.to_string(),
        repeat,
        rules,
    }
}

pub fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

// =============================================================================
// Engine harness
// =============================================================================

/// State that outlives a single scheduler instance.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub attempts: Arc<MemoryAttemptStore>,
    pub metrics: Arc<MemorySink>,
    pub clock: Arc<dyn Clock>,
    pub config: SchedulerConfig,
}

pub struct Engine {
    pub scheduler: EscalationScheduler,
    pub task: JoinHandle<()>,
    pub provider: Arc<RecordingProvider>,
}

impl Harness {
    pub async fn new(users: &[&str]) -> Self {
        let store = Arc::new(MemoryStore::new());
        for id in users {
            store.insert_user(user(id)).await;
        }
        Self {
            store,
            attempts: Arc::new(MemoryAttemptStore::new()),
            metrics: Arc::new(MemorySink::new()),
            clock: Arc::new(TokioClock::new(Utc::now())),
            config: SchedulerConfig {
                min_repeat_interval: minutes(1),
                command_buffer: 64,
            },
        }
    }

    /// Start a scheduler whose webhook channel is served by `provider`.
    pub fn start(&self, provider: Arc<RecordingProvider>, retry: RetryPolicy) -> Engine {
        let mut registry = ProviderRegistry::new();
        registry
            .register_provider(provider.clone(), retry, Duration::from_secs(30))
            .unwrap();

        let dispatcher = NotificationDispatcher::new(
            Arc::new(registry),
            self.attempts.clone(),
            self.metrics.clone(),
            self.clock.clone(),
        );
        let deps = SchedulerDeps {
            policies: self.store.clone(),
            alerts: self.store.clone(),
            events: self.store.clone(),
            resolver: Arc::new(TargetResolver::new(
                self.store.clone(),
                self.store.clone(),
                self.store.clone(),
            )),
            dispatcher,
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
        };

        let (scheduler, task) = EscalationScheduler::spawn(deps, self.config);
        Engine {
            scheduler,
            task,
            provider,
        }
    }

    pub fn start_default(&self) -> Engine {
        self.start(
            RecordingProvider::new(),
            RetryPolicy::new(3, Duration::from_secs(10)),
        )
    }
}
