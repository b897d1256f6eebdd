//! Diagnostic signals emitted by the dispatcher and scheduler.
//!
//! Signals are handed to a [`MetricsSink`] supplied at construction time
//! instead of a process-wide meter, so each engine instance (and each test)
//! observes only its own signals.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observable events of the escalation and delivery pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A notification reached its recipient
    Delivered {
        event_id: Uuid,
        provider: String,
        attempt: u32,
    },
    /// A delivery attempt failed and another one is scheduled
    RetryScheduled {
        event_id: Uuid,
        provider: String,
        attempt: u32,
        error: String,
    },
    /// All attempts for a notification failed
    Exhausted {
        event_id: Uuid,
        provider: String,
        attempts: u32,
        error: String,
    },
    /// A dispatch for an already terminal attempt was skipped
    DuplicateSuppressed { event_id: Uuid, provider: String },
    /// A target could not be resolved to recipients
    TargetUnresolved {
        event_id: Uuid,
        target_id: String,
        reason: String,
    },
    /// A rule fired without any notifiable recipient
    RuleWithoutRecipients { event_id: Uuid, rule_id: String },
    /// A recipient contact uses a channel without a registered provider
    ChannelUnavailable {
        event_id: Uuid,
        recipient: String,
        channel: String,
    },
    /// An escalation level was issued
    LevelNotified {
        event_id: Uuid,
        alert_id: String,
        level: usize,
        pass: u32,
    },
    /// An escalation run reached a terminal state
    RunFinished {
        event_id: Uuid,
        alert_id: String,
        outcome: &'static str,
    },
}

/// Receiver of diagnostic signals.
pub trait MetricsSink: Send + Sync {
    fn record(&self, signal: Signal);
}

/// Sink that turns every signal into a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, signal: Signal) {
        match &signal {
            Signal::Delivered { .. } | Signal::LevelNotified { .. } => {
                debug!(signal = ?signal, "escalation signal");
            }
            Signal::RunFinished { .. } => info!(signal = ?signal, "escalation signal"),
            _ => warn!(signal = ?signal, "escalation signal"),
        }
    }
}

/// Sink that keeps every signal in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    signals: Mutex<Vec<Signal>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all signals recorded so far.
    pub fn signals(&self) -> Vec<Signal> {
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded signals matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Signal) -> bool) -> usize {
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| predicate(s))
            .count()
    }
}

impl MetricsSink for MemorySink {
    fn record(&self, signal: Signal) {
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(signal);
    }
}
