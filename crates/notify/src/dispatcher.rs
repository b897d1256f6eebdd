//! Notification dispatch with fixed-delay retries.
//!
//! [`NotificationDispatcher::dispatch`] makes the first delivery attempt
//! inline and returns its outcome. When that attempt fails and the
//! provider's retry policy allows more, the remaining attempts run in a
//! background task that only the run's cancellation token can stop. Every
//! attempt is persisted through the [`AttemptStore`], which is what makes
//! repeated dispatches of the same key idempotent and lets retries resume
//! from the stored count after a restart.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::attempts::{AttemptOutcome, AttemptStore, DeliveryKey, NotificationAttempt};
use crate::channels::Channel;
use crate::clock::Clock;
use crate::error::{ChannelError, DispatchError};
use crate::metrics::{MetricsSink, Signal};
use crate::registry::{ProviderRegistry, RegisteredProvider};

/// Result of a dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The message was accepted by the provider
    Delivered,
    /// The attempt failed; retries continue in the background
    Retrying,
    /// Every allowed attempt failed
    Exhausted,
    /// The run was cancelled before anything was sent
    Cancelled,
}

/// One message for one recipient on one channel.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub key: DeliveryKey,
    pub channel: Channel,
    /// Channel-specific address
    pub recipient: String,
    pub subject: Option<String>,
    pub message: String,
}

/// Sends notifications through registered providers.
#[derive(Clone)]
pub struct NotificationDispatcher {
    registry: Arc<ProviderRegistry>,
    attempts: Arc<dyn AttemptStore>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        attempts: Arc<dyn AttemptStore>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            attempts,
            metrics,
            clock,
        }
    }

    /// Registry the dispatcher selects providers from.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Deliver a message, retrying in the background on failure.
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
        cancel: CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let entry = self
            .registry
            .get(request.channel)
            .cloned()
            .ok_or(DispatchError::NoProvider(request.channel))?;

        let key = request.key.with_provider(entry.name());
        let mut attempt = match self.attempts.get_attempt(&key).await? {
            Some(existing) => match existing.outcome {
                Some(outcome) => {
                    debug!(
                        provider = entry.name(),
                        target_id = %existing.key.target_id,
                        outcome = ?outcome,
                        "Attempt already terminal, skipping send"
                    );
                    self.metrics.record(Signal::DuplicateSuppressed {
                        event_id: existing.key.event_id,
                        provider: existing.key.provider.clone(),
                    });
                    return Ok(match outcome {
                        AttemptOutcome::Delivered => DispatchOutcome::Delivered,
                        AttemptOutcome::Exhausted => DispatchOutcome::Exhausted,
                    });
                }
                None if existing.attempt_count > 0 => {
                    debug!(
                        provider = entry.name(),
                        target_id = %existing.key.target_id,
                        attempts = existing.attempt_count,
                        "Retries already in progress for this notification"
                    );
                    return Ok(DispatchOutcome::Retrying);
                }
                None => existing,
            },
            None => NotificationAttempt::new(
                key,
                request.channel,
                &request.recipient,
                request.subject.as_deref(),
                &request.message,
            ),
        };

        if cancel.is_cancelled() {
            debug!(provider = entry.name(), "Run cancelled, not sending");
            return Ok(DispatchOutcome::Cancelled);
        }

        let outcome = self.attempt_once(&entry, &mut attempt).await?;
        if outcome == DispatchOutcome::Retrying {
            let wait = entry.retry.retry_delay;
            self.spawn_retries(entry, attempt, cancel, wait);
        }
        Ok(outcome)
    }

    /// Whether any of the event's notifications is still waiting on a retry.
    pub async fn has_pending(&self, event_id: Uuid) -> Result<bool, DispatchError> {
        Ok(!self.attempts.pending_attempts(event_id).await?.is_empty())
    }

    /// Restart retry loops for an event's pending attempts.
    ///
    /// Each loop waits until the stored `next_retry_at` and continues from
    /// the stored attempt count. Returns the number of resumed attempts.
    pub async fn resume_pending(
        &self,
        event_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<usize, DispatchError> {
        let pending = self.attempts.pending_attempts(event_id).await?;
        let now = self.clock.now();
        let mut resumed = 0;

        for attempt in pending {
            let Some(entry) = self.registry.get(attempt.channel).cloned() else {
                warn!(
                    event_id = %event_id,
                    channel = %attempt.channel,
                    "No provider for pending attempt, leaving it unresolved"
                );
                continue;
            };
            if entry.name() != attempt.key.provider {
                warn!(
                    event_id = %event_id,
                    stored = %attempt.key.provider,
                    current = entry.name(),
                    "Provider changed since attempt was recorded, leaving it unresolved"
                );
                continue;
            }

            let wait = attempt
                .next_retry_at
                .and_then(|at| (at - now).to_std().ok())
                .unwrap_or(Duration::ZERO);
            self.spawn_retries(entry, attempt, cancel.clone(), wait);
            resumed += 1;
        }

        if resumed > 0 {
            info!(event_id = %event_id, resumed, "Resumed pending notification retries");
        }
        Ok(resumed)
    }

    async fn attempt_once(
        &self,
        entry: &RegisteredProvider,
        attempt: &mut NotificationAttempt,
    ) -> Result<DispatchOutcome, DispatchError> {
        let send = entry.provider.send(
            &attempt.recipient,
            attempt.subject.as_deref(),
            &attempt.message,
        );
        let result = match tokio::time::timeout(entry.timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(entry.timeout.as_secs())),
        };

        let now = self.clock.now();
        attempt.attempt_count += 1;
        attempt.last_attempt_at = Some(now);

        let event_id = attempt.key.event_id;
        let provider = attempt.key.provider.clone();

        let outcome = match result {
            Ok(()) => {
                attempt.outcome = Some(AttemptOutcome::Delivered);
                attempt.next_retry_at = None;
                debug!(
                    provider = %provider,
                    target_id = %attempt.key.target_id,
                    attempt = attempt.attempt_count,
                    "Notification delivered"
                );
                self.metrics.record(Signal::Delivered {
                    event_id,
                    provider,
                    attempt: attempt.attempt_count,
                });
                DispatchOutcome::Delivered
            }
            Err(e) => {
                let error = e.to_string();
                attempt.last_error = Some(error.clone());

                if attempt.attempt_count >= entry.retry.max_attempts() {
                    attempt.outcome = Some(AttemptOutcome::Exhausted);
                    attempt.next_retry_at = None;
                    warn!(
                        provider = %provider,
                        target_id = %attempt.key.target_id,
                        attempts = attempt.attempt_count,
                        error = %error,
                        "Notification delivery exhausted"
                    );
                    self.metrics.record(Signal::Exhausted {
                        event_id,
                        provider,
                        attempts: attempt.attempt_count,
                        error,
                    });
                    DispatchOutcome::Exhausted
                } else {
                    let delay = chrono::Duration::from_std(entry.retry.retry_delay)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                    attempt.next_retry_at = Some(now + delay);
                    debug!(
                        provider = %provider,
                        target_id = %attempt.key.target_id,
                        attempt = attempt.attempt_count,
                        error = %error,
                        "Notification attempt failed, retry scheduled"
                    );
                    self.metrics.record(Signal::RetryScheduled {
                        event_id,
                        provider,
                        attempt: attempt.attempt_count,
                        error,
                    });
                    DispatchOutcome::Retrying
                }
            }
        };

        self.attempts.save_attempt(attempt).await?;
        Ok(outcome)
    }

    fn spawn_retries(
        &self,
        entry: RegisteredProvider,
        mut attempt: NotificationAttempt,
        cancel: CancellationToken,
        first_wait: Duration,
    ) {
        let dispatcher = self.clone();

        tokio::spawn(async move {
            let mut wait = first_wait;
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!(
                            provider = %attempt.key.provider,
                            target_id = %attempt.key.target_id,
                            "Retry loop cancelled"
                        );
                        return;
                    }
                    () = tokio::time::sleep(wait) => {}
                }

                match dispatcher.attempt_once(&entry, &mut attempt).await {
                    Ok(DispatchOutcome::Retrying) => wait = entry.retry.retry_delay,
                    Ok(_) => return,
                    Err(e) => {
                        error!(
                            provider = %attempt.key.provider,
                            error = %e,
                            "Failed to record notification attempt, abandoning retries"
                        );
                        return;
                    }
                }
            }
        });
    }
}
