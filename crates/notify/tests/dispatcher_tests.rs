//! Integration tests for retrying notification dispatch.
//!
//! Time is paused so retry spacing can be asserted exactly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use notify::{
    AttemptOutcome, AttemptStore, Channel, ChannelError, DeliveryKey, DispatchError,
    DispatchOutcome, DispatchRequest, MemoryAttemptStore, MemorySink, NotificationAttempt,
    NotificationDispatcher, NotificationProvider, ProviderRegistry, RetryPolicy, Signal,
    TokioClock,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// =============================================================================
// Fake provider
// =============================================================================

/// Provider that fails the first `failures` sends and records call times.
struct FlakyProvider {
    failures: u32,
    calls: AtomicU32,
    times: Mutex<Vec<Instant>>,
}

impl FlakyProvider {
    fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
            times: Mutex::new(vec![]),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn times(&self) -> Vec<Instant> {
        self.times.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationProvider for FlakyProvider {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn channel(&self) -> Channel {
        Channel::Webhook
    }

    async fn send(
        &self,
        _recipient: &str,
        _subject: Option<&str>,
        _message: &str,
    ) -> Result<(), ChannelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.times.lock().unwrap().push(Instant::now());
        if n < self.failures {
            Err(ChannelError::Other("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

struct Harness {
    dispatcher: NotificationDispatcher,
    attempts: Arc<MemoryAttemptStore>,
    metrics: Arc<MemorySink>,
}

fn harness(provider: Arc<FlakyProvider>, retry: RetryPolicy) -> Harness {
    let mut registry = ProviderRegistry::new();
    registry
        .register_provider(provider, retry, Duration::from_secs(30))
        .unwrap();

    let attempts = Arc::new(MemoryAttemptStore::new());
    let metrics = Arc::new(MemorySink::new());
    let dispatcher = NotificationDispatcher::new(
        Arc::new(registry),
        attempts.clone(),
        metrics.clone(),
        Arc::new(TokioClock::new(Utc::now())),
    );

    Harness {
        dispatcher,
        attempts,
        metrics,
    }
}

fn request(event_id: Uuid, target: &str) -> DispatchRequest {
    DispatchRequest {
        key: DeliveryKey {
            event_id,
            rule_id: "rule-0".to_string(),
            target_id: target.to_string(),
            pass: 0,
        },
        channel: Channel::Webhook,
        recipient: target.to_string(),
        subject: Some("[CRITICAL] api down".to_string()),
        message: "api-gateway is not responding".to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_always_failing_provider_is_exhausted_after_max_retries() {
    let provider = FlakyProvider::failing(u32::MAX);
    let h = harness(
        provider.clone(),
        RetryPolicy::new(3, Duration::from_secs(10)),
    );
    let event_id = Uuid::new_v4();

    let outcome = h
        .dispatcher
        .dispatch(request(event_id, "u-1"), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Retrying);
    assert!(h.dispatcher.has_pending(event_id).await.unwrap());

    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(provider.calls(), 3);
    assert!(!h.dispatcher.has_pending(event_id).await.unwrap());
    let times = provider.times();
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(10));
    }

    let stored = h.attempts.attempts_for(event_id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].attempt_count, 3);
    assert_eq!(stored[0].outcome, Some(AttemptOutcome::Exhausted));
    assert!(stored[0].is_terminal());
    assert_eq!(
        stored[0].last_error.as_deref(),
        Some("connection refused")
    );
    assert_eq!(
        h.metrics
            .count(|s| matches!(s, Signal::Exhausted { attempts: 3, .. })),
        1
    );
    assert_eq!(
        h.metrics.count(|s| matches!(s, Signal::RetryScheduled { .. })),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_recovers_on_second_attempt() {
    let provider = FlakyProvider::failing(1);
    let h = harness(provider.clone(), RetryPolicy::new(3, Duration::from_secs(5)));
    let event_id = Uuid::new_v4();

    h.dispatcher
        .dispatch(request(event_id, "u-1"), CancellationToken::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(provider.calls(), 2);
    let stored = h.attempts.attempts_for(event_id).await;
    assert_eq!(stored[0].outcome, Some(AttemptOutcome::Delivered));
    assert_eq!(
        h.metrics
            .count(|s| matches!(s, Signal::Delivered { attempt: 2, .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_delivered_key_is_not_sent_again() {
    let provider = FlakyProvider::failing(0);
    let h = harness(provider.clone(), RetryPolicy::default());
    let event_id = Uuid::new_v4();

    let first = h
        .dispatcher
        .dispatch(request(event_id, "u-1"), CancellationToken::new())
        .await
        .unwrap();
    let second = h
        .dispatcher
        .dispatch(request(event_id, "u-1"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first, DispatchOutcome::Delivered);
    assert_eq!(second, DispatchOutcome::Delivered);
    assert_eq!(provider.calls(), 1);
    assert_eq!(
        h.metrics
            .count(|s| matches!(s, Signal::DuplicateSuppressed { .. })),
        1
    );

    // A different pass is a different notification.
    let mut next_pass = request(event_id, "u-1");
    next_pass.key.pass = 1;
    h.dispatcher
        .dispatch(next_pass, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(provider.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_resume_from_stored_attempt_count() {
    let provider = FlakyProvider::failing(u32::MAX);
    let h = harness(provider.clone(), RetryPolicy::new(3, Duration::from_secs(10)));
    let event_id = Uuid::new_v4();

    // Two attempts were already made before a restart.
    let req = request(event_id, "u-1");
    let mut stored = NotificationAttempt::new(
        req.key.clone().with_provider("flaky"),
        Channel::Webhook,
        &req.recipient,
        req.subject.as_deref(),
        &req.message,
    );
    stored.attempt_count = 2;
    stored.last_error = Some("connection refused".to_string());
    h.attempts.save_attempt(&stored).await.unwrap();

    // A duplicate dispatch does not start a parallel retry loop.
    let outcome = h
        .dispatcher
        .dispatch(req, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Retrying);
    assert_eq!(provider.calls(), 0);

    let resumed = h
        .dispatcher
        .resume_pending(event_id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resumed, 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(provider.calls(), 1);
    let stored = h.attempts.attempts_for(event_id).await;
    assert_eq!(stored[0].attempt_count, 3);
    assert_eq!(stored[0].outcome, Some(AttemptOutcome::Exhausted));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_retry_loop() {
    let provider = FlakyProvider::failing(u32::MAX);
    let h = harness(provider.clone(), RetryPolicy::new(5, Duration::from_secs(10)));
    let cancel = CancellationToken::new();

    h.dispatcher
        .dispatch(request(Uuid::new_v4(), "u-1"), cancel.clone())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(provider.calls(), 2);

    cancel.cancel();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(provider.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run_sends_nothing() {
    let provider = FlakyProvider::failing(0);
    let h = harness(provider.clone(), RetryPolicy::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = h
        .dispatcher
        .dispatch(request(Uuid::new_v4(), "u-1"), cancel)
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Cancelled);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_unregistered_channel_is_an_error() {
    let h = harness(FlakyProvider::failing(0), RetryPolicy::default());
    let mut req = request(Uuid::new_v4(), "u-1");
    req.channel = Channel::Email;

    let err = h
        .dispatcher
        .dispatch(req, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NoProvider(Channel::Email)));
}
