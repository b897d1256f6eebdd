//! Escalation scheduler.
//!
//! A single task owns every active run and its timer. Triggers,
//! acknowledgements and timer expiries are all commands processed one at a
//! time by that task, so transitions for one alert never interleave.
//! Notifications for a level run in a spawned task chained to the previous
//! level's task, which keeps levels in order without holding up the loop.
//!
//! Every transition is written to the [`EventStore`]. A level is recorded
//! as in flight before its task starts and cleared once the task has made
//! its first dispatch attempts, so a crash in between re-issues the level on
//! the next start. Completed runs are kept until their retries settle, which
//! lets a late acknowledgement still cancel them. On start the loop reloads
//! those runs, re-arms timers from `next_escalation_at` and resumes pending
//! notification retries.

mod fanout;
mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use notify::{Clock, MetricsSink, NotificationDispatcher, Signal};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio::time::MissedTickBehavior;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use fanout::NotificationContent;
pub use state::{first_step, plan_next, NextStep};

use crate::error::EscalationError;
use crate::model::{
    AlertEscalationEvent, AlertStatus, EscalationPolicy, EventType, PolicyDefect, Step,
};
use crate::resolver::TargetResolver;
use crate::store::{AlertStore, EventStore, PolicyStore};
use fanout::{FanoutContext, LevelJob};

/// Default lower bound on the wait before a repeat pass.
pub const DEFAULT_MIN_REPEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Default capacity of the command queue.
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// How often finished runs are checked for settled notifications.
const SETTLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Scheduler tuning.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Minimum wait before a new pass starts
    pub min_repeat_interval: Duration,
    pub command_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_repeat_interval: DEFAULT_MIN_REPEAT_INTERVAL,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

/// Services the scheduler reads and writes through.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub policies: Arc<dyn PolicyStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub events: Arc<dyn EventStore>,
    pub resolver: Arc<TargetResolver>,
    pub dispatcher: NotificationDispatcher,
    pub metrics: Arc<dyn MetricsSink>,
    pub clock: Arc<dyn Clock>,
}

type Reply<T> = oneshot::Sender<Result<T, EscalationError>>;

enum Command {
    Trigger {
        alert_id: String,
        policy_id: String,
        reply: Reply<AlertEscalationEvent>,
    },
    Halt {
        alert_id: String,
        halt: Halt,
        reply: Reply<Option<AlertEscalationEvent>>,
    },
    FireTimer {
        alert_id: String,
        step: Step,
        reply: Reply<bool>,
    },
    Event {
        alert_id: String,
        reply: Reply<Option<AlertEscalationEvent>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Ways a run can be ended from outside.
#[derive(Debug, Clone, Copy)]
enum Halt {
    Acknowledge,
    Close,
    Stop,
}

impl Halt {
    const fn alert_status(self) -> Option<AlertStatus> {
        match self {
            Self::Acknowledge => Some(AlertStatus::Acknowledged),
            Self::Close => Some(AlertStatus::Closed),
            Self::Stop => None,
        }
    }

    const fn event_type(self) -> EventType {
        match self {
            Self::Acknowledge => EventType::Acknowledged,
            Self::Close | Self::Stop => EventType::Stopped,
        }
    }
}

/// Handle to a running escalation scheduler.
#[derive(Clone)]
pub struct EscalationScheduler {
    commands: mpsc::Sender<Command>,
}

impl EscalationScheduler {
    /// Start the scheduler task.
    ///
    /// Active runs found in the event store are recovered before the first
    /// command is processed.
    pub fn spawn(deps: SchedulerDeps, config: SchedulerConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let worker = SchedulerLoop::new(deps, config, rx);
        (Self { commands: tx }, tokio::spawn(worker.run()))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, EscalationError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| EscalationError::SchedulerClosed)?;
        response.await.map_err(|_| EscalationError::SchedulerClosed)?
    }

    /// Start escalating an alert through a policy.
    pub async fn trigger(
        &self,
        alert_id: &str,
        policy_id: &str,
    ) -> Result<AlertEscalationEvent, EscalationError> {
        let (alert_id, policy_id) = (alert_id.to_string(), policy_id.to_string());
        self.request(|reply| Command::Trigger {
            alert_id,
            policy_id,
            reply,
        })
        .await
    }

    /// Acknowledge the alert and end its run. `None` when nothing was escalating.
    pub async fn acknowledge(
        &self,
        alert_id: &str,
    ) -> Result<Option<AlertEscalationEvent>, EscalationError> {
        self.halt(alert_id, Halt::Acknowledge).await
    }

    /// Close the alert and stop its run.
    pub async fn close(
        &self,
        alert_id: &str,
    ) -> Result<Option<AlertEscalationEvent>, EscalationError> {
        self.halt(alert_id, Halt::Close).await
    }

    /// Stop the run without touching the alert.
    pub async fn stop(
        &self,
        alert_id: &str,
    ) -> Result<Option<AlertEscalationEvent>, EscalationError> {
        self.halt(alert_id, Halt::Stop).await
    }

    async fn halt(
        &self,
        alert_id: &str,
        halt: Halt,
    ) -> Result<Option<AlertEscalationEvent>, EscalationError> {
        let alert_id = alert_id.to_string();
        self.request(|reply| Command::Halt {
            alert_id,
            halt,
            reply,
        })
        .await
    }

    /// Deliver a timer expiry by hand.
    ///
    /// Returns `false` when `step` is not the run's armed step, which makes
    /// duplicate or late deliveries no-ops.
    pub async fn fire_timer(&self, alert_id: &str, step: Step) -> Result<bool, EscalationError> {
        let alert_id = alert_id.to_string();
        self.request(|reply| Command::FireTimer {
            alert_id,
            step,
            reply,
        })
        .await
    }

    /// Current run for an alert, or its most recent finished one.
    pub async fn event(
        &self,
        alert_id: &str,
    ) -> Result<Option<AlertEscalationEvent>, EscalationError> {
        let alert_id = alert_id.to_string();
        self.request(|reply| Command::Event { alert_id, reply })
            .await
    }

    /// Stop the scheduler task. Active runs stay active in the store.
    pub async fn shutdown(&self) -> Result<(), EscalationError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

// =============================================================================
// Scheduler task
// =============================================================================

struct Run {
    event: AlertEscalationEvent,
    policy: Arc<EscalationPolicy>,
    content: Arc<NotificationContent>,
    timer: Option<delay_queue::Key>,
    /// Cancels notification work still in flight for this run
    cancel: CancellationToken,
    /// Notification task of the most recent level
    notify_tail: Option<JoinHandle<()>>,
}

/// Completed run whose notifications may still be retrying.
struct Settling {
    event: AlertEscalationEvent,
    cancel: CancellationToken,
}

struct TimerEntry {
    alert_id: String,
    step: Step,
}

/// Sent by a level task once its first dispatch attempts are recorded.
struct LevelIssued {
    alert_id: String,
    event_id: Uuid,
    step: Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerSource {
    Queue,
    Replay,
}

struct SchedulerLoop {
    deps: SchedulerDeps,
    fanout: FanoutContext,
    config: SchedulerConfig,
    commands: mpsc::Receiver<Command>,
    runs: HashMap<String, Run>,
    settling: HashMap<Uuid, Settling>,
    timers: DelayQueue<TimerEntry>,
    issued_tx: mpsc::UnboundedSender<LevelIssued>,
    issued_rx: mpsc::UnboundedReceiver<LevelIssued>,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

fn order_policy(policy: EscalationPolicy) -> Result<EscalationPolicy, EscalationError> {
    let policy_id = policy.id.clone();
    policy.into_ordered().map_err(|defect| match defect {
        PolicyDefect::NoRules => EscalationError::EmptyPolicy(policy_id),
        PolicyDefect::DuplicatePosition(position) => EscalationError::InvalidPolicy {
            policy_id,
            reason: format!("duplicate rule position {position}"),
        },
    })
}

impl SchedulerLoop {
    fn new(deps: SchedulerDeps, config: SchedulerConfig, commands: mpsc::Receiver<Command>) -> Self {
        let fanout = FanoutContext {
            resolver: Arc::clone(&deps.resolver),
            dispatcher: deps.dispatcher.clone(),
            metrics: Arc::clone(&deps.metrics),
            clock: Arc::clone(&deps.clock),
        };
        let (issued_tx, issued_rx) = mpsc::unbounded_channel();
        Self {
            deps,
            fanout,
            config,
            commands,
            runs: HashMap::new(),
            settling: HashMap::new(),
            timers: DelayQueue::new(),
            issued_tx,
            issued_rx,
        }
    }

    async fn run(mut self) {
        self.recover().await;

        let mut settle_check = tokio::time::interval(SETTLE_CHECK_INTERVAL);
        settle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    let TimerEntry { alert_id, step } = expired.into_inner();
                    self.on_timer(&alert_id, step, TimerSource::Queue).await;
                }
                Some(issued) = self.issued_rx.recv() => {
                    self.level_issued(issued).await;
                }
                _ = settle_check.tick(), if !self.settling.is_empty() => {
                    self.sweep_settled().await;
                }
            }
        }

        debug!("Escalation scheduler stopped");
    }

    /// Process one command. Returns `false` once the loop should exit.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Trigger {
                alert_id,
                policy_id,
                reply,
            } => {
                let result = self.trigger(&alert_id, &policy_id).await;
                let _ = reply.send(result);
            }
            Command::Halt {
                alert_id,
                halt,
                reply,
            } => {
                let result = self.halt(&alert_id, halt).await;
                let _ = reply.send(result);
            }
            Command::FireTimer {
                alert_id,
                step,
                reply,
            } => {
                let fired = self.on_timer(&alert_id, step, TimerSource::Replay).await;
                let _ = reply.send(Ok(fired));
            }
            Command::Event { alert_id, reply } => {
                let result = self.event(&alert_id).await;
                let _ = reply.send(result);
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(Ok(()));
                return false;
            }
        }
        true
    }

    async fn trigger(
        &mut self,
        alert_id: &str,
        policy_id: &str,
    ) -> Result<AlertEscalationEvent, EscalationError> {
        if self.runs.contains_key(alert_id) {
            return Err(EscalationError::AlreadyEscalating(alert_id.to_string()));
        }
        if let Some(existing) = self.deps.events.latest_for_alert(alert_id).await? {
            if existing.is_active() {
                return Err(EscalationError::AlreadyEscalating(alert_id.to_string()));
            }
        }

        let policy = self
            .deps
            .policies
            .get_policy(policy_id)
            .await?
            .ok_or_else(|| EscalationError::PolicyNotFound(policy_id.to_string()))?;
        let policy = order_policy(policy)?;

        let alert = self
            .deps
            .alerts
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| EscalationError::AlertNotFound(alert_id.to_string()))?;
        if alert.status != AlertStatus::Triggered {
            return Err(EscalationError::AlertNotActive {
                alert_id: alert_id.to_string(),
                status: alert.status,
            });
        }

        let now = self.deps.clock.now();
        let first = first_step(&policy);
        let mut event = AlertEscalationEvent::new(alert_id, policy_id, now);
        if let NextStep::Notify { delay, .. } = first {
            event.next_escalation_at = Some(now + to_chrono(delay));
        }
        self.deps.events.save_event(&event).await?;

        info!(
            alert_id = %alert_id,
            policy_id = %policy_id,
            event_id = %event.id,
            rules = policy.rules.len(),
            "Escalation triggered"
        );

        let fallback = event.clone();
        self.runs.insert(
            alert_id.to_string(),
            Run {
                event,
                policy: Arc::new(policy),
                content: Arc::new(NotificationContent::for_alert(&alert)),
                timer: None,
                cancel: CancellationToken::new(),
                notify_tail: None,
            },
        );

        Ok(self.proceed(alert_id, first).await.unwrap_or(fallback))
    }

    async fn halt(
        &mut self,
        alert_id: &str,
        halt: Halt,
    ) -> Result<Option<AlertEscalationEvent>, EscalationError> {
        if let Some(status) = halt.alert_status() {
            if let Err(e) = self.deps.alerts.set_alert_status(alert_id, status).await {
                warn!(alert_id = %alert_id, error = %e, "Failed to update alert status");
            }
        }

        if !self.runs.contains_key(alert_id) {
            debug!(alert_id = %alert_id, halt = ?halt, "No active escalation to halt");
            self.cancel_settling(alert_id).await;
            return Ok(None);
        }
        Ok(self.finish(alert_id, halt.event_type(), true).await)
    }

    async fn event(&self, alert_id: &str) -> Result<Option<AlertEscalationEvent>, EscalationError> {
        if let Some(run) = self.runs.get(alert_id) {
            return Ok(Some(run.event.clone()));
        }
        Ok(self.deps.events.latest_for_alert(alert_id).await?)
    }

    /// Handle an expired (or replayed) timer. Returns whether the run moved.
    async fn on_timer(&mut self, alert_id: &str, step: Step, source: TimerSource) -> bool {
        let Some(run) = self.runs.get_mut(alert_id) else {
            debug!(alert_id = %alert_id, "Timer for finished run ignored");
            return false;
        };
        if run.event.next_step != Some(step) {
            debug!(
                alert_id = %alert_id,
                level = step.level,
                pass = step.pass,
                "Stale escalation timer ignored"
            );
            return false;
        }
        match source {
            TimerSource::Queue => run.timer = None,
            TimerSource::Replay => {
                if let Some(key) = run.timer.take() {
                    self.timers.try_remove(&key);
                }
            }
        }

        // The alert may have been acknowledged or closed elsewhere.
        match self.deps.alerts.get_alert(alert_id).await {
            Ok(Some(alert)) => match alert.status {
                AlertStatus::Triggered => {}
                AlertStatus::Acknowledged => {
                    self.finish(alert_id, EventType::Acknowledged, true).await;
                    return true;
                }
                AlertStatus::Closed => {
                    self.finish(alert_id, EventType::Stopped, true).await;
                    return true;
                }
            },
            Ok(None) => {
                warn!(alert_id = %alert_id, "Alert no longer exists, stopping escalation");
                self.finish(alert_id, EventType::Stopped, true).await;
                return true;
            }
            Err(e) => {
                warn!(alert_id = %alert_id, error = %e, "Could not read alert status, escalating");
            }
        }

        self.proceed(
            alert_id,
            NextStep::Notify {
                step,
                delay: Duration::ZERO,
            },
        )
        .await;
        true
    }

    /// Drive a run forward from `next` until a timer is armed or it completes.
    ///
    /// Zero-delay steps are notified right away. Returns the run's event
    /// after the last transition.
    async fn proceed(&mut self, alert_id: &str, mut next: NextStep) -> Option<AlertEscalationEvent> {
        loop {
            let run = self.runs.get_mut(alert_id)?;
            let now = self.deps.clock.now();

            let current = next;
            match current {
                NextStep::Notify { step, delay } if delay.is_zero() => {
                    run.event.current_level = step.level;
                    run.event.repeat_count = step.pass;
                    run.event.in_flight.push(step);
                    run.event.next_step = None;
                    run.event.next_escalation_at = None;
                    run.event.updated_at = now;
                    next = plan_next(&run.policy, step, self.config.min_repeat_interval);

                    // Recorded before the level task exists.
                    let snapshot = run.event.clone();
                    self.persist(&snapshot).await;

                    let run = self.runs.get_mut(alert_id)?;
                    Self::issue_level(&self.fanout, &self.issued_tx, run, step);
                }
                NextStep::Notify { step, delay } => {
                    run.event.next_step = Some(step);
                    run.event.next_escalation_at = Some(now + to_chrono(delay));
                    run.event.updated_at = now;
                    run.timer = Some(self.timers.insert(
                        TimerEntry {
                            alert_id: alert_id.to_string(),
                            step,
                        },
                        delay,
                    ));
                    debug!(
                        alert_id = %alert_id,
                        level = step.level,
                        pass = step.pass,
                        delay_secs = delay.as_secs(),
                        "Escalation timer armed"
                    );

                    let snapshot = run.event.clone();
                    self.persist(&snapshot).await;
                    return Some(snapshot);
                }
                NextStep::Complete => {
                    return self.finish(alert_id, EventType::Completed, false).await;
                }
            }
        }
    }

    /// Spawn the notification task for one level behind the previous one.
    fn issue_level(
        fanout: &FanoutContext,
        issued_tx: &mpsc::UnboundedSender<LevelIssued>,
        run: &mut Run,
        step: Step,
    ) {
        let issued = LevelIssued {
            alert_id: run.event.alert_id.clone(),
            event_id: run.event.id,
            step,
        };
        let Some(rule) = run.policy.rules.get(step.level).cloned() else {
            warn!(
                alert_id = %run.event.alert_id,
                level = step.level,
                "Escalation level out of range, skipping"
            );
            let _ = issued_tx.send(issued);
            return;
        };

        let job = LevelJob {
            event_id: run.event.id,
            alert_id: run.event.alert_id.clone(),
            rule,
            step,
            content: Arc::clone(&run.content),
        };
        let ctx = fanout.clone();
        let cancel = run.cancel.clone();
        let previous = run.notify_tail.take();
        let issued_tx = issued_tx.clone();

        run.notify_tail = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            fanout::notify_level(&ctx, job, &cancel).await;
            // The loop is gone after shutdown.
            let _ = issued_tx.send(issued);
        }));
    }

    /// Clear a level from its run's in-flight list.
    async fn level_issued(&mut self, issued: LevelIssued) {
        let event = match self.runs.get_mut(&issued.alert_id) {
            Some(run) if run.event.id == issued.event_id => &mut run.event,
            _ => match self.settling.get_mut(&issued.event_id) {
                Some(settling) => &mut settling.event,
                None => return,
            },
        };

        let before = event.in_flight.len();
        event.in_flight.retain(|step| *step != issued.step);
        if event.in_flight.len() == before {
            return;
        }
        let snapshot = event.clone();
        self.persist(&snapshot).await;

        if self.settling.contains_key(&issued.event_id) {
            self.sweep_settled().await;
        }
    }

    /// Move a run to a terminal state and forget it.
    async fn finish(
        &mut self,
        alert_id: &str,
        event_type: EventType,
        cancel: bool,
    ) -> Option<AlertEscalationEvent> {
        let mut run = self.runs.remove(alert_id)?;
        if cancel {
            run.cancel.cancel();
            run.event.in_flight.clear();
            self.cancel_settling(alert_id).await;
        }
        if let Some(key) = run.timer.take() {
            self.timers.try_remove(&key);
        }

        run.event.event_type = event_type;
        if event_type == EventType::Completed {
            // The final pass is now complete as well.
            run.event.repeat_count += 1;
        }
        run.event.delivery_pending = !cancel;
        run.event.next_step = None;
        run.event.next_escalation_at = None;
        run.event.updated_at = self.deps.clock.now();

        info!(
            alert_id = %alert_id,
            event_id = %run.event.id,
            outcome = event_type.as_str(),
            level = run.event.current_level,
            repeat_count = run.event.repeat_count,
            "Escalation run finished"
        );
        self.deps.metrics.record(Signal::RunFinished {
            event_id: run.event.id,
            alert_id: alert_id.to_string(),
            outcome: event_type.as_str(),
        });

        self.persist(&run.event).await;
        let event = run.event.clone();
        if !cancel {
            self.settling.insert(
                run.event.id,
                Settling {
                    event: run.event,
                    cancel: run.cancel,
                },
            );
            self.sweep_settled().await;
        }
        Some(event)
    }

    /// Cancel outstanding notifications of an alert's completed runs.
    async fn cancel_settling(&mut self, alert_id: &str) {
        let ids: Vec<Uuid> = self
            .settling
            .values()
            .filter(|s| s.event.alert_id == alert_id)
            .map(|s| s.event.id)
            .collect();

        for id in ids {
            if let Some(settling) = self.settling.remove(&id) {
                settling.cancel.cancel();
                info!(
                    alert_id = %alert_id,
                    event_id = %id,
                    "Cancelled outstanding notifications of finished run"
                );
                self.settle(settling.event).await;
            }
        }
    }

    /// Forget completed runs whose notifications have all settled.
    async fn sweep_settled(&mut self) {
        let mut settled = Vec::new();
        for (id, settling) in &self.settling {
            if !settling.event.in_flight.is_empty() {
                continue;
            }
            match self.deps.dispatcher.has_pending(*id).await {
                Ok(false) => settled.push(*id),
                Ok(true) => {}
                Err(e) => warn!(event_id = %id, error = %e, "Could not check pending notifications"),
            }
        }

        for id in settled {
            if let Some(settling) = self.settling.remove(&id) {
                debug!(alert_id = %settling.event.alert_id, event_id = %id, "Finished run settled");
                self.settle(settling.event).await;
            }
        }
    }

    async fn settle(&self, mut event: AlertEscalationEvent) {
        event.in_flight.clear();
        event.delivery_pending = false;
        self.persist(&event).await;
    }

    async fn persist(&self, event: &AlertEscalationEvent) {
        if let Err(e) = self.deps.events.save_event(event).await {
            error!(
                alert_id = %event.alert_id,
                event_id = %event.id,
                error = %e,
                "Failed to persist escalation event"
            );
        }
    }

    fn shutdown(&mut self) {
        for run in self.runs.values() {
            run.cancel.cancel();
        }
        for settling in self.settling.values() {
            settling.cancel.cancel();
        }
        info!(
            active_runs = self.runs.len(),
            settling_runs = self.settling.len(),
            "Escalation scheduler shutting down"
        );
        self.runs.clear();
        self.settling.clear();
        self.timers.clear();
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    async fn recover(&mut self) {
        let active = match self.deps.events.recoverable_events().await {
            Ok(active) => active,
            Err(e) => {
                error!(error = %e, "Failed to load active escalation runs");
                return;
            }
        };
        if active.is_empty() {
            return;
        }

        info!(count = active.len(), "Recovering escalation runs");
        for event in active {
            let alert_id = event.alert_id.clone();
            if let Err(e) = self.restore(event).await {
                error!(alert_id = %alert_id, error = %e, "Failed to recover escalation run");
            }
        }
    }

    async fn restore(&mut self, mut event: AlertEscalationEvent) -> Result<(), EscalationError> {
        let alert_id = event.alert_id.clone();
        if event.is_active() && self.runs.contains_key(&alert_id) {
            warn!(alert_id = %alert_id, event_id = %event.id, "Duplicate active run, stopping it");
            self.close_stored(&mut event, EventType::Stopped).await;
            return Ok(());
        }

        let policy = self
            .deps
            .policies
            .get_policy(&event.policy_id)
            .await?
            .ok_or_else(|| EscalationError::PolicyNotFound(event.policy_id.clone()))
            .and_then(order_policy);
        let alert = self.deps.alerts.get_alert(&alert_id).await?;

        let (policy, alert) = match (policy, alert) {
            (Ok(policy), Some(alert)) if alert.status == AlertStatus::Triggered => (policy, alert),
            (policy, alert) => {
                if let Err(e) = policy {
                    warn!(alert_id = %alert_id, error = %e, "Cannot resume escalation run");
                }
                if !event.is_active() {
                    self.settle(event).await;
                    return Ok(());
                }
                let event_type = match alert.map(|a| a.status) {
                    Some(AlertStatus::Acknowledged) => EventType::Acknowledged,
                    _ => EventType::Stopped,
                };
                self.close_stored(&mut event, event_type).await;
                return Ok(());
            }
        };

        let now = self.deps.clock.now();
        let next = match event.next_step {
            Some(step) => {
                // A run saved before its first timer was armed counts from
                // its last update.
                let at = event.next_escalation_at.unwrap_or_else(|| {
                    let delay = policy
                        .rules
                        .get(step.level)
                        .map(|r| r.delay())
                        .unwrap_or_default();
                    event.updated_at + to_chrono(delay)
                });
                NextStep::Notify {
                    step,
                    delay: (at - now).to_std().unwrap_or(Duration::ZERO),
                }
            }
            None => plan_next(
                &policy,
                Step {
                    level: event.current_level,
                    pass: event.repeat_count,
                },
                self.config.min_repeat_interval,
            ),
        };

        let cancel = CancellationToken::new();
        if let Err(e) = self
            .deps
            .dispatcher
            .resume_pending(event.id, cancel.clone())
            .await
        {
            warn!(alert_id = %alert_id, error = %e, "Failed to resume notification retries");
        }

        info!(
            alert_id = %alert_id,
            event_id = %event.id,
            level = event.current_level,
            repeat_count = event.repeat_count,
            in_flight = event.in_flight.len(),
            active = event.is_active(),
            "Escalation run recovered"
        );

        let mut run = Run {
            event,
            policy: Arc::new(policy),
            content: Arc::new(NotificationContent::for_alert(&alert)),
            timer: None,
            cancel,
            notify_tail: None,
        };
        // Levels interrupted before their dispatches were recorded. Keys
        // that already reached an outcome are not sent again.
        for step in run.event.in_flight.clone() {
            Self::issue_level(&self.fanout, &self.issued_tx, &mut run, step);
        }

        if !run.event.is_active() {
            self.settling.insert(
                run.event.id,
                Settling {
                    event: run.event,
                    cancel: run.cancel,
                },
            );
            return Ok(());
        }

        self.runs.insert(alert_id.clone(), run);
        self.proceed(&alert_id, next).await;
        Ok(())
    }

    /// Terminate a stored run that cannot be resumed.
    async fn close_stored(&self, event: &mut AlertEscalationEvent, event_type: EventType) {
        event.event_type = event_type;
        event.in_flight.clear();
        event.delivery_pending = false;
        event.next_step = None;
        event.next_escalation_at = None;
        event.updated_at = self.deps.clock.now();
        self.deps.metrics.record(Signal::RunFinished {
            event_id: event.id,
            alert_id: event.alert_id.clone(),
            outcome: event_type.as_str(),
        });
        self.persist(event).await;
    }
}
