//! Fan-out of one escalation level to its recipients.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use notify::{
    Clock, DeliveryKey, DispatchOutcome, DispatchRequest, MetricsSink, NotificationDispatcher,
    Signal,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{Alert, EscalationRule, Step};
use crate::resolver::TargetResolver;

/// Subject and body shared by every level of a run.
#[derive(Debug, Clone)]
pub struct NotificationContent {
    pub subject: String,
    pub body: String,
}

impl NotificationContent {
    pub fn for_alert(alert: &Alert) -> Self {
        Self {
            subject: format!("[{}] {}", alert.severity.as_str(), alert.title),
            body: alert
                .description
                .clone()
                .unwrap_or_else(|| alert.title.clone()),
        }
    }

    fn message(&self, step: Step) -> String {
        format!(
            "{}\n\nEscalation level {} (pass {})",
            self.body,
            step.level + 1,
            step.pass + 1
        )
    }
}

/// Services a level notification needs.
#[derive(Clone)]
pub(crate) struct FanoutContext {
    pub resolver: Arc<TargetResolver>,
    pub dispatcher: NotificationDispatcher,
    pub metrics: Arc<dyn MetricsSink>,
    pub clock: Arc<dyn Clock>,
}

/// One level to notify.
pub(crate) struct LevelJob {
    pub event_id: Uuid,
    pub alert_id: String,
    pub rule: EscalationRule,
    pub step: Step,
    pub content: Arc<NotificationContent>,
}

/// Resolve the rule's targets and dispatch to every reachable recipient.
///
/// Sends run concurrently; each recipient retries independently in the
/// dispatcher. Returns once every first attempt has finished.
pub(crate) async fn notify_level(ctx: &FanoutContext, job: LevelJob, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
        debug!(alert_id = %job.alert_id, level = job.step.level, "Run cancelled, level not notified");
        return;
    }

    let resolution = ctx.resolver.resolve_rule(&job.rule, ctx.clock.now()).await;

    for failure in &resolution.failures {
        warn!(
            alert_id = %job.alert_id,
            rule_id = %job.rule.id,
            target_type = %failure.target.target_type,
            target_id = %failure.target.target_id,
            error = %failure.error,
            "Escalation target could not be resolved"
        );
        ctx.metrics.record(Signal::TargetUnresolved {
            event_id: job.event_id,
            target_id: failure.target.target_id.clone(),
            reason: failure.error.to_string(),
        });
    }

    if resolution.recipients.is_empty() {
        warn!(
            alert_id = %job.alert_id,
            rule_id = %job.rule.id,
            "Escalation rule has no notifiable recipients"
        );
        ctx.metrics.record(Signal::RuleWithoutRecipients {
            event_id: job.event_id,
            rule_id: job.rule.id.clone(),
        });
    }

    let message = job.message();
    let mut sends = Vec::new();
    for recipient in &resolution.recipients {
        // One notification per recipient and channel.
        let mut channels = HashSet::new();
        for contact in &recipient.contact_methods {
            if !channels.insert(contact.channel) {
                continue;
            }
            if !ctx.dispatcher.registry().has_channel(contact.channel) {
                debug!(
                    user_id = %recipient.user_id,
                    channel = %contact.channel,
                    "No provider for contact channel"
                );
                ctx.metrics.record(Signal::ChannelUnavailable {
                    event_id: job.event_id,
                    recipient: recipient.user_id.clone(),
                    channel: contact.channel.to_string(),
                });
                continue;
            }

            let request = DispatchRequest {
                key: DeliveryKey {
                    event_id: job.event_id,
                    rule_id: job.rule.id.clone(),
                    target_id: recipient.user_id.clone(),
                    pass: job.step.pass,
                },
                channel: contact.channel,
                recipient: contact.address.clone(),
                subject: Some(job.content.subject.clone()),
                message: message.clone(),
            };
            let user_id = recipient.user_id.clone();
            let dispatcher = ctx.dispatcher.clone();
            let cancel = cancel.clone();
            sends.push(async move { (user_id, dispatcher.dispatch(request, cancel).await) });
        }
    }

    let mut delivered = 0;
    let mut failed = 0;
    for (user_id, result) in join_all(sends).await {
        match result {
            Ok(DispatchOutcome::Delivered) => delivered += 1,
            Ok(_) => failed += 1,
            Err(e) => {
                failed += 1;
                warn!(alert_id = %job.alert_id, user_id = %user_id, error = %e, "Dispatch failed");
            }
        }
    }

    info!(
        alert_id = %job.alert_id,
        level = job.step.level,
        pass = job.step.pass,
        recipients = resolution.recipients.len(),
        delivered,
        failed,
        "Escalation level notified"
    );
    ctx.metrics.record(Signal::LevelNotified {
        event_id: job.event_id,
        alert_id: job.alert_id,
        level: job.step.level,
        pass: job.step.pass,
    });
}

impl LevelJob {
    fn message(&self) -> String {
        self.content.message(self.step)
    }
}
