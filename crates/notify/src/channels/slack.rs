//! Slack-style chat webhook provider.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use super::{truncate_body, Channel, NotificationProvider};
use crate::config::ChatWebhookConfig;
use crate::error::ChannelError;

/// Recipients starting with this marker override the destination channel.
const CHANNEL_MARKER: char = '#';

/// Attachment color used for escalation messages.
const ALERT_COLOR: &str = "#e74c3c";

/// Chat webhook notification provider.
pub struct ChatWebhookProvider {
    config: ChatWebhookConfig,
    client: reqwest::Client,
}

impl ChatWebhookProvider {
    /// Create a provider from a validated configuration.
    #[must_use]
    pub fn new(config: ChatWebhookConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Format a message as a chat webhook payload.
    fn format_payload(&self, recipient: &str, subject: Option<&str>, message: &str) -> ChatPayload {
        let channel = if recipient.starts_with(CHANNEL_MARKER) {
            Some(recipient.to_string())
        } else {
            self.config.channel.clone()
        };

        let title = subject.unwrap_or("Alert notification").to_string();
        let now = Utc::now();

        let attachment = ChatAttachment {
            fallback: format!("{title}: {message}"),
            color: ALERT_COLOR.to_string(),
            title,
            text: message.to_string(),
            footer: Some(now.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
            ts: Some(now.timestamp()),
        };

        ChatPayload {
            channel,
            username: self.config.username.clone(),
            icon_emoji: self.config.icon_emoji.clone(),
            attachments: vec![attachment],
        }
    }
}

#[async_trait]
impl NotificationProvider for ChatWebhookProvider {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn channel(&self) -> Channel {
        Channel::ChatWebhook
    }

    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        message: &str,
    ) -> Result<(), ChannelError> {
        let payload = self.format_payload(recipient, subject, message);

        debug!(channel = "slack", destination = ?payload.channel, "Sending notification");

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            debug!(channel = "slack", "Notification sent successfully");
            Ok(())
        } else {
            let status = response.status();
            let body = truncate_body(response.text().await.unwrap_or_default());

            warn!(
                channel = "slack",
                status = %status,
                body = %body,
                "Slack webhook request failed"
            );

            Err(ChannelError::Status {
                provider: "slack",
                status: status.as_u16(),
                body,
            })
        }
    }
}

// =============================================================================
// Slack API types
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_emoji: Option<String>,
    attachments: Vec<ChatAttachment>,
}

#[derive(Debug, Serialize)]
struct ChatAttachment {
    fallback: String,
    color: String,
    title: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
}
