//! Notification provider implementations.

pub mod email;
pub mod slack;
pub mod webhook;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Delivery channels a provider can serve.
///
/// This is the tag stored on contact methods and provider settings; the
/// dispatcher selects the registered provider by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Email (SMTP or transactional API)
    Email,
    /// Slack-style incoming chat webhook
    ChatWebhook,
    /// Generic JSON webhook
    Webhook,
}

impl Channel {
    /// Stable lowercase name of the channel.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::ChatWebhook => "chat_webhook",
            Self::Webhook => "webhook",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability shared by every notification provider.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Name of this provider, used in attempt keys and diagnostics.
    fn name(&self) -> &'static str;

    /// Channel this provider delivers on.
    fn channel(&self) -> Channel;

    /// Deliver a single message to `recipient`.
    async fn send(
        &self,
        recipient: &str,
        subject: Option<&str>,
        message: &str,
    ) -> Result<(), ChannelError>;
}

/// Truncate a response body so it fits in diagnostics.
pub(crate) fn truncate_body(mut body: String) -> String {
    const MAX_BODY: usize = 1024;
    if body.len() > MAX_BODY {
        let mut cut = MAX_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...(truncated)");
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_serde_names() {
        let channel: Channel = serde_json::from_str("\"chat_webhook\"").unwrap();
        assert_eq!(channel, Channel::ChatWebhook);
        assert_eq!(serde_json::to_string(&Channel::Email).unwrap(), "\"email\"");
        assert_eq!(Channel::Webhook.to_string(), "webhook");
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short".to_string()), "short");
        let long = "é".repeat(800);
        let cut = truncate_body(long);
        assert!(cut.ends_with("...(truncated)"));
        assert!(cut.len() <= 1024 + "...(truncated)".len());
    }
}
