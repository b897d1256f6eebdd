//! Generic JSON webhook provider.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{truncate_body, Channel, NotificationProvider};
use crate::config::WebhookConfig;
use crate::error::{ChannelError, ConfigError};

/// Wire payload posted to generic webhooks.
///
/// The field names and the RFC 3339 timestamp are a stable contract with
/// receivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
    pub timestamp: String,
}

impl WebhookPayload {
    #[must_use]
    pub fn new(
        recipient: &str,
        subject: Option<&str>,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            recipient: recipient.to_string(),
            subject: subject.map(str::to_string),
            message: message.to_string(),
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Generic webhook provider.
pub struct WebhookProvider {
    url: String,
    method: Method,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl WebhookProvider {
    /// Build a provider from a validated configuration.
    pub fn new(config: WebhookConfig) -> Result<Self, ConfigError> {
        let method = Method::from_bytes(config.method().as_bytes())
            .map_err(|e| ConfigError::invalid("method", e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::invalid("headers", e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConfigError::invalid("headers", e.to_string()))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.effective_timeout())
            .build()
            .map_err(|e| ConfigError::invalid("url", e.to_string()))?;

        Ok(Self {
            url: config.url,
            method,
            headers,
            client,
        })
    }
}

#[async_trait]
impl NotificationProvider for WebhookProvider {
    fn name(&self) -> &'static str {
        "webhook"
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
        let payload = WebhookPayload::new(recipient, subject, message, Utc::now());

        debug!(channel = "webhook", url = %self.url, method = %self.method, "Sending notification");

        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(channel = "webhook", "Notification sent successfully");
            return Ok(());
        }

        let body = truncate_body(response.text().await.unwrap_or_default());
        warn!(
            channel = "webhook",
            status = %status,
            body = %body,
            "Webhook request failed"
        );

        Err(ChannelError::Status {
            provider: "webhook",
            status: status.as_u16(),
            body,
        })
    }
}
