//! Provider configuration schemas and validation.
//!
//! Provider settings arrive as JSON documents tagged with a [`Channel`].
//! Each channel has a closed configuration schema that is validated before
//! the provider is built. Validation failures are always fatal for the
//! registration; they are never deferred to send time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channels::email::EmailProvider;
use crate::channels::slack::ChatWebhookProvider;
use crate::channels::webhook::WebhookProvider;
use crate::channels::{Channel, NotificationProvider};
use crate::error::ConfigError;

/// Default number of delivery attempts per notification.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default fixed delay between delivery attempts.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

/// Default per-call send timeout.
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;

/// Upper bound for the generic webhook `timeout` field.
pub const MAX_WEBHOOK_TIMEOUT_SECS: u64 = 300;

/// Default base URL for the transactional email API.
pub const DEFAULT_EMAIL_API_BASE_URL: &str = "https://api.resend.com";

/// HTTP methods accepted by the generic webhook.
const WEBHOOK_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// One provider entry as it appears in the engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Channel the provider serves
    pub channel: Channel,
    /// Raw channel-specific configuration
    pub config: Value,
    /// Total delivery attempts before a notification is exhausted
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between attempts
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    /// Disabled entries are validated but not registered
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_seconds() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

fn default_enabled() -> bool {
    true
}

impl ProviderSettings {
    /// Create settings for a channel with default retry behaviour.
    #[must_use]
    pub fn new(channel: Channel, config: Value) -> Self {
        Self {
            channel,
            config,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_seconds: DEFAULT_RETRY_DELAY_SECS,
            enabled: true,
        }
    }

    /// Retry policy described by these settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.retry_delay_seconds),
        )
    }
}

/// Fixed-delay retry policy for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed (a value of 0 still allows one attempt)
    pub max_retries: u32,
    /// Delay between consecutive attempts
    pub retry_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Number of attempts made before giving up.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        )
    }
}

/// Validated configuration for one of the built-in provider variants.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    Email(EmailConfig),
    ChatWebhook(ChatWebhookConfig),
    Webhook(WebhookConfig),
}

impl ProviderConfig {
    /// Parse and validate a raw configuration document for `channel`.
    pub fn validate_config(channel: Channel, raw: &Value) -> Result<Self, ConfigError> {
        let malformed = |source| ConfigError::Malformed { channel, source };
        let config = match channel {
            Channel::Email => {
                let config: EmailConfig =
                    serde_json::from_value(raw.clone()).map_err(malformed)?;
                config.validate()?;
                Self::Email(config)
            }
            Channel::ChatWebhook => {
                let config: ChatWebhookConfig =
                    serde_json::from_value(raw.clone()).map_err(malformed)?;
                config.validate()?;
                Self::ChatWebhook(config)
            }
            Channel::Webhook => {
                let config: WebhookConfig =
                    serde_json::from_value(raw.clone()).map_err(malformed)?;
                config.validate()?;
                Self::Webhook(config)
            }
        };
        Ok(config)
    }

    /// Channel this configuration belongs to.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::Email(_) => Channel::Email,
            Self::ChatWebhook(_) => Channel::ChatWebhook,
            Self::Webhook(_) => Channel::Webhook,
        }
    }

    /// Per-call timeout applied to every send.
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        match self {
            Self::Webhook(config) => config.effective_timeout(),
            Self::Email(_) | Self::ChatWebhook(_) => {
                Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS)
            }
        }
    }

    /// Build the provider described by this configuration.
    pub fn build(self) -> Result<Arc<dyn NotificationProvider>, ConfigError> {
        let timeout = self.send_timeout();
        let provider: Arc<dyn NotificationProvider> = match self {
            Self::Email(config) => Arc::new(EmailProvider::new(config, timeout)),
            Self::ChatWebhook(config) => Arc::new(ChatWebhookProvider::new(config)),
            Self::Webhook(config) => Arc::new(WebhookProvider::new(config)?),
        };
        Ok(provider)
    }
}

// =============================================================================
// Email
// =============================================================================

/// Delivery strategy for the email channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailStrategy {
    /// Direct SMTP submission
    #[default]
    Smtp,
    /// Transactional email HTTP API
    Resend,
}

/// Transport security for SMTP submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Pick by port and fall back between implicit TLS and STARTTLS
    #[default]
    Auto,
    /// STARTTLS upgrade only
    Starttls,
    /// Implicit TLS only
    Tls,
    /// Unencrypted submission
    Plain,
}

/// Email provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Strategy selector
    #[serde(default)]
    pub provider: EmailStrategy,
    /// Sender address, shared by both strategies
    #[serde(default)]
    pub from_address: String,
    /// Optional sender display name
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default)]
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[serde(default)]
    pub smtp_security: SmtpSecurity,
    /// API key for the transactional strategy
    #[serde(default)]
    pub resend_api_key: Option<String>,
    /// Base URL of the transactional email API
    #[serde(default = "default_email_api_base_url")]
    pub api_base_url: String,
}

fn default_email_api_base_url() -> String {
    DEFAULT_EMAIL_API_BASE_URL.to_string()
}

impl EmailConfig {
    /// Validate the fields required by the selected strategy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_from_address(&self.from_address)?;

        match self.provider {
            EmailStrategy::Smtp => {
                required(self.smtp_host.as_deref(), "smtp_host")?;
                match self.smtp_port {
                    None => return Err(ConfigError::MissingField("smtp_port")),
                    Some(0) => return Err(ConfigError::invalid("smtp_port", "must be 1-65535")),
                    Some(_) => {}
                }
                required(self.smtp_username.as_deref(), "smtp_username")?;
                required(self.smtp_password.as_deref(), "smtp_password")?;
            }
            EmailStrategy::Resend => {
                required(self.resend_api_key.as_deref(), "resend_api_key")?;
                if !is_http_url(&self.api_base_url) {
                    return Err(ConfigError::invalid(
                        "api_base_url",
                        "must start with http:// or https://",
                    ));
                }
            }
        }

        Ok(())
    }
}

fn validate_from_address(from_address: &str) -> Result<(), ConfigError> {
    let from_address = from_address.trim();
    if from_address.is_empty() {
        return Err(ConfigError::MissingField("from_address"));
    }
    if !from_address.contains('@') {
        return Err(ConfigError::invalid("from_address", "must contain '@'"));
    }
    from_address
        .parse::<lettre::Address>()
        .map_err(|e| ConfigError::invalid("from_address", e.to_string()))?;
    Ok(())
}

// =============================================================================
// Chat webhook
// =============================================================================

/// Slack-style chat webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatWebhookConfig {
    /// Incoming webhook URL (https only)
    #[serde(default)]
    pub webhook_url: String,
    /// Default destination channel
    #[serde(default)]
    pub channel: Option<String>,
    /// Display name override
    #[serde(default)]
    pub username: Option<String>,
    /// Icon override
    #[serde(default)]
    pub icon_emoji: Option<String>,
}

impl ChatWebhookConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = required(Some(self.webhook_url.as_str()), "webhook_url")?;
        if !url.starts_with("https://") {
            return Err(ConfigError::invalid("webhook_url", "must start with https://"));
        }
        Ok(())
    }
}

// =============================================================================
// Generic webhook
// =============================================================================

/// Generic JSON webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL (http or https)
    #[serde(default)]
    pub url: String,
    /// HTTP method, POST when absent
    #[serde(default)]
    pub method: Option<String>,
    /// Extra request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request timeout in seconds; 0 selects the default
    #[serde(default = "default_webhook_timeout")]
    pub timeout: u64,
}

fn default_webhook_timeout() -> u64 {
    DEFAULT_SEND_TIMEOUT_SECS
}

impl WebhookConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = required(Some(self.url.as_str()), "url")?;
        if !is_http_url(url) {
            return Err(ConfigError::invalid("url", "must start with http:// or https://"));
        }

        if let Some(method) = &self.method {
            let upper = method.to_ascii_uppercase();
            if !WEBHOOK_METHODS.contains(&upper.as_str()) {
                return Err(ConfigError::invalid(
                    "method",
                    format!("must be one of {}", WEBHOOK_METHODS.join("/")),
                ));
            }
        }

        for (name, value) in &self.headers {
            reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::invalid("headers", format!("{name}: {e}")))?;
            reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| ConfigError::invalid("headers", format!("{name}: {e}")))?;
        }

        if self.timeout > MAX_WEBHOOK_TIMEOUT_SECS {
            return Err(ConfigError::invalid(
                "timeout",
                format!("must be between 0 and {MAX_WEBHOOK_TIMEOUT_SECS} seconds"),
            ));
        }

        Ok(())
    }

    /// HTTP method to use, defaulting to POST.
    #[must_use]
    pub fn method(&self) -> String {
        self.method
            .as_deref()
            .map_or_else(|| "POST".to_string(), str::to_ascii_uppercase)
    }

    /// Timeout applied to each request.
    #[must_use]
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout == 0 {
            Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.timeout)
        }
    }
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, ConfigError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::MissingField(field)),
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
