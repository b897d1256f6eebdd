//! Provider Registry - owns the notification providers by channel.
//!
//! Providers are registered once at startup from validated settings. An
//! invalid configuration rejects the registration; nothing is silently
//! disabled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::channels::{Channel, NotificationProvider};
use crate::config::{ProviderConfig, ProviderSettings, RetryPolicy};
use crate::error::ConfigError;

/// A provider together with its delivery policy.
#[derive(Clone)]
pub struct RegisteredProvider {
    pub provider: Arc<dyn NotificationProvider>,
    pub retry: RetryPolicy,
    /// Per-call send timeout
    pub timeout: Duration,
}

impl RegisteredProvider {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.provider.name()
    }
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Registry of notification providers, one per channel.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Channel, RegisteredProvider>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration entries.
    ///
    /// Every entry is validated, including disabled ones; the first invalid
    /// entry aborts the whole registration.
    pub fn from_settings(settings: &[ProviderSettings]) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for entry in settings {
            registry.register(entry)?;
        }

        info!(
            channel_count = registry.providers.len(),
            "Provider registry initialized"
        );
        Ok(registry)
    }

    /// Validate and register one configuration entry.
    pub fn register(&mut self, settings: &ProviderSettings) -> Result<(), ConfigError> {
        let config = ProviderConfig::validate_config(settings.channel, &settings.config)?;

        if !settings.enabled {
            debug!(channel = %settings.channel, "Provider disabled, skipping registration");
            return Ok(());
        }

        if self.providers.contains_key(&settings.channel) {
            return Err(ConfigError::DuplicateChannel(settings.channel));
        }

        let timeout = config.send_timeout();
        let provider = config.build()?;

        info!(
            channel = %settings.channel,
            provider = provider.name(),
            max_retries = settings.max_retries,
            retry_delay_seconds = settings.retry_delay_seconds,
            "Provider registered"
        );

        self.providers.insert(
            settings.channel,
            RegisteredProvider {
                provider,
                retry: settings.retry_policy(),
                timeout,
            },
        );
        Ok(())
    }

    /// Register an already constructed provider on its channel.
    pub fn register_provider(
        &mut self,
        provider: Arc<dyn NotificationProvider>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<(), ConfigError> {
        let channel = provider.channel();
        if self.providers.contains_key(&channel) {
            return Err(ConfigError::DuplicateChannel(channel));
        }
        self.providers.insert(
            channel,
            RegisteredProvider {
                provider,
                retry,
                timeout,
            },
        );
        Ok(())
    }

    /// Get the provider for a channel.
    #[must_use]
    pub fn get(&self, channel: Channel) -> Option<&RegisteredProvider> {
        self.providers.get(&channel)
    }

    /// Check if a channel has a provider.
    #[must_use]
    pub fn has_channel(&self, channel: Channel) -> bool {
        self.providers.contains_key(&channel)
    }

    /// Channels with a registered provider.
    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.providers.keys().copied().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn webhook_settings(url: &str) -> ProviderSettings {
        ProviderSettings::new(Channel::Webhook, json!({ "url": url }))
    }

    #[test]
    fn test_registry_creation() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.has_channel(Channel::Email));
    }

    #[test]
    fn test_from_settings_registers_by_channel() {
        let settings = vec![
            webhook_settings("https://hooks.example.com/alerts"),
            ProviderSettings::new(
                Channel::ChatWebhook,
                json!({ "webhook_url": "https://hooks.slack.com/services/T/B/X" }),
            ),
        ];

        let registry = ProviderRegistry::from_settings(&settings).unwrap();
        assert!(registry.has_channel(Channel::Webhook));
        assert!(registry.has_channel(Channel::ChatWebhook));
        assert_eq!(registry.get(Channel::Webhook).unwrap().name(), "webhook");
        assert_eq!(registry.get(Channel::ChatWebhook).unwrap().name(), "slack");
    }

    #[test]
    fn test_invalid_entry_rejects_registration() {
        let settings = vec![
            webhook_settings("https://hooks.example.com/alerts"),
            ProviderSettings::new(
                Channel::ChatWebhook,
                json!({ "webhook_url": "http://insecure.example.com" }),
            ),
        ];
        assert!(ProviderRegistry::from_settings(&settings).is_err());
    }

    #[test]
    fn test_disabled_entry_is_validated_but_skipped() {
        let mut disabled = webhook_settings("https://hooks.example.com/alerts");
        disabled.enabled = false;
        let registry = ProviderRegistry::from_settings(&[disabled]).unwrap();
        assert!(registry.is_empty());

        let mut broken = webhook_settings("nope");
        broken.enabled = false;
        assert!(ProviderRegistry::from_settings(&[broken]).is_err());
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let settings = vec![
            webhook_settings("https://a.example.com"),
            webhook_settings("https://b.example.com"),
        ];
        assert!(matches!(
            ProviderRegistry::from_settings(&settings),
            Err(ConfigError::DuplicateChannel(Channel::Webhook))
        ));
    }

    #[test]
    fn test_retry_policy_carried_from_settings() {
        let mut settings = webhook_settings("https://hooks.example.com/alerts");
        settings.max_retries = 5;
        settings.retry_delay_seconds = 10;
        let registry = ProviderRegistry::from_settings(&[settings]).unwrap();
        let entry = registry.get(Channel::Webhook).unwrap();
        assert_eq!(entry.retry.max_retries, 5);
        assert_eq!(entry.retry.retry_delay, Duration::from_secs(10));
    }
}
