//! Engine configuration.
//!
//! The configuration is a JSON document:
//!
//! ```json
//! {
//!   "providers": [
//!     { "channel": "webhook", "config": { "url": "https://hooks.example.com/alerts" } }
//!   ],
//!   "scheduler": { "min_repeat_interval_seconds": 60 },
//!   "state_dir": "/var/lib/escalation",
//!   "state_retention_hours": 168
//! }
//! ```
//!
//! `ESCALATION_STATE_DIR` overrides `state_dir`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{ProviderRegistry, ProviderSettings};
use serde::{Deserialize, Serialize};

use crate::error::ConfigLoadError;
use crate::scheduler::{SchedulerConfig, DEFAULT_COMMAND_BUFFER};
use crate::store::DEFAULT_RETENTION;

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "ESCALATION_STATE_DIR";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Directory for durable state; in-memory state when absent
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// How long finished runs stay in the state directory
    #[serde(default)]
    pub state_retention_hours: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_min_repeat_interval")]
    pub min_repeat_interval_seconds: u64,
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_min_repeat_interval() -> u64 {
    60
}

fn default_command_buffer() -> usize {
    DEFAULT_COMMAND_BUFFER
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            min_repeat_interval_seconds: default_min_repeat_interval(),
            command_buffer: default_command_buffer(),
        }
    }
}

impl SchedulerSettings {
    /// Scheduler tuning, with the repeat interval clamped to one second.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            min_repeat_interval: Duration::from_secs(self.min_repeat_interval_seconds.max(1)),
            command_buffer: self.command_buffer.max(1),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&content).map_err(|source| ConfigLoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(STATE_DIR_ENV).filter(|d| !d.is_empty()) {
            self.state_dir = Some(PathBuf::from(dir));
        }
    }

    /// Retention of finished runs in durable state.
    pub fn state_retention(&self) -> Duration {
        self.state_retention_hours
            .map_or(DEFAULT_RETENTION, |hours| Duration::from_secs(hours.saturating_mul(3600)))
    }

    /// Validate every provider entry and build the registry.
    pub fn build_registry(&self) -> Result<ProviderRegistry, ConfigLoadError> {
        Ok(ProviderRegistry::from_settings(&self.providers)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::Channel;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config: EngineConfig = serde_json::from_value(json!({})).unwrap();
        assert!(config.providers.is_empty());
        assert!(config.state_dir.is_none());

        let scheduler = config.scheduler.scheduler_config();
        assert_eq!(scheduler.min_repeat_interval, Duration::from_secs(60));
        assert_eq!(scheduler.command_buffer, DEFAULT_COMMAND_BUFFER);
        assert_eq!(config.state_retention(), DEFAULT_RETENTION);

        let config: EngineConfig =
            serde_json::from_value(json!({ "state_retention_hours": 2 })).unwrap();
        assert_eq!(config.state_retention(), Duration::from_secs(7200));
    }

    #[test]
    fn test_repeat_interval_is_clamped() {
        let config: EngineConfig = serde_json::from_value(json!({
            "scheduler": { "min_repeat_interval_seconds": 0 }
        }))
        .unwrap();
        assert_eq!(
            config.scheduler.scheduler_config().min_repeat_interval,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_build_registry_validates_providers() {
        let config: EngineConfig = serde_json::from_value(json!({
            "providers": [
                { "channel": "webhook", "config": { "url": "https://hooks.example.com/a" } },
                { "channel": "chat_webhook", "config": { "webhook_url": "https://hooks.slack.com/x" }, "max_retries": 5 }
            ]
        }))
        .unwrap();
        let registry = config.build_registry().unwrap();
        assert!(registry.has_channel(Channel::Webhook));
        assert_eq!(registry.get(Channel::ChatWebhook).unwrap().retry.max_retries, 5);

        let broken: EngineConfig = serde_json::from_value(json!({
            "providers": [{ "channel": "webhook", "config": { "url": "ftp://x" } }]
        }))
        .unwrap();
        assert!(matches!(
            broken.build_registry(),
            Err(ConfigLoadError::Provider(_))
        ));
    }

    #[test]
    fn test_state_dir_override() {
        let mut config = EngineConfig::default();
        config.apply_env_overrides(|key| {
            (key == STATE_DIR_ENV).then(|| "/tmp/escalation-state".to_string())
        });
        assert_eq!(
            config.state_dir.as_deref(),
            Some(Path::new("/tmp/escalation-state"))
        );

        config.apply_env_overrides(|_| Some(String::new()));
        assert_eq!(
            config.state_dir.as_deref(),
            Some(Path::new("/tmp/escalation-state"))
        );
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("engine.json"));
    }
}
