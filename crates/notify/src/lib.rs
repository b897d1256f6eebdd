//! Notification delivery for alert escalation.
//!
//! This crate owns everything between "this recipient must be told" and a
//! message leaving the process:
//!
//! - [`NotificationProvider`] is the capability every channel implements
//! - [`ProviderConfig`] is the closed set of built-in provider variants
//!   (email, chat webhook, generic webhook) with their validation rules
//! - [`ProviderRegistry`] holds one validated provider per [`Channel`]
//! - [`NotificationDispatcher`] sends through the registry with per-channel
//!   fixed-delay retries and durable [`NotificationAttempt`] records
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use notify::{
//!     Channel, DeliveryKey, DispatchRequest, MemoryAttemptStore, NotificationDispatcher,
//!     ProviderRegistry, ProviderSettings, SystemClock, TracingSink,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = vec![ProviderSettings::new(
//!     Channel::Webhook,
//!     serde_json::json!({ "url": "https://hooks.example.com/alerts" }),
//! )];
//! let registry = Arc::new(ProviderRegistry::from_settings(&settings)?);
//! let dispatcher = NotificationDispatcher::new(
//!     registry,
//!     Arc::new(MemoryAttemptStore::new()),
//!     Arc::new(TracingSink),
//!     Arc::new(SystemClock),
//! );
//!
//! let outcome = dispatcher
//!     .dispatch(
//!         DispatchRequest {
//!             key: DeliveryKey {
//!                 event_id: uuid::Uuid::new_v4(),
//!                 rule_id: "rule-0".to_string(),
//!                 target_id: "user-1".to_string(),
//!                 pass: 0,
//!             },
//!             channel: Channel::Webhook,
//!             recipient: "user-1".to_string(),
//!             subject: Some("[CRITICAL] api down".to_string()),
//!             message: "api-gateway is not responding".to_string(),
//!         },
//!         CancellationToken::new(),
//!     )
//!     .await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod attempts;
pub mod channels;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod registry;

pub use attempts::{
    AttemptKey, AttemptOutcome, AttemptStore, DeliveryKey, MemoryAttemptStore,
    NotificationAttempt,
};
pub use channels::{Channel, NotificationProvider};
pub use clock::{Clock, SystemClock, TokioClock};
pub use config::{ProviderConfig, ProviderSettings, RetryPolicy};
pub use dispatcher::{DispatchOutcome, DispatchRequest, NotificationDispatcher};
pub use error::{AttemptStoreError, ChannelError, ConfigError, DispatchError};
pub use metrics::{MemorySink, MetricsSink, Signal, TracingSink};
pub use registry::{ProviderRegistry, RegisteredProvider};
