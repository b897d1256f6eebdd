//! Alert escalation engine.
//!
//! Drives alerts through escalation policies: each policy is an ordered list
//! of rules, each rule names who to notify and how long to wait after the
//! previous one. The [`EscalationScheduler`] owns the timers and run state;
//! the [`TargetResolver`] turns users, teams and on-call schedules into
//! recipients at the moment a level fires; delivery goes through the
//! [`notify`] crate's dispatcher.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use escalation::{
//!     EscalationScheduler, MemoryStore, SchedulerConfig, SchedulerDeps, TargetResolver,
//! };
//! use notify::{
//!     MemoryAttemptStore, NotificationDispatcher, ProviderRegistry, SystemClock, TracingSink,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let dispatcher = NotificationDispatcher::new(
//!     Arc::new(ProviderRegistry::new()),
//!     Arc::new(MemoryAttemptStore::new()),
//!     Arc::new(TracingSink),
//!     Arc::new(SystemClock),
//! );
//! let deps = SchedulerDeps {
//!     policies: store.clone(),
//!     alerts: store.clone(),
//!     events: store.clone(),
//!     resolver: Arc::new(TargetResolver::new(store.clone(), store.clone(), store.clone())),
//!     dispatcher,
//!     metrics: Arc::new(TracingSink),
//!     clock: Arc::new(SystemClock),
//! };
//!
//! let (scheduler, _task) = EscalationScheduler::spawn(deps, SchedulerConfig::default());
//! let event = scheduler.trigger("alert-1", "policy-1").await?;
//! # let _ = event;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod model;
pub mod resolver;
pub mod scheduler;
pub mod store;

pub use config::EngineConfig;
pub use error::{ConfigLoadError, EscalationError, ResolveError, StoreError};
pub use model::{
    Alert, AlertEscalationEvent, AlertStatus, ContactMethod, EscalationPolicy, EscalationRule,
    EscalationTarget, EventType, RepeatPolicy, Schedule, Severity, Shift, Step, TargetType, Team,
    User,
};
pub use resolver::{Recipient, RuleResolution, TargetResolver};
pub use scheduler::{EscalationScheduler, SchedulerConfig, SchedulerDeps};
pub use store::{
    AlertStore, Catalog, EventStore, FileStateStore, MemoryStore, PolicyStore, ScheduleResolver,
    TeamStore, UserDirectory,
};
