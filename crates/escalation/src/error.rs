//! Error types for the escalation engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::AlertStatus;

/// Errors raised by the catalog and event stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying I/O failed
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored state could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<StoreError> for notify::AttemptStoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io { source, .. } => Self::Io(source),
            StoreError::Serialization(e) => Self::Serialization(e),
            StoreError::Other(msg) => Self::Other(msg),
        }
    }
}

/// Why a single escalation target produced no recipients.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Unknown target type: {0}")]
    UnknownTargetType(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Team not found: {0}")]
    TeamNotFound(String),

    /// Schedule unknown, or nobody covers the instant
    #[error("No one on call for schedule {0}")]
    NoOnCall(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors returned by escalation scheduler operations.
#[derive(Error, Debug)]
pub enum EscalationError {
    #[error("Escalation policy not found: {0}")]
    PolicyNotFound(String),

    #[error("Escalation policy {0} has no rules")]
    EmptyPolicy(String),

    #[error("Escalation policy {policy_id} is invalid: {reason}")]
    InvalidPolicy { policy_id: String, reason: String },

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Alert {alert_id} is {status:?}, not triggered")]
    AlertNotActive {
        alert_id: String,
        status: AlertStatus,
    },

    /// The alert already has an active escalation run
    #[error("Alert {0} is already escalating")]
    AlreadyEscalating(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The scheduler task is no longer running
    #[error("Escalation scheduler is not running")]
    SchedulerClosed,
}

/// Errors loading engine configuration.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid provider configuration: {0}")]
    Provider(#[from] notify::ConfigError),

    #[error("Invalid scheduler configuration: {0}")]
    Scheduler(String),
}
