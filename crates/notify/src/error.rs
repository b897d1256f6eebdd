//! Error types for the notification system.

use thiserror::Error;

use crate::channels::Channel;

/// Errors that can occur when sending a notification through a provider.
///
/// Every variant is treated as transient by the dispatcher and retried
/// according to the provider's retry policy.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote endpoint answered with a non-success status
    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    /// SMTP negotiation or submission failed
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// Recipient or sender address could not be parsed
    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// Email message could not be assembled
    #[error("Failed to build email: {0}")]
    Message(#[from] lettre::error::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The send did not complete within the per-call timeout
    #[error("Send timed out after {0}s")]
    Timeout(u64),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Provider configuration errors. Always fatal at registration time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration document is not valid JSON for the channel's schema
    #[error("Malformed {channel} configuration: {source}")]
    Malformed {
        channel: Channel,
        #[source]
        source: serde_json::Error,
    },

    /// A required field is absent or empty
    #[error("Missing required field `{0}`")]
    MissingField(&'static str),

    /// A field is present but its value is not acceptable
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A provider is already registered for this channel
    #[error("A provider is already registered for channel {0}")]
    DuplicateChannel(Channel),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors returned by [`NotificationDispatcher::dispatch`](crate::NotificationDispatcher::dispatch).
///
/// Delivery failures are not errors: they are reported through
/// [`DispatchOutcome`](crate::DispatchOutcome).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No provider is registered for the requested channel
    #[error("No provider registered for channel {0}")]
    NoProvider(Channel),

    /// The attempt store failed to load or persist attempt state
    #[error("Attempt store error: {0}")]
    Store(#[from] AttemptStoreError),
}

/// Failure of the durable attempt store.
#[derive(Debug, Error)]
pub enum AttemptStoreError {
    /// Underlying I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored state could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}
