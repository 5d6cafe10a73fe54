//! Typed error handling for the dispatch engine.
//!
//! Errors fall into two families:
//! - Synchronous errors returned to the immediate caller (configuration,
//!   queue lock timeouts, message construction, distributor lifecycle)
//! - Channel errors reported by a push gateway during a delivery attempt,
//!   which are never returned to `send_message` callers and only surface
//!   through events

use std::time::Duration;

use herald_common::Protocol;
use thiserror::Error;

use crate::policy::RetryAfter;

/// A queue operation could not acquire the queue's exclusive lock in time.
///
/// This is backpressure, not data loss: nothing was removed from the queue,
/// and on `add` the message was simply not accepted yet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Unable to acquire lock for message queue {namespace} within {waited:?}")]
    LockTimeout { namespace: String, waited: Duration },
}

/// Invalid or incomplete protocol configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required option is absent after merging defaults.
    #[error("{protocol}.{field} is missing from options")]
    MissingOption {
        protocol: Protocol,
        field: &'static str,
    },

    /// An option is present but unusable.
    #[error("Invalid value for {protocol}.{field}: {reason}")]
    InvalidOption {
        protocol: Protocol,
        field: &'static str,
        reason: String,
    },

    /// The protocol is configured but no connector is registered for it.
    #[error("No connector registered for configured protocol {0}")]
    UnresolvedConnector(Protocol),
}

/// A message could not be built from the supplied payload or options.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("time_to_live must be between 1 and 2419200 (4 weeks), got {0}")]
    TtlOutOfRange(u64),

    #[error("Retries has to be greater than 0")]
    InvalidRetries,

    #[error("add_recipients called with an empty list")]
    EmptyRecipients,

    #[error("Invalid {protocol} payload: {reason}")]
    InvalidPayload { protocol: Protocol, reason: String },
}

/// Failure reported by a push gateway for a whole delivery unit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The gateway rejected our credentials; every further attempt would fail too.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The gateway could not parse the request; retrying repeats the failure.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The gateway is overloaded or failing internally.
    #[error("Provider overloaded: {reason}")]
    ProviderOverloaded {
        reason: String,
        retry_after: Option<RetryAfter>,
    },

    /// The gateway could not be reached.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The channel could not be opened or closed cleanly.
    #[error("Channel error: {0}")]
    Channel(String),
}

impl ChannelError {
    /// Returns `true` if the unit should be retried through a message clone.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(
            self,
            Self::ProviderOverloaded { .. } | Self::ConnectionFailed(_)
        )
    }

    /// Returns `true` if retrying would repeat the same failure.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_) | Self::MalformedRequest(_))
    }

    /// The gateway's requested back-off, if it sent one.
    #[must_use]
    pub const fn retry_after(&self) -> Option<&RetryAfter> {
        match self {
            Self::ProviderOverloaded { retry_after, .. } => retry_after.as_ref(),
            _ => None,
        }
    }
}

/// Errors surfaced by the [`MessageDistributor`](crate::MessageDistributor).
#[derive(Debug, Error)]
pub enum DistributorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    /// `send_message` was called with a message that has no recipients.
    #[error("Message is not sendable: it has no recipients")]
    NotSendable,

    #[error("Timeout after {0:?} while initialising services")]
    InitTimeout(Duration),

    #[error("Error while initialising services: {}", list(.0))]
    InitFailed(Vec<Protocol>),

    /// Startup timed out; services that did start were stopped again.
    #[error("Timeout while startup - already started services have been stopped")]
    StartupTimeout,

    /// Startup timed out and stopping the started services failed too.
    #[error("Timeout while startup - unable to shutdown already started services")]
    StartupAborted,

    #[error("Timeout while stopping services")]
    StopTimeout,

    /// The worker task for a protocol is no longer receiving commands.
    #[error("Worker for {0} is gone")]
    WorkerGone(Protocol),
}

fn list(protocols: &[Protocol]) -> String {
    protocols
        .iter()
        .copied()
        .map(Protocol::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
