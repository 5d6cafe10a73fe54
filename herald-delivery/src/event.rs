//! Outcome records announced by the distributor and by individual messages.
//!
//! Delivery happens long after `send_message` returned, so these events are
//! the only way callers learn what became of a message.

use herald_common::Protocol;

/// Protocol scoped events, published on the distributor's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributorEvent {
    /// A worker began polling its queue
    Started(Protocol),
    /// A worker stopped polling and closed its channel
    Stopped(Protocol),
    /// Closing the channel failed; the worker is stopped regardless
    StopError { protocol: Protocol, reason: String },
    /// Every delivery unit of a message was accepted
    MessageSent(Protocol),
    /// Temporarily unavailable recipients were handed to a retry clone
    MessageRescheduled { protocol: Protocol, count: usize },
    /// A message could not be delivered; `resent` tells if a retry clone was queued
    Failed { protocol: Protocol, resent: bool },
    /// The gateway rejected the request as malformed
    Error400(Protocol),
    /// The gateway rejected our credentials
    Error401(Protocol),
    /// The gateway is overloaded or failing
    Error500(Protocol),
    /// The gateway could not be reached
    ErrorConnect { protocol: Protocol, reason: String },
    /// The gateway assigned a replacement identifier
    IdChange {
        protocol: Protocol,
        old: String,
        new: String,
    },
    /// The identifier is permanently invalid and should be forgotten
    IdUnregistered { protocol: Protocol, id: String },
    /// The gateway reported an error for the identifier that has no mapping
    IdUnhandledError {
        protocol: Protocol,
        id: String,
        code: String,
    },
}

impl DistributorEvent {
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        match self {
            Self::Started(protocol)
            | Self::Stopped(protocol)
            | Self::MessageSent(protocol)
            | Self::Error400(protocol)
            | Self::Error401(protocol)
            | Self::Error500(protocol)
            | Self::StopError { protocol, .. }
            | Self::MessageRescheduled { protocol, .. }
            | Self::Failed { protocol, .. }
            | Self::ErrorConnect { protocol, .. }
            | Self::IdChange { protocol, .. }
            | Self::IdUnregistered { protocol, .. }
            | Self::IdUnhandledError { protocol, .. } => *protocol,
        }
    }

    /// Short event name, as used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::Stopped(_) => "stopped",
            Self::StopError { .. } => "stopError",
            Self::MessageSent(_) => "messageSent",
            Self::MessageRescheduled { .. } => "messageRescheduled",
            Self::Failed { .. } => "failed",
            Self::Error400(_) => "error400",
            Self::Error401(_) => "error401",
            Self::Error500(_) => "error500",
            Self::ErrorConnect { .. } => "errorConnect",
            Self::IdChange { .. } => "idChange",
            Self::IdUnregistered { .. } => "idUnregistered",
            Self::IdUnhandledError { .. } => "idUnhandledError",
        }
    }
}

/// Recipient scoped events, published on the message's own channel and
/// shared by every retry clone derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    Success,
    Failed { resent: bool },
    IdChange { old: String, new: String },
    IdUnregistered { id: String },
    IdUnhandledError { id: String, code: String },
}
