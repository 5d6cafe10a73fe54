//! The narrow interface between workers and push gateways.
//!
//! A [`Connector`] opens a [`Channel`] for a resolved protocol configuration.
//! The worker owns the channel exclusively and hands it one [`DeliveryUnit`]
//! at a time.

pub mod gcm;
pub mod moz;

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use herald_common::Protocol;

pub use self::{gcm::GcmConnector, moz::MozConnector};
pub use crate::policy::RetryAfter;
use crate::{config::ServiceConfig, error::ChannelError, message::Payload};

/// One gateway request worth of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryUnit<'a> {
    pub payload: &'a Payload,
    pub recipients: Vec<String>,
    /// Remaining time to live in seconds, `None` if unlimited
    pub time_to_live: Option<u32>,
}

/// What the gateway reported for a single recipient of an accepted unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientOutcome {
    Delivered,
    /// Delivered, but the gateway assigned a new identifier to the recipient
    Replaced(String),
    /// The identifier will never be valid again
    PermanentlyInvalid,
    /// The device could not be reached right now; worth another attempt
    Unavailable,
    /// Any other error code
    Unclassified(String),
}

/// Settings shared by every channel a distributor opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    pub testmode: bool,
    pub connect_timeout: Duration,
}

/// An open connection to a push gateway.
#[async_trait]
pub trait Channel: Send {
    /// Submit a unit to the gateway.
    ///
    /// On success the outcomes are positional: entry `i` belongs to
    /// `unit.recipients[i]`. Missing entries count as delivered.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] if the gateway rejected the unit as a whole.
    async fn deliver(
        &mut self,
        unit: &DeliveryUnit<'_>,
    ) -> Result<Vec<RecipientOutcome>, ChannelError>;

    /// Release the connection.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] if the channel could not be closed cleanly.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Opens channels for one protocol.
#[async_trait]
pub trait Connector: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Open a channel for `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] if the gateway cannot be reached or the
    /// configuration belongs to another protocol.
    async fn open(
        &self,
        config: &ServiceConfig,
        settings: ChannelSettings,
    ) -> Result<Box<dyn Channel>, ChannelError>;
}

/// Registry of the connectors a distributor may use.
#[derive(Clone)]
pub struct Connectors {
    connectors: BTreeMap<Protocol, Arc<dyn Connector>>,
}

impl Connectors {
    /// A registry with no connectors at all.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            connectors: BTreeMap::new(),
        }
    }

    /// Register `connector`, replacing any previous one for its protocol.
    #[must_use]
    pub fn with(mut self, connector: impl Connector + 'static) -> Self {
        self.register(Arc::new(connector));
        self
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.protocol(), connector);
    }

    #[must_use]
    pub fn get(&self, protocol: Protocol) -> Option<Arc<dyn Connector>> {
        self.connectors.get(&protocol).cloned()
    }
}

impl Default for Connectors {
    /// The built-in HTTP connectors. The binary-socket gateway has none.
    fn default() -> Self {
        Self::empty().with(GcmConnector).with(MozConnector)
    }
}

impl fmt::Debug for Connectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.connectors.keys()).finish()
    }
}

pub(crate) fn mismatched(expected: Protocol, config: &ServiceConfig) -> ChannelError {
    ChannelError::Channel(format!(
        "{expected} connector cannot open a {} channel",
        config.protocol()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_connectors() {
        let connectors = Connectors::default();
        assert!(connectors.get(Protocol::Gcm).is_some());
        assert!(connectors.get(Protocol::Moz).is_some());
        assert!(connectors.get(Protocol::Apns).is_none());
        assert_eq!(format!("{connectors:?}"), "{Gcm, Moz}");
    }

    #[test]
    fn test_empty_connectors() {
        let connectors = Connectors::empty();
        for protocol in Protocol::ALL {
            assert!(connectors.get(protocol).is_none());
        }
    }
}
