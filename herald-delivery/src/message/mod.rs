//! The protocol agnostic message envelope and its retry chain.

pub mod payload;

use std::{collections::BTreeSet, sync::Arc};

use herald_common::Protocol;
use serde::Deserialize;
use serde_json::Value;
use tokio::{sync::broadcast, time::Instant};

pub use self::payload::{ApnsPayload, GcmPayload, LocalizedText, MozPayload, Payload};
use crate::{
    channel::DeliveryUnit,
    error::MessageError,
    event::MessageEvent,
    policy::retry::{MAX_DELAY_SECS, escalate_delay, with_jitter},
};

/// Longest accepted time to live: four weeks
pub const MAX_TTL_SECS: u64 = 2_419_200;

const EVENT_CAPACITY: usize = 64;

/// Caller supplied message settings.
///
/// Fields that do not apply to the target protocol are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessageOptions {
    pub recipients: Vec<String>,
    /// Seconds after creation beyond which the message must not be delivered
    pub time_to_live: Option<u64>,
    /// Seconds to wait before the first attempt
    pub delay: u64,
    /// Attempts left before the retry chain ends
    pub retries: Option<u32>,
    pub collapse_key: Option<String>,
    pub restricted_package_name: Option<String>,
    pub delay_while_idle: Option<bool>,
    pub dry_run: Option<bool>,
    pub sound_file_name: Option<String>,
    pub content_available: bool,
    pub show_action_button: Option<bool>,
}

/// Time to live left on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingTtl {
    /// No time to live was set
    Unlimited,
    /// Whole seconds left, at least one
    Remaining(u32),
    /// The time to live has elapsed
    Expired,
}

impl RemainingTtl {
    #[must_use]
    pub const fn is_expired(self) -> bool {
        matches!(self, Self::Expired)
    }

    /// Seconds left, `None` if unlimited or expired.
    #[must_use]
    pub const fn seconds(self) -> Option<u32> {
        match self {
            Self::Remaining(seconds) => Some(seconds),
            Self::Unlimited | Self::Expired => None,
        }
    }
}

/// An outbound push notification.
///
/// A message that fails to deliver is never re-queued itself; instead it
/// derives a retry clone through [`Message::next_attempt`]. Clones share the
/// payload and the event channel of their parent, so a subscriber sees the
/// outcome of the whole retry chain.
#[derive(Debug)]
pub struct Message {
    payload: Arc<Payload>,
    recipients: BTreeSet<String>,
    created_at: Instant,
    ttl: Option<u32>,
    delay: u64,
    retries: Option<u32>,
    events: broadcast::Sender<MessageEvent>,
}

impl Message {
    /// A message without recipients, time to live, delay or retry budget.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self {
            payload: Arc::new(payload),
            recipients: BTreeSet::new(),
            created_at: Instant::now(),
            ttl: None,
            delay: 0,
            retries: None,
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    /// A message for `payload` configured from `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if the time to live or retry budget is out of range.
    pub fn with_options(payload: Payload, options: &MessageOptions) -> Result<Self, MessageError> {
        let mut message = Self::new(payload);

        if let Some(ttl) = options.time_to_live {
            message.set_ttl(ttl)?;
        }
        if let Some(retries) = options.retries {
            message.set_retries(retries)?;
        }
        if !options.recipients.is_empty() {
            message.add_recipients(options.recipients.iter().cloned())?;
        }
        message.delay = options.delay;

        Ok(message)
    }

    /// Build a message for `protocol` from raw data.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload or the options are invalid.
    pub fn create(
        protocol: Protocol,
        data: Value,
        options: &MessageOptions,
    ) -> Result<Self, MessageError> {
        Self::with_options(Payload::build(protocol, data, options)?, options)
    }

    /// A message is sendable once it has at least one recipient.
    #[must_use]
    pub fn is_sendable(&self) -> bool {
        !self.recipients.is_empty()
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.payload.protocol()
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[must_use]
    pub const fn recipients(&self) -> &BTreeSet<String> {
        &self.recipients
    }

    /// Add recipients, ignoring ones already present.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::EmptyRecipients`] if `recipients` is empty.
    pub fn add_recipients<I, S>(&mut self, recipients: I) -> Result<&mut Self, MessageError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.recipients.len();
        let mut seen = false;
        for recipient in recipients {
            seen = true;
            self.recipients.insert(recipient.into());
        }

        if !seen {
            return Err(MessageError::EmptyRecipients);
        }
        tracing::trace!(
            added = self.recipients.len() - before,
            total = self.recipients.len(),
            "Recipients added"
        );
        Ok(self)
    }

    #[must_use]
    pub const fn delay(&self) -> u64 {
        self.delay
    }

    pub const fn set_delay(&mut self, delay_secs: u64) -> &mut Self {
        self.delay = delay_secs;
        self
    }

    /// Delay to hand to the queue: the configured delay plus jitter, or zero.
    #[must_use]
    pub fn effective_delay(&self) -> u64 {
        with_jitter(self.delay)
    }

    #[must_use]
    pub const fn ttl(&self) -> Option<u32> {
        self.ttl
    }

    /// Set the time to live in seconds, counted from the message's creation.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::TtlOutOfRange`] unless `1 <= ttl <= 2419200`.
    pub fn set_ttl(&mut self, ttl: u64) -> Result<&mut Self, MessageError> {
        if !(1..=MAX_TTL_SECS).contains(&ttl) {
            return Err(MessageError::TtlOutOfRange(ttl));
        }
        self.ttl = u32::try_from(ttl).ok();
        Ok(self)
    }

    /// Time to live left, in whole seconds elapsed since creation.
    #[must_use]
    pub fn remaining_ttl(&self) -> RemainingTtl {
        let Some(ttl) = self.ttl else {
            return RemainingTtl::Unlimited;
        };

        let elapsed = self.created_at.elapsed().as_secs();
        match u64::from(ttl).checked_sub(elapsed) {
            Some(remaining) if remaining >= 1 => {
                RemainingTtl::Remaining(u32::try_from(remaining).unwrap_or(u32::MAX))
            }
            _ => RemainingTtl::Expired,
        }
    }

    #[must_use]
    pub const fn retries(&self) -> Option<u32> {
        self.retries
    }

    /// Set the number of attempts left.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::InvalidRetries`] for zero.
    pub const fn set_retries(&mut self, retries: u32) -> Result<&mut Self, MessageError> {
        if retries == 0 {
            return Err(MessageError::InvalidRetries);
        }
        self.retries = Some(retries);
        Ok(self)
    }

    /// The retry clone addressed to every recipient of this message.
    ///
    /// See [`Message::next_attempt_for`].
    #[must_use]
    pub fn next_attempt(&self) -> Option<Self> {
        self.next_attempt_for(self.recipients.iter().cloned(), None)
    }

    /// The retry clone addressed to `recipients`.
    ///
    /// The clone waits `max(1, 2 * delay)` seconds, or `max(1, delay_hint)` when
    /// a hint is given, never more than [`MAX_DELAY_SECS`]. Its time to live is
    /// what is left of this one's.
    /// Returns `None` when the chain ends: the time to live is used up, the
    /// remaining time to live does not exceed the clone's delay, or the retry
    /// budget would drop to zero.
    #[must_use]
    pub fn next_attempt_for<I, S>(&self, recipients: I, delay_hint: Option<u64>) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let delay = delay_hint.map_or_else(
            || escalate_delay(self.delay),
            |hint| hint.clamp(1, MAX_DELAY_SECS),
        );

        let ttl = match self.remaining_ttl() {
            RemainingTtl::Unlimited => None,
            RemainingTtl::Expired => return None,
            RemainingTtl::Remaining(remaining) if u64::from(remaining) <= delay => return None,
            RemainingTtl::Remaining(remaining) => Some(remaining),
        };

        let retries = match self.retries {
            None => None,
            Some(retries) if retries <= 1 => return None,
            Some(retries) => Some(retries - 1),
        };

        Some(Self {
            payload: Arc::clone(&self.payload),
            recipients: recipients.into_iter().map(Into::into).collect(),
            created_at: Instant::now(),
            ttl,
            delay,
            retries,
            events: self.events.clone(),
        })
    }

    /// Listen for outcomes of this message and its retry clones.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MessageEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: MessageEvent) {
        // No subscribers is the common case.
        let _ = self.events.send(event);
    }

    /// Split the recipients into gateway sized delivery units.
    #[must_use]
    pub fn delivery_units(&self) -> Vec<DeliveryUnit<'_>> {
        let recipients: Vec<String> = self.recipients.iter().cloned().collect();
        let time_to_live = self.remaining_ttl().seconds();

        recipients
            .chunks(self.payload.batch_size())
            .map(|chunk| DeliveryUnit {
                payload: &self.payload,
                recipients: chunk.to_vec(),
                time_to_live,
            })
            .collect()
    }
}
