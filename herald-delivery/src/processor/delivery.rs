//! Delivery of a single message and interpretation of the gateway's answer

use std::iter;

use chrono::Utc;
use herald_common::Protocol;

use crate::{
    channel::{Channel, DeliveryUnit, RecipientOutcome},
    distributor::Shared,
    error::ChannelError,
    event::{DistributorEvent, MessageEvent},
    message::Message,
};

/// Whether the poll loop may carry on after a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The gateway refused our credentials; every further attempt would fail
    Halt,
}

/// Deliver `message` unit by unit.
///
/// The first unit the gateway rejects ends the attempt. Retryable rejections
/// hand a clone carrying the recipients of that unit and of every unit not
/// yet attempted back to the distributor; recipients that were already
/// accepted are not sent again.
pub async fn deliver(channel: &mut dyn Channel, shared: &Shared, message: Message) -> Flow {
    let protocol = message.protocol();

    if message.remaining_ttl().is_expired() {
        tracing::warn!(
            protocol = %protocol,
            recipients = message.recipients().len(),
            "Dropping message whose time to live elapsed while queued"
        );
        return Flow::Continue;
    }

    let units = message.delivery_units();
    let mut unavailable = Vec::new();
    let mut failure = None;
    let mut flow = Flow::Continue;

    for (index, unit) in units.iter().enumerate() {
        match channel.deliver(unit).await {
            Ok(outcomes) => announce(shared, &message, unit, outcomes, &mut unavailable),
            Err(err) => {
                let (resent, next) = reject(shared, &message, &units[index..], err);
                failure = Some(resent);
                flow = next;
                break;
            }
        }
    }

    match failure {
        None => {
            shared.emit(DistributorEvent::MessageSent(protocol));
            message.emit(MessageEvent::Success);
        }
        Some(resent) => {
            shared.emit(DistributorEvent::Failed { protocol, resent });
            message.emit(MessageEvent::Failed { resent });
        }
    }

    if !unavailable.is_empty() {
        let count = unavailable.len();
        if resubmit(shared, protocol, message.next_attempt_for(unavailable, None)) {
            shared.emit(DistributorEvent::MessageRescheduled { protocol, count });
        }
    }

    flow
}

/// Report per-recipient results of an accepted unit.
fn announce(
    shared: &Shared,
    message: &Message,
    unit: &DeliveryUnit<'_>,
    outcomes: Vec<RecipientOutcome>,
    unavailable: &mut Vec<String>,
) {
    let protocol = message.protocol();
    let outcomes = outcomes
        .into_iter()
        .chain(iter::repeat(RecipientOutcome::Delivered));

    for (recipient, outcome) in unit.recipients.iter().zip(outcomes) {
        match outcome {
            RecipientOutcome::Delivered => {}
            RecipientOutcome::Replaced(new) => {
                shared.emit(DistributorEvent::IdChange {
                    protocol,
                    old: recipient.clone(),
                    new: new.clone(),
                });
                message.emit(MessageEvent::IdChange {
                    old: recipient.clone(),
                    new,
                });
            }
            RecipientOutcome::PermanentlyInvalid => {
                shared.emit(DistributorEvent::IdUnregistered {
                    protocol,
                    id: recipient.clone(),
                });
                message.emit(MessageEvent::IdUnregistered {
                    id: recipient.clone(),
                });
            }
            RecipientOutcome::Unavailable => unavailable.push(recipient.clone()),
            RecipientOutcome::Unclassified(code) => {
                tracing::debug!(
                    protocol = %protocol,
                    recipient = %recipient,
                    code = %code,
                    "Recipient error which may be unrecoverable"
                );
                shared.emit(DistributorEvent::IdUnhandledError {
                    protocol,
                    id: recipient.clone(),
                    code: code.clone(),
                });
                message.emit(MessageEvent::IdUnhandledError {
                    id: recipient.clone(),
                    code,
                });
            }
        }
    }
}

/// Decide what a rejected unit means for the message and the worker.
///
/// Returns whether a retry clone was queued.
fn reject(
    shared: &Shared,
    message: &Message,
    pending: &[DeliveryUnit<'_>],
    err: ChannelError,
) -> (bool, Flow) {
    let protocol = message.protocol();
    let resent = err.is_temporary() && {
        let hint = err.retry_after().map(|hint| hint.delay_secs(Utc::now()));
        tracing::debug!(
            protocol = %protocol,
            error = %err,
            retry_after = ?hint,
            "Gateway unavailable, rescheduling"
        );
        let remaining = pending
            .iter()
            .flat_map(|unit| unit.recipients.iter().cloned());
        resubmit(shared, protocol, message.next_attempt_for(remaining, hint))
    };

    if err.is_permanent() && !shared.testmode() {
        tracing::error!(protocol = %protocol, error = %err, "Gateway refused the request");
    }

    let flow = if matches!(err, ChannelError::AuthenticationFailed(_)) {
        Flow::Halt
    } else {
        Flow::Continue
    };

    match err {
        ChannelError::ConnectionFailed(reason) => {
            shared.emit(DistributorEvent::ErrorConnect { protocol, reason });
        }
        ChannelError::ProviderOverloaded { .. } => shared.emit(DistributorEvent::Error500(protocol)),
        ChannelError::MalformedRequest(_) => shared.emit(DistributorEvent::Error400(protocol)),
        ChannelError::AuthenticationFailed(_) => shared.emit(DistributorEvent::Error401(protocol)),
        ChannelError::Channel(reason) => {
            tracing::error!(protocol = %protocol, reason = %reason, "Delivery failed");
        }
    }

    (resent, flow)
}

/// Queue a retry clone; `None` means the retry chain has ended.
fn resubmit(shared: &Shared, protocol: Protocol, clone: Option<Message>) -> bool {
    let Some(clone) = clone else {
        tracing::info!(
            protocol = %protocol,
            "Time to live or retries exhausted, dropping message"
        );
        return false;
    };

    let recipients = clone.recipients().len();
    match shared.send_message(clone) {
        Ok(()) => {
            tracing::debug!(protocol = %protocol, recipients, "Retry queued");
            true
        }
        Err(err) => {
            tracing::error!(protocol = %protocol, error = %err, "Unable to queue retry");
            false
        }
    }
}
