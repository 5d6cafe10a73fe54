//! The recurring drain-and-deliver task of a running worker

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures_util::FutureExt;
use herald_common::{Protocol, internal};
use tokio::{
    sync::oneshot,
    time::{MissedTickBehavior, interval},
};

use super::delivery::{self, Flow};
use crate::{
    channel::Channel,
    distributor::{ServiceSlot, Shared},
    event::DistributorEvent,
    queue::LockWait,
};

/// Time between poll ticks for `protocol`.
#[must_use]
pub const fn tick_interval(protocol: Protocol) -> Duration {
    match protocol {
        Protocol::Gcm | Protocol::Moz => Duration::from_millis(10),
        Protocol::Apns => Duration::from_millis(33),
    }
}

/// Registered with the distributor while a poll loop runs.
///
/// Its presence in the service slot is what makes the protocol "running".
#[derive(Debug)]
pub struct PollHandle {
    shutdown: oneshot::Sender<()>,
}

impl PollHandle {
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (shutdown, receiver) = oneshot::channel();
        (Self { shutdown }, receiver)
    }

    /// Ask the loop to finish its current tick and exit.
    pub(crate) fn shutdown(self) {
        // The loop may already have stopped itself.
        let _ = self.shutdown.send(());
    }
}

pub(crate) struct PollLoop {
    protocol: Protocol,
    shared: Arc<Shared>,
    slot: Arc<ServiceSlot>,
    channel: Box<dyn Channel>,
}

impl PollLoop {
    pub(crate) fn new(
        shared: Arc<Shared>,
        slot: Arc<ServiceSlot>,
        channel: Box<dyn Channel>,
    ) -> Self {
        Self {
            protocol: slot.protocol(),
            shared,
            slot,
            channel,
        }
    }

    /// Tick until shut down or until the gateway rejects our credentials,
    /// then close the channel.
    pub(crate) async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = interval(tick_interval(self.protocol));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    internal!("{} poll loop received shutdown signal", self.protocol);
                    break;
                }
                _ = ticker.tick() => {
                    if self.tick().await == Flow::Halt {
                        tracing::warn!(
                            protocol = %self.protocol,
                            "Authentication failed, stopping worker"
                        );
                        // Unregister ourselves unless a stop is already under way.
                        drop(self.slot.take_poll());
                        break;
                    }
                }
            }
        }

        self.close().await;
    }

    /// Promote ready delayed messages, then drain the sendable list.
    async fn tick(&mut self) -> Flow {
        match self.slot.queue.check_delayed_messages(LockWait::Default) {
            Ok(0) => {}
            Ok(promoted) => {
                tracing::debug!(protocol = %self.protocol, promoted, "Promoted delayed messages");
            }
            Err(err) => {
                tracing::error!(protocol = %self.protocol, error = %err, "Unable to promote delayed messages");
            }
        }

        loop {
            let message = match self.slot.queue.shift(LockWait::Default) {
                Ok(Some(message)) => message,
                Ok(None) => return Flow::Continue,
                Err(err) => {
                    tracing::error!(protocol = %self.protocol, error = %err, "Unable to shift message");
                    return Flow::Continue;
                }
            };

            let attempt =
                AssertUnwindSafe(delivery::deliver(self.channel.as_mut(), &self.shared, message))
                    .catch_unwind()
                    .await;

            match attempt {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return Flow::Halt,
                Err(panic) => {
                    tracing::error!(
                        protocol = %self.protocol,
                        error = panic_message(panic.as_ref()),
                        "Error while processing message"
                    );
                }
            }
        }
    }

    async fn close(&mut self) {
        match self.channel.close().await {
            Ok(()) => self.shared.emit(DistributorEvent::Stopped(self.protocol)),
            Err(err) => {
                tracing::error!(protocol = %self.protocol, error = %err, "Unable to close channel");
                self.shared.emit(DistributorEvent::StopError {
                    protocol: self.protocol,
                    reason: err.to_string(),
                });
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
