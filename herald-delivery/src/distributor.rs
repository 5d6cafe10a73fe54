//! The orchestrator: one queue and one worker per configured protocol.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use herald_common::{Protocol, internal};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc::UnboundedSender};

use crate::{
    channel::Connectors,
    config::DistributorOptions,
    error::{ConfigError, DistributorError},
    event::DistributorEvent,
    latch::InitLatch,
    message::{Message, MessageOptions},
    processor::{InitAck, PollHandle, Worker, WorkerCommand},
    queue::{LockWait, MessageQueue},
};

const EVENT_CAPACITY: usize = 1024;

/// Number of status checks `start`/`stop` make before giving up
const STATE_CHECKS: u32 = 100;

/// Queue, worker and poll registration of one protocol.
///
/// Fixed at construction; only the poll registration changes afterwards,
/// and only the protocol's own worker or poll loop changes it.
pub(crate) struct ServiceSlot {
    protocol: Protocol,
    pub(crate) queue: MessageQueue,
    poll: Mutex<Option<PollHandle>>,
    commands: UnboundedSender<WorkerCommand>,
}

impl ServiceSlot {
    pub(crate) const fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub(crate) fn is_running(&self) -> bool {
        self.poll.lock().is_some()
    }

    pub(crate) fn register_poll(&self, handle: PollHandle) {
        *self.poll.lock() = Some(handle);
    }

    pub(crate) fn take_poll(&self) -> Option<PollHandle> {
        self.poll.lock().take()
    }
}

/// State shared between the distributor, its workers and their poll loops.
pub(crate) struct Shared {
    namespace: String,
    testmode: bool,
    services: BTreeMap<Protocol, Arc<ServiceSlot>>,
    events: broadcast::Sender<DistributorEvent>,
}

impl Shared {
    pub(crate) fn slot(&self, protocol: Protocol) -> Option<Arc<ServiceSlot>> {
        self.services.get(&protocol).cloned()
    }

    pub(crate) const fn testmode(&self) -> bool {
        self.testmode
    }

    pub(crate) fn emit(&self, event: DistributorEvent) {
        tracing::debug!(
            namespace = %self.namespace,
            protocol = %event.protocol(),
            event = event.name(),
            "Distributor event"
        );
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn send_message(&self, message: Message) -> Result<(), DistributorError> {
        if !message.is_sendable() {
            return Err(DistributorError::NotSendable);
        }

        let protocol = message.protocol();
        let Some(slot) = self.services.get(&protocol) else {
            tracing::warn!(
                namespace = %self.namespace,
                protocol = %protocol,
                "Tried to send message for unconfigured service"
            );
            return Ok(());
        };

        let delay = message.effective_delay();
        slot.queue.add(message, delay, LockWait::Default)?;
        Ok(())
    }
}

/// Whether a protocol's poll loop is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Running,
    Stopped,
}

/// Summary over every configured protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Running,
    Stopped,
    /// Some protocols are running and some are not
    Mixed,
}

impl From<ServiceState> for Aggregate {
    fn from(state: ServiceState) -> Self {
        match state {
            ServiceState::Running => Self::Running,
            ServiceState::Stopped => Self::Stopped,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Mixed => "mixed",
        })
    }
}

/// Snapshot returned by [`MessageDistributor::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub services: BTreeMap<Protocol, ServiceState>,
    /// `None` when no protocol is configured
    pub all: Option<Aggregate>,
}

impl Status {
    fn from_services(services: BTreeMap<Protocol, ServiceState>) -> Self {
        let all = services.values().fold(None, |all, state| match all {
            None => Some(Aggregate::from(*state)),
            Some(all) if all == Aggregate::from(*state) => Some(all),
            Some(_) => Some(Aggregate::Mixed),
        });
        Self { services, all }
    }

    /// Every configured protocol is in `state`.
    #[must_use]
    pub fn all_in(&self, state: ServiceState) -> bool {
        self.all.is_none_or(|all| all == Aggregate::from(state))
    }
}

/// Routes messages to per-protocol queues and manages the workers that
/// drain them.
///
/// Dropping the distributor shuts every worker down.
pub struct MessageDistributor {
    shared: Arc<Shared>,
    state_timeout: Duration,
}

impl MessageDistributor {
    /// Validate `options`, spawn a worker for every configured protocol and
    /// wait for all of them to initialise.
    ///
    /// # Errors
    ///
    /// - [`DistributorError::Config`] if an option is missing or invalid, or
    ///   a configured protocol has no connector in `connectors`
    /// - [`DistributorError::InitTimeout`] / [`DistributorError::InitFailed`]
    ///   if the workers did not all acknowledge in time
    pub async fn new(
        namespace: impl Into<String>,
        options: DistributorOptions,
        connectors: Connectors,
    ) -> Result<Self, DistributorError> {
        let namespace = namespace.into();
        let configs = options.resolve()?;

        let mut resolved = Vec::with_capacity(configs.len());
        for config in configs {
            let protocol = config.protocol();
            let connector = connectors
                .get(protocol)
                .ok_or(ConfigError::UnresolvedConnector(protocol))?;
            resolved.push((config, connector));
        }

        let settings = options.channel_settings();
        let mut services = BTreeMap::new();
        let mut pending = Vec::with_capacity(resolved.len());
        for (config, connector) in resolved {
            let protocol = config.protocol();
            internal!(level = INFO, "Starting service {}", protocol);

            let slot = ServiceSlot {
                protocol,
                queue: MessageQueue::new(namespace.clone()),
                poll: Mutex::new(None),
                commands: Worker::spawn(protocol, connector, settings),
            };
            services.insert(protocol, Arc::new(slot));
            pending.push((protocol, config));
        }

        let distributor = Self {
            shared: Arc::new(Shared {
                namespace,
                testmode: options.testmode,
                services,
                events: broadcast::channel(EVENT_CAPACITY).0,
            }),
            state_timeout: options.state_timeout(),
        };

        let latch = Arc::new(InitLatch::new(pending.len()));
        let failed = Arc::new(Mutex::new(Vec::new()));
        internal!(level = INFO, "Waiting for {} services", pending.len());

        for (protocol, config) in pending {
            distributor.command(
                protocol,
                WorkerCommand::Init {
                    shared: Arc::clone(&distributor.shared),
                    config,
                    ack: InitAck::new(Arc::clone(&latch), Arc::clone(&failed)),
                },
            )?;
        }

        let init_timeout = options.init_timeout();
        if !latch.wait(init_timeout).await {
            return Err(DistributorError::InitTimeout(init_timeout));
        }

        let failed = std::mem::take(&mut *failed.lock());
        if !failed.is_empty() {
            return Err(DistributorError::InitFailed(failed));
        }

        Ok(distributor)
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    /// Protocols this distributor serves.
    pub fn protocols(&self) -> impl Iterator<Item = Protocol> + '_ {
        self.shared.services.keys().copied()
    }

    fn command(&self, protocol: Protocol, command: WorkerCommand) -> Result<(), DistributorError> {
        self.shared
            .slot(protocol)
            .ok_or(DistributorError::WorkerGone(protocol))?
            .commands
            .send(command)
            .map_err(|_| DistributorError::WorkerGone(protocol))
    }

    fn broadcast(&self, command: fn() -> WorkerCommand) -> Result<(), DistributorError> {
        for protocol in self.shared.services.keys() {
            self.command(*protocol, command())?;
        }
        Ok(())
    }

    async fn wait_for_all(&self, state: ServiceState) -> bool {
        let step = self.state_timeout / STATE_CHECKS;
        for _ in 0..STATE_CHECKS {
            if self.status().all_in(state) {
                return true;
            }
            tokio::time::sleep(step).await;
        }
        self.status().all_in(state)
    }

    /// Start every worker and wait until all of them are running.
    ///
    /// # Errors
    ///
    /// On timeout the workers that did start are stopped again and
    /// [`DistributorError::StartupTimeout`] is returned, or
    /// [`DistributorError::StartupAborted`] if stopping them failed too.
    pub async fn start(&self) -> Result<(), DistributorError> {
        self.broadcast(|| WorkerCommand::Start)?;
        if self.wait_for_all(ServiceState::Running).await {
            internal!(level = INFO, "Distributor {} started", self.namespace());
            return Ok(());
        }

        match self.stop().await {
            Ok(()) => Err(DistributorError::StartupTimeout),
            Err(_) => Err(DistributorError::StartupAborted),
        }
    }

    /// Stop every worker and wait until none is running.
    ///
    /// # Errors
    ///
    /// Returns [`DistributorError::StopTimeout`] if a worker is still running
    /// once the state timeout elapsed.
    pub async fn stop(&self) -> Result<(), DistributorError> {
        self.broadcast(|| WorkerCommand::Stop)?;
        if self.wait_for_all(ServiceState::Stopped).await {
            internal!(level = INFO, "Distributor {} stopped", self.namespace());
            Ok(())
        } else {
            Err(DistributorError::StopTimeout)
        }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        Status::from_services(
            self.shared
                .services
                .iter()
                .map(|(protocol, slot)| {
                    let state = if slot.is_running() {
                        ServiceState::Running
                    } else {
                        ServiceState::Stopped
                    };
                    (*protocol, state)
                })
                .collect(),
        )
    }

    /// Queue `message` for its protocol, honouring its delay.
    ///
    /// A message for a protocol this distributor does not serve is dropped
    /// with a warning.
    ///
    /// # Errors
    ///
    /// - [`DistributorError::NotSendable`] if the message has no recipients
    /// - [`DistributorError::Queue`] if the queue lock could not be acquired;
    ///   the message was not accepted and may be sent again
    pub fn send_message(&self, message: Message) -> Result<(), DistributorError> {
        self.shared.send_message(message)
    }

    /// Build a message for `protocol` without naming protocol specific types.
    ///
    /// # Errors
    ///
    /// Returns [`DistributorError::Message`] if `data` or `options` are invalid.
    pub fn create_message(
        &self,
        protocol: Protocol,
        data: Value,
        options: &MessageOptions,
    ) -> Result<Message, DistributorError> {
        internal!("createMessage for platform {}", protocol);
        Ok(Message::create(protocol, data, options)?)
    }

    /// Listen for protocol scoped events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DistributorEvent> {
        self.shared.events.subscribe()
    }

    /// Messages waiting in `protocol`'s queue, `None` if it is not configured.
    #[must_use]
    pub fn pending(&self, protocol: Protocol) -> Option<usize> {
        self.shared.slot(protocol).map(|slot| slot.queue.total())
    }
}

impl fmt::Debug for MessageDistributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDistributor")
            .field("namespace", &self.shared.namespace)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Drop for MessageDistributor {
    fn drop(&mut self) {
        for slot in self.shared.services.values() {
            // The worker may already be gone.
            let _ = slot.commands.send(WorkerCommand::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn status(states: &[(Protocol, ServiceState)]) -> Status {
        Status::from_services(states.iter().copied().collect())
    }

    #[test]
    fn test_status_aggregate() {
        let all_running = status(&[
            (Protocol::Gcm, ServiceState::Running),
            (Protocol::Moz, ServiceState::Running),
        ]);
        assert_eq!(all_running.all, Some(Aggregate::Running));
        assert!(all_running.all_in(ServiceState::Running));

        let mixed = status(&[
            (Protocol::Gcm, ServiceState::Running),
            (Protocol::Moz, ServiceState::Stopped),
        ]);
        assert_eq!(mixed.all, Some(Aggregate::Mixed));
        assert!(!mixed.all_in(ServiceState::Running));
        assert!(!mixed.all_in(ServiceState::Stopped));

        let empty = status(&[]);
        assert_eq!(empty.all, None);
        assert!(empty.all_in(ServiceState::Stopped));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ServiceState::Running.to_string(), "running");
        assert_eq!(Aggregate::Mixed.to_string(), "mixed");
    }
}
