//! Per-protocol workers
//!
//! Each configured protocol gets one worker task that receives lifecycle
//! commands from the distributor. A running worker owns a [`PollLoop`]
//! that drains the protocol's queue every few milliseconds.

pub mod delivery;
pub mod poll;

use std::sync::Arc;

use herald_common::{Protocol, internal};
use parking_lot::Mutex;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

pub use self::poll::{PollHandle, tick_interval};
use self::poll::PollLoop;
use crate::{
    channel::{ChannelSettings, Connector},
    config::ServiceConfig,
    distributor::{ServiceSlot, Shared},
    event::DistributorEvent,
    latch::InitLatch,
};

/// Lifecycle commands sent by the distributor.
pub(crate) enum WorkerCommand {
    Init {
        shared: Arc<Shared>,
        config: ServiceConfig,
        ack: InitAck,
    },
    Start,
    Stop,
    Shutdown,
}

/// Reports the outcome of an init command back to the waiting distributor.
pub(crate) struct InitAck {
    latch: Arc<InitLatch>,
    failed: Arc<Mutex<Vec<Protocol>>>,
}

impl InitAck {
    pub(crate) const fn new(latch: Arc<InitLatch>, failed: Arc<Mutex<Vec<Protocol>>>) -> Self {
        Self { latch, failed }
    }

    fn success(self) {
        self.latch.count_down();
    }

    fn failure(self, protocol: Protocol) {
        self.failed.lock().push(protocol);
        self.latch.count_down();
    }
}

/// Everything a worker learns from its init command.
struct Bound {
    shared: Arc<Shared>,
    slot: Arc<ServiceSlot>,
    config: ServiceConfig,
}

pub(crate) struct Worker {
    protocol: Protocol,
    connector: Arc<dyn Connector>,
    settings: ChannelSettings,
    bound: Option<Bound>,
    poll_task: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn an uninitialised worker and return its command sender.
    pub(crate) fn spawn(
        protocol: Protocol,
        connector: Arc<dyn Connector>,
        settings: ChannelSettings,
    ) -> UnboundedSender<WorkerCommand> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = Self {
            protocol,
            connector,
            settings,
            bound: None,
            poll_task: None,
        };
        tokio::spawn(worker.run(receiver));
        sender
    }

    async fn run(mut self, mut commands: UnboundedReceiver<WorkerCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                WorkerCommand::Init {
                    shared,
                    config,
                    ack,
                } => self.init(shared, config, ack),
                WorkerCommand::Start => self.start().await,
                WorkerCommand::Stop => self.stop().await,
                WorkerCommand::Shutdown => {
                    self.stop().await;
                    break;
                }
            }
        }

        internal!("{} worker exited", self.protocol);
    }

    fn init(&mut self, shared: Arc<Shared>, config: ServiceConfig, ack: InitAck) {
        if config.protocol() != self.protocol {
            tracing::error!(
                protocol = %self.protocol,
                config = %config.protocol(),
                "Unable to initialise worker with another protocol's configuration"
            );
            ack.failure(self.protocol);
            return;
        }

        let Some(slot) = shared.slot(self.protocol) else {
            tracing::error!(
                protocol = %self.protocol,
                "Unable to initialise worker without a service slot"
            );
            ack.failure(self.protocol);
            return;
        };

        self.bound = Some(Bound {
            shared,
            slot,
            config,
        });
        internal!("{} worker initialised", self.protocol);
        ack.success();
    }

    async fn start(&mut self) {
        let Some(bound) = &self.bound else {
            tracing::warn!(protocol = %self.protocol, "Start received before init, ignoring");
            return;
        };

        if bound.slot.is_running() {
            tracing::warn!(protocol = %self.protocol, "Worker already running");
            return;
        }

        let channel = match self.connector.open(&bound.config, self.settings).await {
            Ok(channel) => channel,
            Err(err) => {
                tracing::error!(protocol = %self.protocol, error = %err, "Unable to open channel");
                return;
            }
        };

        let (handle, shutdown) = PollHandle::new();
        bound.slot.register_poll(handle);
        bound.shared.emit(DistributorEvent::Started(self.protocol));

        let poll = PollLoop::new(Arc::clone(&bound.shared), Arc::clone(&bound.slot), channel);
        self.poll_task = Some(tokio::spawn(poll.run(shutdown)));

        internal!(level = DEBUG, "Successfully started {} worker", self.protocol);
    }

    async fn stop(&mut self) {
        let Some(bound) = &self.bound else {
            return;
        };

        let Some(handle) = bound.slot.take_poll() else {
            self.poll_task = None;
            internal!(level = DEBUG, "{} worker isn't running", self.protocol);
            return;
        };

        handle.shutdown();
        if let Some(task) = self.poll_task.take() {
            if let Err(err) = task.await {
                tracing::error!(protocol = %self.protocol, error = %err, "Poll loop ended abnormally");
            }
        }

        internal!(level = DEBUG, "Successfully stopped {} worker", self.protocol);
    }
}
