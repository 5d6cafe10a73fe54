//! Scripted push gateway for testing workers without a network
//!
//! Each call to `deliver` consumes the next scripted [`Reply`]; once the
//! script is exhausted the fallback reply is used. Every unit handed to the
//! channel is recorded for later inspection.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use herald_common::Protocol;
use herald_delivery::{
    Channel, ChannelError, ChannelSettings, Connector, DeliveryUnit, RecipientOutcome,
    ServiceConfig,
};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub enum Reply {
    /// Every recipient delivered
    Accept,
    Outcomes(Vec<RecipientOutcome>),
    Reject(ChannelError),
    Panic,
}

/// A unit as the gateway received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub recipients: Vec<String>,
    pub time_to_live: Option<u32>,
}

#[derive(Debug)]
struct State {
    script: VecDeque<Reply>,
    fallback: Reply,
    received: Vec<Received>,
    opened: usize,
    closed: usize,
    fail_open: bool,
    fail_close: bool,
}

#[derive(Debug, Clone)]
pub struct MockGateway {
    state: Arc<Mutex<State>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                script: VecDeque::new(),
                fallback: Reply::Accept,
                received: Vec::new(),
                opened: 0,
                closed: 0,
                fail_open: false,
                fail_close: false,
            })),
        }
    }

    /// Queue a reply for the next unscripted `deliver` call.
    pub fn then(&self, reply: Reply) -> &Self {
        self.state.lock().script.push_back(reply);
        self
    }

    /// Reply used once the script is exhausted.
    pub fn otherwise(&self, reply: Reply) -> &Self {
        self.state.lock().fallback = reply;
        self
    }

    pub fn fail_open(&self) -> &Self {
        self.state.lock().fail_open = true;
        self
    }

    pub fn fail_close(&self) -> &Self {
        self.state.lock().fail_close = true;
        self
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.lock().received.clone()
    }

    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }

    pub fn connector(&self, protocol: Protocol) -> MockConnector {
        MockConnector {
            protocol,
            gateway: self.clone(),
        }
    }
}

pub struct MockConnector {
    protocol: Protocol,
    gateway: MockGateway,
}

#[async_trait]
impl Connector for MockConnector {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn open(
        &self,
        _config: &ServiceConfig,
        _settings: ChannelSettings,
    ) -> Result<Box<dyn Channel>, ChannelError> {
        let mut state = self.gateway.state.lock();
        if state.fail_open {
            return Err(ChannelError::ConnectionFailed("scripted open failure".to_string()));
        }
        state.opened += 1;
        drop(state);

        Ok(Box::new(MockChannel {
            gateway: self.gateway.clone(),
        }))
    }
}

struct MockChannel {
    gateway: MockGateway,
}

#[async_trait]
impl Channel for MockChannel {
    async fn deliver(
        &mut self,
        unit: &DeliveryUnit<'_>,
    ) -> Result<Vec<RecipientOutcome>, ChannelError> {
        let reply = {
            let mut state = self.gateway.state.lock();
            state.received.push(Received {
                recipients: unit.recipients.clone(),
                time_to_live: unit.time_to_live,
            });
            state
                .script
                .pop_front()
                .unwrap_or_else(|| state.fallback.clone())
        };

        match reply {
            Reply::Accept => Ok(vec![RecipientOutcome::Delivered; unit.recipients.len()]),
            Reply::Outcomes(outcomes) => Ok(outcomes),
            Reply::Reject(err) => Err(err),
            Reply::Panic => panic!("scripted gateway panic"),
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        let mut state = self.gateway.state.lock();
        state.closed += 1;
        if state.fail_close {
            return Err(ChannelError::Channel("scripted close failure".to_string()));
        }
        Ok(())
    }
}
