//! Queueing, retry and dispatch engine for push notifications
//!
//! This crate provides functionality to:
//! - Hold messages until their delay elapses ([`queue::DelayQueue`])
//! - Queue messages per protocol behind a bounded-wait lock ([`MessageQueue`])
//! - Derive retry clones with escalating delay, bounded by time to live and
//!   retry budget ([`Message`])
//! - Drain each protocol's queue with a dedicated worker and translate gateway
//!   responses into reschedule, drop or halt decisions
//! - Orchestrate the workers and report outcomes as events ([`MessageDistributor`])

pub mod channel;
pub mod config;
mod distributor;
pub mod error;
pub mod event;
mod latch;
pub mod message;
pub mod policy;
mod processor;
pub mod queue;

// Re-export channel types
pub use channel::{
    Channel, ChannelSettings, Connector, Connectors, DeliveryUnit, GcmConnector, MozConnector,
    RecipientOutcome,
};
// Re-export configuration types
pub use config::{DistributorOptions, ServiceConfig};
// Re-export core types
pub use distributor::{Aggregate, MessageDistributor, ServiceState, Status};
// Re-export error types
pub use error::{ChannelError, ConfigError, DistributorError, MessageError, QueueError};
pub use event::{DistributorEvent, MessageEvent};
pub use latch::InitLatch;
pub use message::{Message, MessageOptions, Payload, RemainingTtl};
pub use processor::tick_interval;
pub use queue::{LockWait, MessageQueue};
