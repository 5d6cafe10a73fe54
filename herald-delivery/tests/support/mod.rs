//! Shared helpers for herald-delivery integration tests
#![allow(dead_code)]

pub mod mock_gateway;

use std::time::Duration;

use herald_common::Protocol;
use herald_delivery::{
    Connectors, DistributorEvent, DistributorOptions, Message, MessageDistributor,
    MessageOptions, config::GcmOptions,
};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};

pub use self::mock_gateway::{MockGateway, Reply};

/// Options for a testmode distributor serving only gcm.
pub fn gcm_options() -> DistributorOptions {
    DistributorOptions {
        testmode: true,
        state_timeout_ms: 1000,
        gcm: Some(GcmOptions::default()),
        ..DistributorOptions::default()
    }
}

/// A distributor whose gcm worker talks to `gateway`.
pub async fn gcm_distributor(gateway: &MockGateway) -> MessageDistributor {
    MessageDistributor::new(
        "test",
        gcm_options(),
        Connectors::empty().with(gateway.connector(Protocol::Gcm)),
    )
    .await
    .expect("distributor should initialise")
}

/// A gcm message for `recipients` configured from `options`.
pub fn gcm_message(recipients: &[&str], options: MessageOptions) -> Message {
    let options = MessageOptions {
        recipients: recipients.iter().map(ToString::to_string).collect(),
        ..options
    };
    Message::create(Protocol::Gcm, json!({"title": "hello"}), &options)
        .expect("message should build")
}

/// Wait for the next distributor event, skipping over lag.
pub async fn next_event(events: &mut broadcast::Receiver<DistributorEvent>) -> DistributorEvent {
    loop {
        match tokio::time::timeout(Duration::from_secs(120), events.recv()).await {
            Ok(Ok(event)) => return event,
            Ok(Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) => panic!("event channel closed"),
            Err(_) => panic!("timed out waiting for a distributor event"),
        }
    }
}

/// Collect events up to and including the first one matching `done`.
pub async fn collect_until(
    events: &mut broadcast::Receiver<DistributorEvent>,
    done: impl Fn(&DistributorEvent) -> bool,
) -> Vec<DistributorEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}
