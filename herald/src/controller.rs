use std::time::Duration;

use herald_common::{Protocol, internal, logging};
use herald_delivery::{
    Connectors, DistributorEvent, DistributorOptions, MessageDistributor, ServiceState,
};
use serde::Deserialize;
use tokio::{
    io::{self, BufReader},
    signal::unix::{SignalKind, signal},
    sync::broadcast::{self, error::RecvError},
};

use crate::request;

/// How often the queues are checked while draining after end of input
const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// Top level configuration, deserialised from `herald.config.ron`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Herald {
    namespace: String,
    #[serde(alias = "options")]
    distributor: DistributorOptions,
}

impl Default for Herald {
    fn default() -> Self {
        Self {
            namespace: "herald".to_string(),
            distributor: DistributorOptions::default(),
        }
    }
}

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    };

    Ok(())
}

/// Wait until every running service has emptied its queue.
///
/// Messages queued for a stopped service are left where they are.
async fn drain(distributor: &MessageDistributor) {
    loop {
        let pending = distributor
            .status()
            .services
            .into_iter()
            .filter(|(_, state)| *state == ServiceState::Running)
            .filter_map(|(protocol, _)| distributor.pending(protocol))
            .sum::<usize>();
        if pending == 0 {
            break;
        }
        tokio::time::sleep(DRAIN_INTERVAL).await;
    }

    let stranded = distributor
        .protocols()
        .filter_map(|protocol| distributor.pending(protocol))
        .sum::<usize>();
    if stranded > 0 {
        internal!(
            level = WARN,
            "Leaving {} messages queued for stopped services",
            stranded
        );
    }
}

async fn report(mut events: broadcast::Receiver<DistributorEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Event reporter fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &DistributorEvent) {
    match event {
        DistributorEvent::Error400(_)
        | DistributorEvent::Error401(_)
        | DistributorEvent::Error500(_)
        | DistributorEvent::ErrorConnect { .. }
        | DistributorEvent::StopError { .. }
        | DistributorEvent::Failed { .. } => tracing::warn!(
            protocol = %event.protocol(),
            event = event.name(),
            "{event:?}"
        ),
        _ => tracing::info!(
            protocol = %event.protocol(),
            event = event.name(),
            "{event:?}"
        ),
    }
}

impl Herald {
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub const fn options(&self) -> &DistributorOptions {
        &self.distributor
    }

    /// Run the distributor until standard input is exhausted and every queue
    /// has drained, or until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// This function will return an error if the distributor cannot be
    /// configured, started or stopped.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let distributor =
            MessageDistributor::new(self.namespace, self.distributor, Connectors::default())
                .await?;
        let reporter = tokio::spawn(report(distributor.subscribe()));

        distributor.start().await?;
        internal!(level = INFO, "Herald running: {:?}", distributor.status());

        let ret = tokio::select! {
            r = async {
                let accepted = request::feed(&distributor, BufReader::new(io::stdin())).await?;
                internal!(level = INFO, "End of input after {} accepted requests", accepted);
                drain(&distributor).await;
                Ok::<(), anyhow::Error>(())
            } => {
                r
            }
            r = shutdown() => {
                r
            }
        };

        internal!(level = INFO, "Shutting down...");

        let stopped = distributor.stop().await;
        reporter.abort();

        ret?;
        Ok(stopped?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use herald_delivery::{Message, MessageOptions, config::GcmOptions};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    async fn idle_gcm_distributor() -> MessageDistributor {
        let options = DistributorOptions {
            testmode: true,
            gcm: Some(GcmOptions::default()),
            ..DistributorOptions::default()
        };
        MessageDistributor::new("drain", options, Connectors::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let herald: Herald = ron::from_str("()").unwrap();
        assert_eq!(herald, Herald::default());
        assert_eq!(herald.namespace(), "herald");
        assert!(herald.options().gcm.is_none());
    }

    #[test]
    fn test_sample_config_parses() {
        let herald: Herald = ron::from_str(include_str!("../../herald.config.ron")).unwrap();

        assert_eq!(herald.namespace(), "herald");
        assert!(herald.options().testmode);
        assert!(herald.options().gcm.is_some());
        assert!(herald.options().moz.is_some());
        assert!(herald.options().apns.is_none());
        assert_eq!(herald.options().resolve().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_returns_when_nothing_is_pending() {
        let distributor = idle_gcm_distributor().await;
        tokio::time::timeout(Duration::from_secs(1), drain(&distributor))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_skips_stopped_services() {
        let distributor = idle_gcm_distributor().await;
        let options = MessageOptions {
            recipients: vec!["a".to_string()],
            ..MessageOptions::default()
        };
        distributor
            .send_message(Message::create(Protocol::Gcm, json!("hello"), &options).unwrap())
            .unwrap();
        assert_eq!(distributor.pending(Protocol::Gcm), Some(1));

        tokio::time::timeout(Duration::from_secs(1), drain(&distributor))
            .await
            .unwrap();
        assert_eq!(distributor.pending(Protocol::Gcm), Some(1));
    }
}
