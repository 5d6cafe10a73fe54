//! Subscription-push gateway channel.
//!
//! Every subscription gets its own `POST <server><subscription>` request.

use async_trait::async_trait;
use herald_common::{Protocol, outgoing};
use reqwest::{Client, Response};
use serde::Deserialize;

use super::{Channel, ChannelSettings, Connector, DeliveryUnit, RecipientOutcome, mismatched};
use crate::{
    config::{MozConfig, ServiceConfig},
    error::ChannelError,
    message::Payload,
};

/// Gateway error numbers meaning "try again later"
const RETRYABLE_ERRNOS: [u64; 2] = [202, 503];

/// Opens [`MozChannel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct MozConnector;

#[async_trait]
impl Connector for MozConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Moz
    }

    async fn open(
        &self,
        config: &ServiceConfig,
        settings: ChannelSettings,
    ) -> Result<Box<dyn Channel>, ChannelError> {
        let ServiceConfig::Moz(config) = config else {
            return Err(mismatched(Protocol::Moz, config));
        };
        Ok(Box::new(MozChannel::new(config, settings)?))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GatewayError {
    errno: Option<u64>,
    message: Option<String>,
}

impl GatewayError {
    async fn read(response: Response) -> Self {
        let body = response.text().await.unwrap_or_default();
        serde_json::from_str(&body).unwrap_or_default()
    }

    fn describe(&self, status: u16) -> String {
        match (self.errno, &self.message) {
            (Some(errno), Some(message)) => format!("{status}/{errno}: {message}"),
            (Some(errno), None) => format!("{status}/{errno}"),
            (None, Some(message)) => format!("{status}: {message}"),
            (None, None) => status.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct MozChannel {
    client: Client,
    server: String,
}

impl MozChannel {
    /// # Errors
    ///
    /// Returns [`ChannelError::Channel`] if the HTTP client cannot be built.
    pub fn new(config: &MozConfig, settings: ChannelSettings) -> Result<Self, ChannelError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| ChannelError::Channel(format!("Failed to create HTTP client: {err}")))?;

        Ok(Self {
            client,
            server: config.server.clone(),
        })
    }

    async fn push(
        &self,
        subscription: &str,
        body: Option<&str>,
        time_to_live: Option<u32>,
    ) -> Result<RecipientOutcome, ChannelError> {
        let url = format!("{}{subscription}", self.server);
        outgoing!("POST {}", url);

        let mut request = self.client.post(&url);
        if let Some(ttl) = time_to_live {
            request = request.header("TTL", ttl.to_string());
        }
        if let Some(body) = body {
            request = request.body(body.to_owned());
        }
        let response = request
            .send()
            .await
            .map_err(|err| ChannelError::ConnectionFailed(err.to_string()))?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(RecipientOutcome::Delivered);
        }

        let error = GatewayError::read(response).await;
        tracing::debug!(
            subscription,
            reason = %error.describe(status),
            "Gateway rejected push"
        );

        match status {
            401 => Err(ChannelError::AuthenticationFailed(error.describe(status))),
            400 | 413 => Err(ChannelError::MalformedRequest(error.describe(status))),
            404 | 410 => Ok(RecipientOutcome::PermanentlyInvalid),
            503 if error.errno.is_some_and(|errno| RETRYABLE_ERRNOS.contains(&errno)) => {
                Ok(RecipientOutcome::Unavailable)
            }
            _ => Ok(RecipientOutcome::Unclassified(error.describe(status))),
        }
    }
}

#[async_trait]
impl Channel for MozChannel {
    async fn deliver(
        &mut self,
        unit: &DeliveryUnit<'_>,
    ) -> Result<Vec<RecipientOutcome>, ChannelError> {
        let Payload::Moz(payload) = unit.payload else {
            return Err(ChannelError::MalformedRequest(format!(
                "{} payload sent to the moz channel",
                unit.payload.protocol()
            )));
        };
        let body = payload.body();

        let mut outcomes = Vec::with_capacity(unit.recipients.len());
        for subscription in &unit.recipients {
            outcomes.push(
                self.push(subscription, body.as_deref(), unit.time_to_live)
                    .await?,
            );
        }
        Ok(outcomes)
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}
