//! HTTP JSON push gateway channel.

use async_trait::async_trait;
use herald_common::{Protocol, outgoing};
use reqwest::{Client, Response, StatusCode, Url, header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    Channel, ChannelSettings, Connector, DeliveryUnit, RecipientOutcome, RetryAfter, mismatched,
};
use crate::{
    config::{GcmConfig, ServiceConfig},
    error::ChannelError,
    message::Payload,
};

/// Opens [`GcmChannel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcmConnector;

#[async_trait]
impl Connector for GcmConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Gcm
    }

    async fn open(
        &self,
        config: &ServiceConfig,
        settings: ChannelSettings,
    ) -> Result<Box<dyn Channel>, ChannelError> {
        let ServiceConfig::Gcm(config) = config else {
            return Err(mismatched(Protocol::Gcm, config));
        };
        Ok(Box::new(GcmChannel::new(config, settings)?))
    }
}

#[derive(Debug, Serialize)]
struct GcmRequest<'a> {
    registration_ids: &'a [String],
    data: &'a Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    collapse_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    restricted_package_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delay_while_idle: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_to_live: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dry_run: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GcmResponse {
    failure: u64,
    canonical_ids: u64,
    results: Vec<GcmResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GcmResult {
    message_id: Option<String>,
    registration_id: Option<String>,
    error: Option<String>,
}

impl GcmResult {
    fn outcome(self) -> RecipientOutcome {
        let Self {
            message_id,
            registration_id,
            error,
        } = self;

        if let (Some(_), Some(replacement)) = (message_id, registration_id) {
            return RecipientOutcome::Replaced(replacement);
        }

        match error.as_deref() {
            None => RecipientOutcome::Delivered,
            Some("Unavailable") => RecipientOutcome::Unavailable,
            Some("NotRegistered") => RecipientOutcome::PermanentlyInvalid,
            Some(code) => RecipientOutcome::Unclassified(code.to_string()),
        }
    }
}

/// Posts JSON requests to the gateway, authorised with `key=<api key>`.
#[derive(Debug)]
pub struct GcmChannel {
    client: Client,
    server: Url,
    authorization: String,
    dry_run: bool,
}

impl GcmChannel {
    /// # Errors
    ///
    /// Returns [`ChannelError::Channel`] if the HTTP client cannot be built.
    pub fn new(config: &GcmConfig, settings: ChannelSettings) -> Result<Self, ChannelError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| ChannelError::Channel(format!("Failed to create HTTP client: {err}")))?;

        Ok(Self {
            client,
            server: config.server.clone(),
            authorization: format!("key={}", config.api_key),
            dry_run: settings.testmode,
        })
    }

    async fn body(response: Response) -> String {
        response.text().await.unwrap_or_default()
    }
}

#[async_trait]
impl Channel for GcmChannel {
    async fn deliver(
        &mut self,
        unit: &DeliveryUnit<'_>,
    ) -> Result<Vec<RecipientOutcome>, ChannelError> {
        let Payload::Gcm(payload) = unit.payload else {
            return Err(ChannelError::MalformedRequest(format!(
                "{} payload sent to the gcm channel",
                unit.payload.protocol()
            )));
        };

        let request = GcmRequest {
            registration_ids: &unit.recipients,
            data: &payload.data,
            collapse_key: payload.collapse_key.as_deref(),
            restricted_package_name: payload.restricted_package_name.as_deref(),
            delay_while_idle: payload.delay_while_idle,
            time_to_live: unit.time_to_live,
            dry_run: if self.dry_run {
                Some(true)
            } else {
                payload.dry_run
            },
        };

        outgoing!(
            "POST {} for {} recipients",
            self.server,
            unit.recipients.len()
        );

        let response = self
            .client
            .post(self.server.clone())
            .header(header::AUTHORIZATION, &self.authorization)
            .json(&request)
            .send()
            .await
            .map_err(|err| ChannelError::ConnectionFailed(err.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::BAD_REQUEST => Err(ChannelError::MalformedRequest(
                Self::body(response).await,
            )),
            StatusCode::UNAUTHORIZED => Err(ChannelError::AuthenticationFailed(
                Self::body(response).await,
            )),
            status if status.is_server_error() => {
                let retry_after = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(RetryAfter::parse);
                Err(ChannelError::ProviderOverloaded {
                    reason: status.to_string(),
                    retry_after,
                })
            }
            status if status.is_success() => {
                let body = response
                    .text()
                    .await
                    .map_err(|err| ChannelError::ConnectionFailed(err.to_string()))?;
                Ok(outcomes(&body, unit.recipients.len()))
            }
            status => Err(ChannelError::Channel(format!(
                "Unexpected gateway status {status}"
            ))),
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Map a success response onto the recipients of the unit.
fn outcomes(body: &str, recipients: usize) -> Vec<RecipientOutcome> {
    let response: GcmResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, "Unable to parse gateway response, assuming delivered");
            return vec![RecipientOutcome::Delivered; recipients];
        }
    };

    if response.failure == 0 && response.canonical_ids == 0 {
        return vec![RecipientOutcome::Delivered; recipients];
    }

    tracing::debug!(
        failure = response.failure,
        canonical_ids = response.canonical_ids,
        "Gateway reported per-recipient results"
    );
    response.results.into_iter().map(GcmResult::outcome).collect()
}
