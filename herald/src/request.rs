//! Newline-delimited JSON push requests.
//!
//! Each line names a protocol, the raw payload and optional message options:
//!
//! ```json
//! {"protocol": "gcm", "payload": {"title": "hi"}, "options": {"recipients": ["abc"]}}
//! ```

use herald_common::Protocol;
use herald_delivery::{DistributorError, MessageDistributor, MessageOptions};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushRequest {
    pub protocol: Protocol,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub options: MessageOptions,
}

impl PushRequest {
    /// # Errors
    ///
    /// Fails if `line` is not a JSON push request.
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// Build the message and hand it to `distributor`.
    ///
    /// # Errors
    ///
    /// Fails if the payload or options are invalid, or the message has no
    /// recipients.
    pub fn submit(self, distributor: &MessageDistributor) -> Result<(), DistributorError> {
        let message = distributor.create_message(self.protocol, self.payload, &self.options)?;
        distributor.send_message(message)
    }
}

/// Submit every request read from `reader` until end of input.
///
/// Lines that cannot be parsed or submitted are logged and skipped. Returns
/// the number of accepted requests.
///
/// # Errors
///
/// Fails only if reading from `reader` fails.
pub async fn feed<R>(distributor: &MessageDistributor, reader: R) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut accepted = 0;
    let mut number = 0_usize;

    while let Some(line) = lines.next_line().await? {
        number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request = match PushRequest::parse(line) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(line = number, error = %err, "Ignoring malformed push request");
                continue;
            }
        };

        let protocol = request.protocol;
        match request.submit(distributor) {
            Ok(()) => accepted += 1,
            Err(err) => {
                tracing::warn!(
                    line = number,
                    protocol = %protocol,
                    error = %err,
                    "Push request rejected"
                );
            }
        }
    }

    Ok(accepted)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use herald_delivery::{Connectors, DistributorOptions, config::GcmOptions};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_request() {
        let request = PushRequest::parse(
            r#"{"protocol": "moz", "payload": "version=3", "options": {"recipients": ["sub"], "time_to_live": 60}}"#,
        )
        .unwrap();

        assert_eq!(request.protocol, Protocol::Moz);
        assert_eq!(request.payload, json!("version=3"));
        assert_eq!(request.options.recipients, vec!["sub".to_string()]);
        assert_eq!(request.options.time_to_live, Some(60));
    }

    #[test]
    fn test_parse_minimal_request() {
        let request = PushRequest::parse(r#"{"protocol": "gcm"}"#).unwrap();

        assert_eq!(request.payload, Value::Null);
        assert_eq!(request.options, MessageOptions::default());
    }

    #[test]
    fn test_parse_rejects_unknown_protocol() {
        assert!(PushRequest::parse(r#"{"protocol": "pigeon"}"#).is_err());
    }

    #[tokio::test]
    async fn test_feed_skips_bad_lines() {
        let options = DistributorOptions {
            testmode: true,
            gcm: Some(GcmOptions::default()),
            ..DistributorOptions::default()
        };
        let distributor = MessageDistributor::new("feed", options, Connectors::default())
            .await
            .unwrap();

        let input = concat!(
            r#"{"protocol": "gcm", "payload": {"title": "one"}, "options": {"recipients": ["a"]}}"#,
            "\n\n",
            "not json\n",
            r#"{"protocol": "gcm", "payload": "two", "options": {"recipients": []}}"#,
            "\n",
            r#"{"protocol": "gcm", "payload": "three", "options": {"recipients": ["a"], "retries": 0}}"#,
            "\n",
            r#"{"protocol": "gcm", "payload": "four", "options": {"recipients": ["b", "c"]}}"#,
            "\n",
        );

        let accepted = feed(&distributor, input.as_bytes()).await.unwrap();
        assert_eq!(accepted, 2);
        assert_eq!(distributor.pending(Protocol::Gcm), Some(2));
    }
}
