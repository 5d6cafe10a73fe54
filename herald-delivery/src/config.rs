//! Distributor and per-protocol configuration.
//!
//! Each protocol table is optional: a protocol is served only when its table
//! is present. Values given by the user win over the production or testmode
//! defaults, and the merged table is validated before any worker starts.

use std::time::Duration;

use herald_common::{Mode, Protocol};
use reqwest::Url;
use serde::Deserialize;

use crate::{channel::ChannelSettings, error::ConfigError};

const fn default_connect_timeout() -> u64 {
    1000
}

const fn default_init_timeout() -> u64 {
    10_000
}

const fn default_state_timeout() -> u64 {
    10_000
}

/// Options recognised by [`MessageDistributor::new`](crate::MessageDistributor::new).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DistributorOptions {
    /// Use testmode gateway defaults and mark requests as dry runs
    #[serde(default)]
    pub testmode: bool,

    /// Gateway connect timeout (in milliseconds)
    ///
    /// Default: 1000
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// How long construction waits for every worker to initialise (in milliseconds)
    ///
    /// Default: 10000
    #[serde(default = "default_init_timeout")]
    pub init_timeout_ms: u64,

    /// How long `start`/`stop` wait for every worker to reach the target state
    /// (in milliseconds)
    ///
    /// Default: 10000
    #[serde(default = "default_state_timeout")]
    pub state_timeout_ms: u64,

    #[serde(default)]
    pub gcm: Option<GcmOptions>,

    #[serde(default)]
    pub apns: Option<ApnsOptions>,

    #[serde(default)]
    pub moz: Option<MozOptions>,
}

impl Default for DistributorOptions {
    fn default() -> Self {
        Self {
            testmode: false,
            connect_timeout_ms: default_connect_timeout(),
            init_timeout_ms: default_init_timeout(),
            state_timeout_ms: default_state_timeout(),
            gcm: None,
            apns: None,
            moz: None,
        }
    }
}

impl DistributorOptions {
    #[must_use]
    pub const fn mode(&self) -> Mode {
        Mode::from_testmode(self.testmode)
    }

    #[must_use]
    pub const fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            testmode: self.testmode,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    #[must_use]
    pub const fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    #[must_use]
    pub const fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.state_timeout_ms)
    }

    /// Merge defaults into every configured protocol table and validate it.
    ///
    /// Protocols without a table are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first missing or invalid option found.
    pub fn resolve(&self) -> Result<Vec<ServiceConfig>, ConfigError> {
        let mode = self.mode();
        let mut services = Vec::new();

        for protocol in Protocol::ALL {
            let resolved = match protocol {
                Protocol::Gcm => self
                    .gcm
                    .as_ref()
                    .map(|options| options.merge(GcmOptions::defaults(mode)).validate()),
                Protocol::Apns => self
                    .apns
                    .as_ref()
                    .map(|options| options.merge(ApnsOptions::defaults(mode)).validate()),
                Protocol::Moz => self
                    .moz
                    .as_ref()
                    .map(|options| options.merge(MozOptions::defaults(mode)).validate()),
            };

            match resolved {
                Some(config) => services.push(config?),
                None => tracing::info!(protocol = %protocol, "Skipping unconfigured service"),
            }
        }

        Ok(services)
    }
}

/// HTTP JSON gateway options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GcmOptions {
    pub server: Option<String>,
    pub api_key: Option<String>,
}

impl GcmOptions {
    #[must_use]
    pub fn defaults(mode: Mode) -> Self {
        match mode {
            Mode::Production => Self {
                server: Some("https://android.googleapis.com/gcm/send".to_string()),
                api_key: None,
            },
            Mode::Testmode => Self {
                server: Some("http://localhost".to_string()),
                api_key: Some("apiKey".to_string()),
            },
        }
    }

    /// Fill unset fields from `defaults`.
    #[must_use]
    pub fn merge(&self, defaults: Self) -> Self {
        Self {
            server: self.server.clone().or(defaults.server),
            api_key: self.api_key.clone().or(defaults.api_key),
        }
    }

    /// # Errors
    ///
    /// Fails if the server or API key is missing, empty or unusable.
    pub fn validate(self) -> Result<ServiceConfig, ConfigError> {
        let server = parse_url(Protocol::Gcm, "server", self.server)?;
        let api_key = required(Protocol::Gcm, "api_key", self.api_key)?;
        Ok(ServiceConfig::Gcm(GcmConfig { server, api_key }))
    }
}

/// Binary-socket gateway options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApnsOptions {
    pub certificate: Option<CertificateOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CertificateOptions {
    pub path: Option<String>,
    pub password: Option<String>,
}

impl ApnsOptions {
    #[must_use]
    pub fn defaults(mode: Mode) -> Self {
        let path = match mode {
            Mode::Production => "path/to/production-certificate.p12",
            Mode::Testmode => "path/to/development-certificate.p12",
        };

        Self {
            certificate: Some(CertificateOptions {
                path: Some(path.to_string()),
                password: Some("certificatepassword".to_string()),
            }),
        }
    }

    #[must_use]
    pub fn merge(&self, defaults: Self) -> Self {
        let defaults = defaults.certificate.unwrap_or_default();
        let certificate = self.certificate.clone().unwrap_or_default();

        Self {
            certificate: Some(CertificateOptions {
                path: certificate.path.or(defaults.path),
                password: certificate.password.or(defaults.password),
            }),
        }
    }

    /// # Errors
    ///
    /// Fails if the certificate path is missing or empty.
    pub fn validate(self) -> Result<ServiceConfig, ConfigError> {
        let certificate = self.certificate.unwrap_or_default();
        Ok(ServiceConfig::Apns(ApnsConfig {
            certificate_path: required(Protocol::Apns, "certificate.path", certificate.path)?,
            certificate_password: certificate.password.unwrap_or_default(),
        }))
    }
}

/// Subscription-push gateway options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MozOptions {
    pub server: Option<String>,
}

impl MozOptions {
    #[must_use]
    pub fn defaults(mode: Mode) -> Self {
        let server = match mode {
            Mode::Production => "https://updates.push.services.mozilla.com/push/",
            Mode::Testmode => "http://localhost",
        };
        Self {
            server: Some(server.to_string()),
        }
    }

    #[must_use]
    pub fn merge(&self, defaults: Self) -> Self {
        Self {
            server: self.server.clone().or(defaults.server),
        }
    }

    /// # Errors
    ///
    /// Fails if the server is missing or not a URL.
    pub fn validate(self) -> Result<ServiceConfig, ConfigError> {
        let server = parse_url(Protocol::Moz, "server", self.server)?;
        Ok(ServiceConfig::Moz(MozConfig {
            server: server.to_string(),
        }))
    }
}

/// A validated protocol configuration, ready to open a channel with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceConfig {
    Gcm(GcmConfig),
    Apns(ApnsConfig),
    Moz(MozConfig),
}

impl ServiceConfig {
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        match self {
            Self::Gcm(_) => Protocol::Gcm,
            Self::Apns(_) => Protocol::Apns,
            Self::Moz(_) => Protocol::Moz,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcmConfig {
    pub server: Url,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnsConfig {
    pub certificate_path: String,
    pub certificate_password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MozConfig {
    /// Prefix the subscription identifier is appended to
    pub server: String,
}

fn required(
    protocol: Protocol,
    field: &'static str,
    value: Option<String>,
) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingOption { protocol, field }),
    }
}

fn parse_url(
    protocol: Protocol,
    field: &'static str,
    value: Option<String>,
) -> Result<Url, ConfigError> {
    let value = required(protocol, field, value)?;
    Url::parse(&value).map_err(|err| ConfigError::InvalidOption {
        protocol,
        field,
        reason: err.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults_when_deserialized_empty() {
        let options: DistributorOptions = ron::from_str("()").unwrap();
        assert_eq!(options, DistributorOptions::default());
        assert_eq!(options.connect_timeout_ms, 1000);
        assert_eq!(options.init_timeout(), Duration::from_secs(10));
        assert!(options.resolve().unwrap().is_empty());
    }

    #[test]
    fn test_production_gcm_requires_api_key() {
        let options = DistributorOptions {
            gcm: Some(GcmOptions::default()),
            ..DistributorOptions::default()
        };
        let err = options.resolve().unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingOption {
                protocol: Protocol::Gcm,
                field: "api_key",
            }
        );
        assert_eq!(err.to_string(), "gcm.api_key is missing from options");
    }

    #[test]
    fn test_testmode_defaults_fill_gaps() {
        let options: DistributorOptions =
            ron::from_str("(testmode: true, gcm: Some(()), moz: Some(()))").unwrap();
        let services = options.resolve().unwrap();

        assert_eq!(
            services,
            vec![
                ServiceConfig::Gcm(GcmConfig {
                    server: Url::parse("http://localhost").unwrap(),
                    api_key: "apiKey".to_string(),
                }),
                ServiceConfig::Moz(MozConfig {
                    server: "http://localhost/".to_string(),
                }),
            ]
        );
    }

    #[test]
    fn test_user_values_win() {
        let options = DistributorOptions {
            gcm: Some(GcmOptions {
                server: Some("https://gateway.test/send".to_string()),
                api_key: Some("secret".to_string()),
            }),
            ..DistributorOptions::default()
        };
        let services = options.resolve().unwrap();
        let ServiceConfig::Gcm(config) = &services[0] else {
            panic!("expected gcm config, got {services:?}");
        };
        assert_eq!(config.server.as_str(), "https://gateway.test/send");
        assert_eq!(config.api_key, "secret");
    }

    #[test]
    fn test_invalid_server_named() {
        let options = DistributorOptions {
            moz: Some(MozOptions {
                server: Some("not a url".to_string()),
            }),
            ..DistributorOptions::default()
        };
        let err = options.resolve().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidOption {
                protocol: Protocol::Moz,
                field: "server",
                ..
            }
        ));
    }

    #[test]
    fn test_apns_certificate_merge() {
        let options = ApnsOptions {
            certificate: Some(CertificateOptions {
                path: Some("/etc/herald/push.p12".to_string()),
                password: None,
            }),
        };
        let merged = options.merge(ApnsOptions::defaults(Mode::Production));
        assert_eq!(
            merged.validate().unwrap(),
            ServiceConfig::Apns(ApnsConfig {
                certificate_path: "/etc/herald/push.p12".to_string(),
                certificate_password: "certificatepassword".to_string(),
            })
        );

        let empty = ApnsOptions {
            certificate: Some(CertificateOptions {
                path: Some(String::new()),
                password: None,
            }),
        };
        assert_eq!(
            empty.validate().unwrap_err(),
            ConfigError::MissingOption {
                protocol: Protocol::Apns,
                field: "certificate.path",
            }
        );
    }
}
