use core::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A push-notification delivery channel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Binary-socket push gateway
    Apns,
    /// HTTP JSON push gateway
    Gcm,
    /// Subscription push gateway
    Moz,
}

impl Protocol {
    /// Every protocol the dispatcher knows about, in configuration order.
    pub const ALL: [Self; 3] = [Self::Gcm, Self::Apns, Self::Moz];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Apns => "apns",
            Self::Gcm => "gcm",
            Self::Moz => "moz",
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown protocol: {0}")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "apns" => Ok(Self::Apns),
            "gcm" => Ok(Self::Gcm),
            "moz" => Ok(Self::Moz),
            _ => Err(UnknownProtocol(value.to_string())),
        }
    }
}

/// Which set of gateway defaults applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Production,
    Testmode,
}

impl Mode {
    #[must_use]
    pub const fn from_testmode(testmode: bool) -> Self {
        if testmode {
            Self::Testmode
        } else {
            Self::Production
        }
    }
}
