//! Protocol specific message content.

use herald_common::Protocol;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::MessageOptions;
use crate::error::MessageError;

/// Recipients per request accepted by the HTTP JSON gateway
pub const GCM_BATCH_SIZE: usize = 1000;

/// Content of a message, tagged with the protocol it is bound for.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Gcm(GcmPayload),
    Apns(ApnsPayload),
    Moz(MozPayload),
}

impl Payload {
    /// Build the payload for `protocol` from caller supplied data and options.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::InvalidPayload`] if `data` cannot be turned
    /// into a payload for `protocol`.
    pub fn build(
        protocol: Protocol,
        data: Value,
        options: &MessageOptions,
    ) -> Result<Self, MessageError> {
        Ok(match protocol {
            Protocol::Gcm => Self::Gcm(GcmPayload::build(data, options)),
            Protocol::Apns => Self::Apns(ApnsPayload::build(data, options)?),
            Protocol::Moz => Self::Moz(MozPayload { data }),
        })
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        match self {
            Self::Gcm(_) => Protocol::Gcm,
            Self::Apns(_) => Protocol::Apns,
            Self::Moz(_) => Protocol::Moz,
        }
    }

    /// Maximum number of recipients a single delivery unit may address.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        match self {
            Self::Gcm(_) => GCM_BATCH_SIZE,
            Self::Apns(_) | Self::Moz(_) => 1,
        }
    }
}

/// HTTP JSON gateway message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcmPayload {
    pub data: Map<String, Value>,
    pub collapse_key: Option<String>,
    pub restricted_package_name: Option<String>,
    pub delay_while_idle: Option<bool>,
    pub dry_run: Option<bool>,
}

impl GcmPayload {
    /// Objects are sent as the data block as-is; anything else is wrapped
    /// as `{"message": data}`.
    #[must_use]
    pub fn build(data: Value, options: &MessageOptions) -> Self {
        let data = match data {
            Value::Object(map) => map,
            other => Map::from_iter([("message".to_string(), other)]),
        };

        Self {
            data,
            collapse_key: options.collapse_key.clone(),
            restricted_package_name: options.restricted_package_name.clone(),
            delay_while_idle: options.delay_while_idle,
            dry_run: options.dry_run,
        }
    }
}

/// Localisation key plus format arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LocalizedText {
    pub key: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// Binary-socket gateway notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApnsPayload {
    pub alert_body: Option<String>,
    pub alert_title: Option<String>,
    pub badge: Option<i64>,
    pub category: Option<String>,
    pub launch_image: Option<String>,
    pub localized_action_key: Option<String>,
    pub localized_alert: Option<LocalizedText>,
    pub localized_title: Option<LocalizedText>,
    pub sound: Option<String>,
    pub content_available: bool,
    pub show_action_button: Option<bool>,
    pub custom: Map<String, Value>,
}

impl ApnsPayload {
    /// Recognised keys fill the `aps` dictionary; unknown keys become custom
    /// properties. A scalar is stored as the custom property `message`.
    ///
    /// # Errors
    ///
    /// Fails on `null` data or a recognised key with a value of the wrong shape.
    pub fn build(data: Value, options: &MessageOptions) -> Result<Self, MessageError> {
        let mut payload = Self::default();

        match data {
            Value::Null => return Err(invalid("Unable to construct message without data")),
            Value::Object(map) => {
                for (key, value) in map {
                    payload.set(key, value)?;
                }
            }
            other => {
                payload.custom.insert("message".to_string(), other);
            }
        }

        if let Some(sound) = &options.sound_file_name {
            payload.sound = Some(sound.clone());
        }
        payload.content_available |= options.content_available;
        if options.show_action_button.is_some() {
            payload.show_action_button = options.show_action_button;
        }

        Ok(payload)
    }

    fn set(&mut self, key: String, value: Value) -> Result<(), MessageError> {
        match key.as_str() {
            "alertBody" => self.alert_body = Some(text(value)),
            "alertTitle" => self.alert_title = Some(text(value)),
            "badgenumber" => self.badge = Some(badge(&value)?),
            "categoryName" => self.category = Some(text(value)),
            "launchImageFileName" => self.launch_image = Some(text(value)),
            "localizedActionButtonKey" => self.localized_action_key = Some(text(value)),
            "localizedAlertMessage" => self.localized_alert = Some(localized(&key, value)?),
            "localizedAlertTitle" => self.localized_title = Some(localized(&key, value)?),
            "soundFileName" => self.sound = Some(text(value)),
            _ => {
                self.custom.insert(key, value);
            }
        }
        Ok(())
    }

    fn has_alert_dictionary(&self) -> bool {
        self.alert_title.is_some()
            || self.launch_image.is_some()
            || self.localized_action_key.is_some()
            || self.localized_alert.is_some()
            || self.localized_title.is_some()
            || self.show_action_button == Some(false)
    }

    /// Render the notification JSON: custom properties plus the `aps` dictionary.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut aps = Map::new();

        if self.has_alert_dictionary() {
            let mut alert = Map::new();
            insert_opt(&mut alert, "body", self.alert_body.as_ref());
            insert_opt(&mut alert, "title", self.alert_title.as_ref());
            if self.show_action_button == Some(false) {
                alert.insert("action-loc-key".to_string(), Value::Null);
            } else {
                insert_opt(&mut alert, "action-loc-key", self.localized_action_key.as_ref());
            }
            insert_opt(&mut alert, "launch-image", self.launch_image.as_ref());
            if let Some(localized) = &self.localized_alert {
                alert.insert("loc-key".to_string(), Value::from(localized.key.clone()));
                alert.insert("loc-args".to_string(), Value::from(localized.arguments.clone()));
            }
            if let Some(localized) = &self.localized_title {
                alert.insert("title-loc-key".to_string(), Value::from(localized.key.clone()));
                alert.insert(
                    "title-loc-args".to_string(),
                    Value::from(localized.arguments.clone()),
                );
            }
            aps.insert("alert".to_string(), Value::Object(alert));
        } else if let Some(body) = &self.alert_body {
            aps.insert("alert".to_string(), Value::from(body.clone()));
        }

        if let Some(badge) = self.badge {
            aps.insert("badge".to_string(), Value::from(badge));
        }
        insert_opt(&mut aps, "sound", self.sound.as_ref());
        insert_opt(&mut aps, "category", self.category.as_ref());
        if self.content_available {
            aps.insert("content-available".to_string(), Value::from(1));
        }

        let mut root = self.custom.clone();
        root.insert("aps".to_string(), Value::Object(aps));
        Value::Object(root)
    }
}

/// Subscription-push gateway message.
#[derive(Debug, Clone, PartialEq)]
pub struct MozPayload {
    pub data: Value,
}

impl MozPayload {
    /// Request body for the gateway, `None` for a bare wake-up.
    #[must_use]
    pub fn body(&self) -> Option<String> {
        match &self.data {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

fn invalid(reason: impl Into<String>) -> MessageError {
    MessageError::InvalidPayload {
        protocol: Protocol::Apns,
        reason: reason.into(),
    }
}

fn text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn badge(value: &Value) -> Result<i64, MessageError> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid(format!("badgenumber is not an integer: {value}")))
}

fn localized(key: &str, value: Value) -> Result<LocalizedText, MessageError> {
    serde_json::from_value(value).map_err(|err| invalid(format!("{key}: {err}")))
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<&String>) {
    if let Some(value) = value {
        map.insert(key.to_string(), Value::from(value.clone()));
    }
}
