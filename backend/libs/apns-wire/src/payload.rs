use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CodecResult;

/// Sound file sent when a notification asks for the default sound.
pub const DEFAULT_SOUND: &str = "1.aiff";

const ELLIPSIS: &str = "...";

/// Notification format, which decides the alert length limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Per-device notifications (simple or enhanced frames)
    Device,
    /// Group notifications fanned out over simple frames
    Group,
}

impl PayloadFormat {
    /// Maximum alert length in characters, ellipsis included.
    pub fn alert_limit(&self) -> usize {
        match self {
            PayloadFormat::Device => 145,
            PayloadFormat::Group => 150,
        }
    }
}

/// Alert text, either plain or a structured dictionary (`body`,
/// `action-loc-key`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Alert {
    PlainText(String),
    /// Keys go on the wire in insertion order; values are stringified
    Structured(Map<String, Value>),
}

/// Notification sound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sound {
    Named(String),
    /// `true` in the stored form; maps to [`DEFAULT_SOUND`]
    Default(bool),
}

impl Sound {
    fn as_payload_value(&self) -> Option<&str> {
        match self {
            Sound::Named(name) => Some(name),
            Sound::Default(true) => Some(DEFAULT_SOUND),
            Sound::Default(false) => None,
        }
    }
}

/// Truncate `text` to at most `limit` characters, ending in `...` when cut.
pub fn truncate_alert(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(ELLIPSIS.len());
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// The user-visible content of a notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub alert: Option<Alert>,
    pub badge: Option<u32>,
    pub sound: Option<Sound>,
    /// Extra top-level keys; values are stringified on the wire
    #[serde(default)]
    pub custom_properties: Map<String, Value>,
}

impl PushPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an alert, truncating plain text to the format's limit.
    pub fn set_alert(&mut self, alert: Alert, format: PayloadFormat) {
        self.alert = Some(match alert {
            Alert::PlainText(text) => Alert::PlainText(truncate_alert(&text, format.alert_limit())),
            structured => structured,
        });
    }

    pub fn with_alert(mut self, alert: impl Into<String>, format: PayloadFormat) -> Self {
        self.set_alert(Alert::PlainText(alert.into()), format);
        self
    }

    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    pub fn with_sound(mut self, sound: Sound) -> Self {
        self.sound = Some(sound);
        self
    }

    pub fn with_custom_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom_properties.insert(key.into(), value);
        self
    }

    /// Build the dictionary sent to the gateway.
    ///
    /// `aps` carries `alert`, `badge` and `sound`; custom properties follow as
    /// sibling keys in insertion order.
    pub fn apple_hash(&self, format: PayloadFormat) -> Value {
        let mut aps = Map::new();

        match &self.alert {
            Some(Alert::PlainText(text)) => {
                aps.insert(
                    "alert".to_string(),
                    Value::String(truncate_alert(text, format.alert_limit())),
                );
            }
            Some(Alert::Structured(fields)) => {
                let alert: Map<String, Value> = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(stringify(v))))
                    .collect();
                aps.insert("alert".to_string(), Value::Object(alert));
            }
            None => {}
        }

        if let Some(badge) = self.badge {
            aps.insert("badge".to_string(), Value::from(badge));
        }

        if let Some(sound) = self.sound.as_ref().and_then(Sound::as_payload_value) {
            aps.insert("sound".to_string(), Value::String(sound.to_string()));
        }

        let mut root = Map::new();
        root.insert("aps".to_string(), Value::Object(aps));
        for (key, value) in &self.custom_properties {
            root.insert(key.clone(), Value::String(stringify(value)));
        }

        Value::Object(root)
    }

    /// Serialize [`apple_hash`](Self::apple_hash) to compact JSON.
    pub fn to_apple_json(&self, format: PayloadFormat) -> CodecResult<String> {
        Ok(serde_json::to_string(&self.apple_hash(format))?)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
