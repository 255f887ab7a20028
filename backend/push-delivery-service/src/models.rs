use std::fmt;

use apns_wire::{
    encode_enhanced, encode_group, encode_simple, Alert, CodecError, CodecResult, DeviceToken,
    FeedbackEntry, PayloadFormat, PushPayload,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AppId = i64;
pub type DeviceId = i64;
pub type GroupId = i64;
pub type NotificationId = i64;

/// Which devices a delivery pass covers, and therefore which credential it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryScope {
    /// Devices registered to one app, delivered with that app's certificate
    App(AppId),
    /// Devices with no app, delivered with the process-wide certificate
    Global,
}

impl DeliveryScope {
    pub fn app_id(&self) -> Option<AppId> {
        match self {
            DeliveryScope::App(id) => Some(*id),
            DeliveryScope::Global => None,
        }
    }
}

impl fmt::Display for DeliveryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryScope::App(id) => write!(f, "app:{id}"),
            DeliveryScope::Global => f.write_str("global"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub app_id: Option<AppId>,
    pub token: DeviceToken,
    pub last_registered_at: DateTime<Utc>,
}

/// A message addressed to one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub device_id: DeviceId,
    /// Token of the target device, the frame's routing key
    pub token: DeviceToken,
    pub payload: PushPayload,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(id: NotificationId, device: &Device, payload: PushPayload) -> Self {
        let mut notification = Self {
            id,
            device_id: device.id,
            token: device.token.clone(),
            payload: PushPayload::default(),
            sent_at: None,
        };
        notification.set_payload(payload);
        notification
    }

    /// Replace the payload, truncating the alert to 145 characters.
    pub fn set_payload(&mut self, mut payload: PushPayload) {
        if let Some(alert) = payload.alert.take() {
            payload.set_alert(alert, PayloadFormat::Device);
        }
        self.payload = payload;
    }

    pub fn set_alert(&mut self, alert: Alert) {
        self.payload.set_alert(alert, PayloadFormat::Device);
    }

    pub fn to_apple_json(&self) -> CodecResult<String> {
        self.payload.to_apple_json(PayloadFormat::Device)
    }

    /// Simple-format frame.
    pub fn message_for_sending(&self) -> CodecResult<Bytes> {
        encode_simple(self.token.as_bytes(), self.to_apple_json()?.as_bytes())
    }

    /// Enhanced-format frame carrying this notification's id, so an error
    /// response can be traced back to it.
    pub fn enhanced_message_for_sending(&self, expiry: u32) -> CodecResult<Bytes> {
        let id = u32::try_from(self.id).map_err(|_| CodecError::NotificationIdOutOfRange(self.id))?;
        encode_enhanced(id, expiry, self.token.as_bytes(), self.to_apple_json()?.as_bytes())
    }

    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub app_id: AppId,
    pub name: String,
}

/// A message fanned out to every device of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupNotification {
    pub id: NotificationId,
    pub group_id: GroupId,
    pub payload: PushPayload,
    pub sent_at: Option<DateTime<Utc>>,
}

impl GroupNotification {
    pub fn new(id: NotificationId, group_id: GroupId, payload: PushPayload) -> Self {
        let mut notification = Self {
            id,
            group_id,
            payload: PushPayload::default(),
            sent_at: None,
        };
        notification.set_payload(payload);
        notification
    }

    /// Replace the payload, truncating the alert to 150 characters.
    pub fn set_payload(&mut self, mut payload: PushPayload) {
        if let Some(alert) = payload.alert.take() {
            payload.set_alert(alert, PayloadFormat::Group);
        }
        self.payload = payload;
    }

    pub fn to_apple_json(&self) -> CodecResult<String> {
        self.payload.to_apple_json(PayloadFormat::Group)
    }

    /// Group frame for one member device.
    pub fn message_for_sending(&self, device: &Device) -> CodecResult<Bytes> {
        encode_group(device.token.as_bytes(), self.to_apple_json()?.as_bytes())
    }
}

/// A device the feedback service reported as no longer accepting pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFeedbackRecord {
    pub token: DeviceToken,
    pub feedback_at: DateTime<Utc>,
}

impl From<FeedbackEntry> for DeviceFeedbackRecord {
    fn from(entry: FeedbackEntry) -> Self {
        Self {
            feedback_at: entry.feedback_at(),
            token: entry.token,
        }
    }
}

/// In-app message fetched by the app instead of pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullNotification {
    pub id: NotificationId,
    pub app_id: AppId,
    pub title: Option<String>,
    pub content: Option<String>,
    pub link: Option<String>,
    /// Shown on first launch rather than as an update
    pub launch_notification: bool,
    pub created_at: DateTime<Utc>,
}
