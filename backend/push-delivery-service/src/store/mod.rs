//! Device/notification store contract.
//!
//! Delivery code reads and mutates persisted state only through
//! [`DeliveryStore`]; it never issues ad hoc queries.

use apns_wire::DeviceToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    App, AppId, DeliveryScope, Device, DeviceId, GroupId, GroupNotification, Notification,
    NotificationId, PullNotification,
};

mod memory;
mod postgres;

pub use memory::InMemoryDeliveryStore;
pub use postgres::PgDeliveryStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be turned into a model
    #[error("Corrupt {entity} {id}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: i64,
        reason: String,
    },
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn list_apps(&self) -> StoreResult<Vec<App>>;

    /// Unsent per-device notifications whose device belongs to `scope`.
    async fn find_pending_notifications(
        &self,
        scope: DeliveryScope,
    ) -> StoreResult<Vec<Notification>>;

    async fn find_notification(&self, id: NotificationId) -> StoreResult<Option<Notification>>;

    /// Stamp a notification as sent. The first stamp wins; later calls are
    /// no-ops.
    async fn mark_sent(&self, id: NotificationId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Remove a device together with its notifications and group memberships.
    ///
    /// Returns `false` when the device did not exist.
    async fn delete_device(&self, id: DeviceId) -> StoreResult<bool>;

    async fn find_device_by_token(&self, token: &DeviceToken) -> StoreResult<Option<Device>>;

    async fn last_registered_at(&self, id: DeviceId) -> StoreResult<Option<DateTime<Utc>>>;

    /// Unsent group notifications for the groups of one app.
    async fn find_pending_group_notifications(
        &self,
        app_id: AppId,
    ) -> StoreResult<Vec<GroupNotification>>;

    /// Member devices of a group, in batches of at most `batch_size`.
    async fn devices_for_group(
        &self,
        group_id: GroupId,
        batch_size: usize,
    ) -> StoreResult<Vec<Vec<Device>>>;

    /// Stamp a group notification as sent. The first stamp wins.
    async fn mark_group_sent(&self, id: NotificationId, at: DateTime<Utc>) -> StoreResult<()>;

    async fn pull_notifications(&self, app_id: AppId) -> StoreResult<Vec<PullNotification>>;
}

/// Split `devices` into consecutive batches of at most `batch_size`.
pub(crate) fn into_batches(devices: Vec<Device>, batch_size: usize) -> Vec<Vec<Device>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(devices.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size.min(devices.len()));
    for device in devices {
        current.push(device);
        if current.len() == batch_size {
            batches.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
