use std::collections::BTreeMap;

use apns_wire::DeviceToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{into_batches, DeliveryStore, StoreResult};
use crate::models::{
    App, AppId, DeliveryScope, Device, DeviceId, Group, GroupId, GroupNotification, Notification,
    NotificationId, PullNotification,
};

#[derive(Debug, Default)]
struct State {
    apps: BTreeMap<AppId, App>,
    devices: BTreeMap<DeviceId, Device>,
    notifications: BTreeMap<NotificationId, Notification>,
    groups: BTreeMap<GroupId, Group>,
    groupings: Vec<(GroupId, DeviceId)>,
    group_notifications: BTreeMap<NotificationId, GroupNotification>,
    pull_notifications: Vec<PullNotification>,
}

/// Store kept entirely in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryStore {
    state: RwLock<State>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_app(&self, app: App) {
        self.state.write().await.apps.insert(app.id, app);
    }

    pub async fn insert_device(&self, device: Device) {
        self.state.write().await.devices.insert(device.id, device);
    }

    pub async fn insert_notification(&self, notification: Notification) {
        self.state
            .write()
            .await
            .notifications
            .insert(notification.id, notification);
    }

    pub async fn insert_group(&self, group: Group) {
        self.state.write().await.groups.insert(group.id, group);
    }

    pub async fn add_device_to_group(&self, group_id: GroupId, device_id: DeviceId) {
        self.state.write().await.groupings.push((group_id, device_id));
    }

    pub async fn insert_group_notification(&self, notification: GroupNotification) {
        self.state
            .write()
            .await
            .group_notifications
            .insert(notification.id, notification);
    }

    pub async fn insert_pull_notification(&self, notification: PullNotification) {
        self.state.write().await.pull_notifications.push(notification);
    }

    pub async fn device(&self, id: DeviceId) -> Option<Device> {
        self.state.read().await.devices.get(&id).cloned()
    }

    pub async fn notification(&self, id: NotificationId) -> Option<Notification> {
        self.state.read().await.notifications.get(&id).cloned()
    }

    pub async fn group_notification(&self, id: NotificationId) -> Option<GroupNotification> {
        self.state.read().await.group_notifications.get(&id).cloned()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn list_apps(&self) -> StoreResult<Vec<App>> {
        Ok(self.state.read().await.apps.values().cloned().collect())
    }

    async fn find_pending_notifications(
        &self,
        scope: DeliveryScope,
    ) -> StoreResult<Vec<Notification>> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .values()
            .filter(|n| n.sent_at.is_none())
            .filter(|n| {
                state
                    .devices
                    .get(&n.device_id)
                    .is_some_and(|d| d.app_id == scope.app_id())
            })
            .cloned()
            .collect())
    }

    async fn find_notification(&self, id: NotificationId) -> StoreResult<Option<Notification>> {
        Ok(self.state.read().await.notifications.get(&id).cloned())
    }

    async fn mark_sent(&self, id: NotificationId, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(notification) = self.state.write().await.notifications.get_mut(&id) {
            notification.sent_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn delete_device(&self, id: DeviceId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.devices.remove(&id).is_none() {
            return Ok(false);
        }
        state.notifications.retain(|_, n| n.device_id != id);
        state.groupings.retain(|(_, device_id)| *device_id != id);
        Ok(true)
    }

    async fn find_device_by_token(&self, token: &DeviceToken) -> StoreResult<Option<Device>> {
        Ok(self
            .state
            .read()
            .await
            .devices
            .values()
            .find(|d| &d.token == token)
            .cloned())
    }

    async fn last_registered_at(&self, id: DeviceId) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .state
            .read()
            .await
            .devices
            .get(&id)
            .map(|d| d.last_registered_at))
    }

    async fn find_pending_group_notifications(
        &self,
        app_id: AppId,
    ) -> StoreResult<Vec<GroupNotification>> {
        let state = self.state.read().await;
        Ok(state
            .group_notifications
            .values()
            .filter(|n| n.sent_at.is_none())
            .filter(|n| {
                state
                    .groups
                    .get(&n.group_id)
                    .is_some_and(|g| g.app_id == app_id)
            })
            .cloned()
            .collect())
    }

    async fn devices_for_group(
        &self,
        group_id: GroupId,
        batch_size: usize,
    ) -> StoreResult<Vec<Vec<Device>>> {
        let state = self.state.read().await;
        let mut members: Vec<Device> = state
            .groupings
            .iter()
            .filter(|(g, _)| *g == group_id)
            .filter_map(|(_, device_id)| state.devices.get(device_id).cloned())
            .collect();
        members.sort_by_key(|d| d.id);
        members.dedup_by_key(|d| d.id);
        Ok(into_batches(members, batch_size))
    }

    async fn mark_group_sent(&self, id: NotificationId, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(notification) = self.state.write().await.group_notifications.get_mut(&id) {
            notification.sent_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn pull_notifications(&self, app_id: AppId) -> StoreResult<Vec<PullNotification>> {
        Ok(self
            .state
            .read()
            .await
            .pull_notifications
            .iter()
            .filter(|n| n.app_id == app_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apns_wire::PushPayload;
    use chrono::Duration;

    fn device(id: DeviceId, app_id: Option<AppId>) -> Device {
        Device {
            id,
            app_id,
            token: DeviceToken::from_bytes(vec![id as u8; 32]),
            last_registered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_mark_sent_first_stamp_wins() {
        let store = InMemoryDeliveryStore::new();
        let d = device(1, Some(1));
        store.insert_device(d.clone()).await;
        store
            .insert_notification(Notification::new(10, &d, PushPayload::new()))
            .await;

        let first = Utc::now() - Duration::minutes(5);
        store.mark_sent(10, first).await.unwrap();
        store.mark_sent(10, Utc::now()).await.unwrap();

        assert_eq!(store.notification(10).await.unwrap().sent_at, Some(first));
    }

    #[tokio::test]
    async fn test_pending_respects_scope() {
        let store = InMemoryDeliveryStore::new();
        let app_device = device(1, Some(1));
        let global_device = device(2, None);
        store.insert_device(app_device.clone()).await;
        store.insert_device(global_device.clone()).await;
        store
            .insert_notification(Notification::new(10, &app_device, PushPayload::new()))
            .await;
        store
            .insert_notification(Notification::new(11, &global_device, PushPayload::new()))
            .await;

        let app: Vec<_> = store
            .find_pending_notifications(DeliveryScope::App(1))
            .await
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        let global: Vec<_> = store
            .find_pending_notifications(DeliveryScope::Global)
            .await
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();

        assert_eq!(app, vec![10]);
        assert_eq!(global, vec![11]);
    }

    #[tokio::test]
    async fn test_delete_device_cascades() {
        let store = InMemoryDeliveryStore::new();
        let d = device(1, Some(1));
        store.insert_device(d.clone()).await;
        store
            .insert_notification(Notification::new(10, &d, PushPayload::new()))
            .await;
        store.add_device_to_group(5, 1).await;

        assert!(store.delete_device(1).await.unwrap());
        assert!(!store.delete_device(1).await.unwrap());
        assert!(store.notification(10).await.is_none());
        assert!(store.devices_for_group(5, 100).await.unwrap().is_empty());
    }
}
