use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::DeliveryResult;
use crate::models::{AppId, PullNotification};
use crate::store::DeliveryStore;

/// In-app messages an app polls for.
pub struct PullNotificationService<S> {
    store: Arc<S>,
}

impl<S: DeliveryStore> PullNotificationService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The single notification to show.
    ///
    /// With `since`, the newest regular notification created after it.
    /// Without, the newest launch notification, or failing that the newest
    /// regular one.
    pub async fn latest_since(
        &self,
        app_id: AppId,
        since: Option<DateTime<Utc>>,
    ) -> DeliveryResult<Option<PullNotification>> {
        let notifications = self.newest_first(app_id).await?;

        let latest = match since {
            Some(since) => notifications
                .into_iter()
                .find(|n| !n.launch_notification && n.created_at > since),
            None => {
                let launch = notifications.iter().find(|n| n.launch_notification).cloned();
                launch.or_else(|| {
                    notifications
                        .into_iter()
                        .find(|n| !n.launch_notification)
                })
            }
        };
        Ok(latest)
    }

    /// Regular notifications, newest first, optionally only those created
    /// after `since`.
    pub async fn all_since(
        &self,
        app_id: AppId,
        since: Option<DateTime<Utc>>,
    ) -> DeliveryResult<Vec<PullNotification>> {
        Ok(self
            .newest_first(app_id)
            .await?
            .into_iter()
            .filter(|n| !n.launch_notification)
            .filter(|n| since.map_or(true, |since| n.created_at > since))
            .collect())
    }

    async fn newest_first(&self, app_id: AppId) -> DeliveryResult<Vec<PullNotification>> {
        let mut notifications = self.store.pull_notifications(app_id).await?;
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDeliveryStore;
    use chrono::Duration;

    fn pull(id: i64, launch: bool, age_minutes: i64) -> PullNotification {
        PullNotification {
            id,
            app_id: 1,
            title: Some(format!("title {id}")),
            content: None,
            link: None,
            launch_notification: launch,
            created_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    async fn service(notifications: Vec<PullNotification>) -> PullNotificationService<InMemoryDeliveryStore> {
        let store = InMemoryDeliveryStore::new();
        for n in notifications {
            store.insert_pull_notification(n).await;
        }
        PullNotificationService::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_latest_prefers_launch_without_since() {
        let service = service(vec![pull(1, true, 60), pull(2, false, 5)]).await;
        let latest = service.latest_since(1, None).await.unwrap().unwrap();
        assert_eq!(latest.id, 1);
    }

    #[tokio::test]
    async fn test_latest_falls_back_to_regular() {
        let service = service(vec![pull(1, false, 60), pull(2, false, 5)]).await;
        let latest = service.latest_since(1, None).await.unwrap().unwrap();
        assert_eq!(latest.id, 2);
    }

    #[tokio::test]
    async fn test_latest_since_skips_launch_and_old() {
        let service = service(vec![pull(1, true, 1), pull(2, false, 30), pull(3, false, 120)]).await;

        let since = Utc::now() - Duration::minutes(60);
        let latest = service.latest_since(1, Some(since)).await.unwrap().unwrap();
        assert_eq!(latest.id, 2);

        let recent = Utc::now() - Duration::minutes(10);
        assert!(service.latest_since(1, Some(recent)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_all_since_newest_first() {
        let service = service(vec![
            pull(1, false, 120),
            pull(2, true, 10),
            pull(3, false, 5),
            pull(4, false, 30),
        ])
        .await;

        let all: Vec<i64> = service
            .all_since(1, None)
            .await
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(all, vec![3, 4, 1]);

        let since = Utc::now() - Duration::minutes(60);
        let recent: Vec<i64> = service
            .all_since(1, Some(since))
            .await
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(recent, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_other_apps_are_invisible() {
        let service = service(vec![pull(1, false, 5)]).await;
        assert!(service.all_since(2, None).await.unwrap().is_empty());
        assert!(service.latest_since(2, None).await.unwrap().is_none());
    }
}
