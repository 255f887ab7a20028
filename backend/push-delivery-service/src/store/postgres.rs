use apns_wire::{Alert, DeviceToken, PushPayload, Sound};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{into_batches, DeliveryStore, StoreError, StoreResult};
use crate::config::DatabaseConfig;
use crate::models::{
    App, AppId, DeliveryScope, Device, DeviceId, GroupId, GroupNotification, Notification,
    NotificationId, PullNotification,
};

const NOTIFICATION_COLUMNS: &str = r#"
    n.id, n.device_id, d.token, n.alert, n.badge, n.sound, n.custom_properties, n.sent_at
"#;

/// Normalized token text; `idx_apn_devices_normalized_token` indexes this
/// exact expression, so lookups must use it verbatim.
const NORMALIZED_TOKEN: &str = r"lower(regexp_replace(token, '[\s<>]', '', 'g'))";

/// Postgres-backed store (schema in `migrations/`).
#[derive(Clone)]
pub struct PgDeliveryStore {
    pool: PgPool,
}

impl PgDeliveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        info!(max_connections = config.max_connections, "Connected to database");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn corrupt(entity: &'static str, id: i64, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        entity,
        id,
        reason: reason.to_string(),
    }
}

fn parse_token(entity: &'static str, id: i64, token: &str) -> StoreResult<DeviceToken> {
    DeviceToken::parse(token).map_err(|e| corrupt(entity, id, e))
}

/// Rebuild a payload from the `alert`, `badge`, `sound` and
/// `custom_properties` columns.
fn payload_from_row(entity: &'static str, id: i64, row: &PgRow) -> StoreResult<PushPayload> {
    let alert = row
        .try_get::<Option<Value>, _>("alert")?
        .map(serde_json::from_value::<Alert>)
        .transpose()
        .map_err(|e| corrupt(entity, id, format!("alert: {e}")))?;

    let badge = row
        .try_get::<Option<i32>, _>("badge")?
        .map(u32::try_from)
        .transpose()
        .map_err(|e| corrupt(entity, id, format!("badge: {e}")))?;

    let sound = row
        .try_get::<Option<Value>, _>("sound")?
        .map(serde_json::from_value::<Sound>)
        .transpose()
        .map_err(|e| corrupt(entity, id, format!("sound: {e}")))?;

    let custom_properties = match row.try_get::<Option<Value>, _>("custom_properties")? {
        None | Some(Value::Null) => Default::default(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(corrupt(
                entity,
                id,
                format!("custom_properties is not an object: {other}"),
            ))
        }
    };

    Ok(PushPayload {
        alert,
        badge,
        sound,
        custom_properties,
    })
}

fn notification_from_row(row: &PgRow) -> StoreResult<Notification> {
    let id: i64 = row.try_get("id")?;
    let token: String = row.try_get("token")?;
    Ok(Notification {
        id,
        device_id: row.try_get("device_id")?,
        token: parse_token("notification", id, &token)?,
        payload: payload_from_row("notification", id, row)?,
        sent_at: row.try_get("sent_at")?,
    })
}

fn device_from_row(row: &PgRow) -> StoreResult<Device> {
    let id: i64 = row.try_get("id")?;
    let token: String = row.try_get("token")?;
    Ok(Device {
        id,
        app_id: row.try_get("app_id")?,
        token: parse_token("device", id, &token)?,
        last_registered_at: row.try_get("last_registered_at")?,
    })
}

#[async_trait]
impl DeliveryStore for PgDeliveryStore {
    async fn list_apps(&self) -> StoreResult<Vec<App>> {
        let rows = sqlx::query("SELECT id, name FROM apn_apps ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(App {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn find_pending_notifications(
        &self,
        scope: DeliveryScope,
    ) -> StoreResult<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}
            FROM apn_notifications n
            JOIN apn_devices d ON d.id = n.device_id
            WHERE n.sent_at IS NULL
              AND d.app_id IS NOT DISTINCT FROM $1
            ORDER BY n.id
            "#
        ))
        .bind(scope.app_id())
        .fetch_all(&self.pool)
        .await?;

        let notifications = rows
            .iter()
            .map(notification_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        debug!(scope = %scope, count = notifications.len(), "Fetched pending notifications");
        Ok(notifications)
    }

    async fn find_notification(&self, id: NotificationId) -> StoreResult<Option<Notification>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}
            FROM apn_notifications n
            JOIN apn_devices d ON d.id = n.device_id
            WHERE n.id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn mark_sent(&self, id: NotificationId, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE apn_notifications
            SET sent_at = $2, updated_at = NOW()
            WHERE id = $1 AND sent_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(notification_id = id, "Notification already sent or gone");
        }
        Ok(())
    }

    async fn delete_device(&self, id: DeviceId) -> StoreResult<bool> {
        // notifications and groupings cascade
        let result = sqlx::query("DELETE FROM apn_devices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_device_by_token(&self, token: &DeviceToken) -> StoreResult<Option<Device>> {
        // tokens are stored in display form; compare the normalized form
        let row = sqlx::query(&format!(
            r#"
            SELECT id, app_id, token, last_registered_at
            FROM apn_devices
            WHERE {NORMALIZED_TOKEN} = $1
            ORDER BY id
            LIMIT 1
            "#
        ))
        .bind(token.to_hex())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    async fn last_registered_at(&self, id: DeviceId) -> StoreResult<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT last_registered_at FROM apn_devices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row
            .map(|row| row.try_get("last_registered_at"))
            .transpose()?)
    }

    async fn find_pending_group_notifications(
        &self,
        app_id: AppId,
    ) -> StoreResult<Vec<GroupNotification>> {
        let rows = sqlx::query(
            r#"
            SELECT gn.id, gn.group_id, gn.alert, gn.badge, gn.sound,
                   gn.custom_properties, gn.sent_at
            FROM apn_group_notifications gn
            JOIN apn_groups g ON g.id = gn.group_id
            WHERE gn.sent_at IS NULL AND g.app_id = $1
            ORDER BY gn.id
            "#,
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                Ok(GroupNotification {
                    id,
                    group_id: row.try_get("group_id")?,
                    payload: payload_from_row("group notification", id, row)?,
                    sent_at: row.try_get("sent_at")?,
                })
            })
            .collect()
    }

    async fn devices_for_group(
        &self,
        group_id: GroupId,
        batch_size: usize,
    ) -> StoreResult<Vec<Vec<Device>>> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.app_id, d.token, d.last_registered_at
            FROM apn_devices d
            JOIN apn_device_groupings dg ON dg.device_id = d.id
            WHERE dg.group_id = $1
            ORDER BY d.id
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        let devices = rows
            .iter()
            .map(device_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(into_batches(devices, batch_size))
    }

    async fn mark_group_sent(&self, id: NotificationId, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE apn_group_notifications
            SET sent_at = $2, updated_at = NOW()
            WHERE id = $1 AND sent_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pull_notifications(&self, app_id: AppId) -> StoreResult<Vec<PullNotification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, app_id, title, content, link, launch_notification, created_at
            FROM apn_pull_notifications
            WHERE app_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PullNotification {
                    id: row.try_get("id")?,
                    app_id: row.try_get("app_id")?,
                    title: row.try_get("title")?,
                    content: row.try_get("content")?,
                    link: row.try_get("link")?,
                    launch_notification: row.try_get("launch_notification")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_lookup_matches_indexed_expression() {
        let migration = include_str!("../../migrations/0002_apn_device_token_lookup.sql");
        assert!(migration.contains(&format!("(({NORMALIZED_TOKEN}))")));
    }

    #[test]
    fn test_normalized_form_is_what_lookups_bind() {
        let token = DeviceToken::parse("<ABCDEF01 23456789>").unwrap();
        assert_eq!(token.to_hex(), "abcdef0123456789");
    }
}
