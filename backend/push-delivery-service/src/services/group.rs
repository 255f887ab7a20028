use std::fmt;
use std::sync::Arc;

use apns_gateway::{Credential, GatewayConnector};
use apns_wire::GROUP_PAYLOAD_LIMIT;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{AppId, Device, GroupNotification, NotificationId};
use crate::store::DeliveryStore;

/// Outcome of fanning one group notification out to its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupDeliveryReport {
    pub group_notification_id: NotificationId,
    pub delivered: usize,
    pub total: usize,
}

impl GroupDeliveryReport {
    pub fn failed(&self) -> usize {
        self.total - self.delivered
    }
}

impl fmt::Display for GroupDeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.delivered, self.total)
    }
}

/// Sends group notifications in simple frames, one fresh session per batch
/// of member devices. There is no error-response correlation; only write
/// failures are counted.
pub struct GroupDeliveryBatcher<S, C> {
    store: Arc<S>,
    connector: Arc<C>,
    config: Arc<DeliveryConfig>,
}

impl<S, C> GroupDeliveryBatcher<S, C>
where
    S: DeliveryStore,
    C: GatewayConnector,
{
    pub fn new(store: Arc<S>, connector: Arc<C>, config: Arc<DeliveryConfig>) -> Self {
        Self {
            store,
            connector,
            config,
        }
    }

    /// Deliver every unsent group notification of `app_id`.
    ///
    /// Notifications whose payload cannot be encoded are logged and left
    /// unsent; connection failures abort the run.
    pub async fn deliver_pending(
        &self,
        app_id: AppId,
        credential: &Credential,
    ) -> DeliveryResult<Vec<GroupDeliveryReport>> {
        let pending = self.store.find_pending_group_notifications(app_id).await?;
        let mut reports = Vec::with_capacity(pending.len());

        for notification in &pending {
            match self.deliver(notification, credential).await {
                Ok(report) => reports.push(report),
                Err(e @ (DeliveryError::PayloadTooLarge { .. } | DeliveryError::Codec(_))) => {
                    error!(
                        group_notification_id = notification.id,
                        group_id = notification.group_id,
                        error = %e,
                        "Skipping group notification"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(reports)
    }

    /// Fan one group notification out to every member device and stamp it
    /// sent once all batches are done.
    pub async fn deliver(
        &self,
        notification: &GroupNotification,
        credential: &Credential,
    ) -> DeliveryResult<GroupDeliveryReport> {
        let payload_size = notification.to_apple_json()?.len();
        if payload_size > GROUP_PAYLOAD_LIMIT {
            return Err(DeliveryError::PayloadTooLarge {
                notification_id: notification.id,
                size: payload_size,
                limit: GROUP_PAYLOAD_LIMIT,
            });
        }

        let batches = self
            .store
            .devices_for_group(notification.group_id, self.config.group_batch_size)
            .await?;

        let total: usize = batches.iter().map(Vec::len).sum();
        let mut failed = 0;

        for (index, batch) in batches.iter().enumerate() {
            debug!(
                group_notification_id = notification.id,
                batch = index + 1,
                devices = batch.len(),
                "Sending group batch"
            );
            failed += self.send_batch(notification, batch, credential).await?;
        }

        if let Err(e) = self.store.mark_group_sent(notification.id, Utc::now()).await {
            error!(
                group_notification_id = notification.id,
                error = %e,
                "Failed to mark group notification as sent"
            );
        }

        let report = GroupDeliveryReport {
            group_notification_id: notification.id,
            delivered: total - failed,
            total,
        };
        info!(group_notification_id = notification.id, "Sent to: {report}");
        Ok(report)
    }

    /// Returns the number of devices the frame could not be written to.
    async fn send_batch(
        &self,
        notification: &GroupNotification,
        batch: &[Device],
        credential: &Credential,
    ) -> DeliveryResult<usize> {
        let endpoint = &self.config.gateway;
        let mut session = self
            .connector
            .connect(credential, endpoint)
            .await
            .map_err(|e| {
                error!(endpoint = %endpoint, error = %e, "Failed to open gateway session");
                DeliveryError::ConnectionFailure {
                    endpoint: endpoint.to_string(),
                    source: e,
                }
            })?;

        let mut failed = 0;
        for device in batch {
            let result = match notification.message_for_sending(device) {
                Ok(frame) => session.write(&frame).await.map_err(DeliveryError::WriteFailure),
                Err(e) => Err(e.into()),
            };

            if let Err(e) = result {
                failed += 1;
                warn!(
                    group_notification_id = notification.id,
                    device_id = device.id,
                    token = %device.token,
                    error = %e,
                    "Failed to send group notification to device"
                );
            }
        }

        session.close().await;
        Ok(failed)
    }
}
