use std::sync::Arc;

use apns_gateway::{Credential, GatewayConnector};
use tracing::{debug, error, info};

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, DeliveryResult};
use crate::models::DeviceFeedbackRecord;
use crate::store::DeliveryStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackReport {
    /// Records read from the feedback service
    pub received: usize,
    /// Devices deleted because they had not re-registered since the report
    pub removed: usize,
    /// Devices kept because they re-registered after the report
    pub retained: usize,
    /// Records naming a token no stored device has
    pub unknown_devices: usize,
}

/// Reads the feedback service and removes devices that were uninstalled
/// and have not registered again since.
pub struct FeedbackProcessor<S, C> {
    store: Arc<S>,
    connector: Arc<C>,
    config: Arc<DeliveryConfig>,
}

impl<S, C> FeedbackProcessor<S, C>
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

    pub async fn process_devices(&self, credential: &Credential) -> DeliveryResult<FeedbackReport> {
        let endpoint = &self.config.feedback;
        let session = self
            .connector
            .connect(credential, endpoint)
            .await
            .map_err(|e| {
                error!(endpoint = %endpoint, error = %e, "Failed to open feedback session");
                DeliveryError::ConnectionFailure {
                    endpoint: endpoint.to_string(),
                    source: e,
                }
            })?;

        let mut stream = session.into_feedback_stream();
        let mut report = FeedbackReport::default();

        while let Some(entry) = stream.next_entry().await? {
            report.received += 1;
            self.apply(DeviceFeedbackRecord::from(entry), &mut report)
                .await?;
        }

        info!(
            received = report.received,
            removed = report.removed,
            retained = report.retained,
            unknown = report.unknown_devices,
            "Feedback processed"
        );
        Ok(report)
    }

    async fn apply(
        &self,
        record: DeviceFeedbackRecord,
        report: &mut FeedbackReport,
    ) -> DeliveryResult<()> {
        let Some(device) = self.store.find_device_by_token(&record.token).await? else {
            debug!(token = %record.token, "Feedback for unknown device");
            report.unknown_devices += 1;
            return Ok(());
        };

        let Some(last_registered_at) = self.store.last_registered_at(device.id).await? else {
            report.unknown_devices += 1;
            return Ok(());
        };

        if last_registered_at < record.feedback_at {
            if self.store.delete_device(device.id).await? {
                report.removed += 1;
                info!(
                    device_id = device.id,
                    token = %record.token,
                    feedback_at = %record.feedback_at,
                    %last_registered_at,
                    "Removing uninstalled device"
                );
            }
        } else {
            report.retained += 1;
            debug!(
                device_id = device.id,
                %last_registered_at,
                "Device re-registered after feedback, keeping it"
            );
        }
        Ok(())
    }
}
