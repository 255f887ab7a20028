//! Per-device delivery over the enhanced frame format.
//!
//! A pass writes every pending notification of one scope over one session,
//! stamping each as sent right after its write and then waiting a bounded
//! time for an error response. An invalid-token response removes the
//! offending device and restarts the pass on a fresh session.

use std::sync::Arc;

use apns_gateway::{Credential, GatewayConnector, GatewaySession};
use apns_wire::{decode_error_response, expiry_from_now, ErrorCode, ERROR_RESPONSE_LEN};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{DeliveryScope, Notification};
use crate::store::DeliveryStore;

/// Counters for one delivery run, summed over restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Notifications picked up, counted again after each restart
    pub attempted: usize,
    pub sent: usize,
    pub encoding_failures: usize,
    pub write_failures: usize,
    /// Non-zero error responses received
    pub peer_errors: usize,
    pub devices_removed: usize,
    pub restarts: usize,
}

impl PassReport {
    fn absorb(&mut self, other: PassReport) {
        self.attempted += other.attempted;
        self.sent += other.sent;
        self.encoding_failures += other.encoding_failures;
        self.write_failures += other.write_failures;
        self.peer_errors += other.peer_errors;
        self.devices_removed += other.devices_removed;
        self.restarts += other.restarts;
    }
}

enum PassOutcome {
    Completed,
    /// An invalid device was removed; the remaining work starts over
    Restart,
}

pub struct DeliveryCoordinator<S, C> {
    store: Arc<S>,
    connector: Arc<C>,
    config: Arc<DeliveryConfig>,
}

impl<S, C> DeliveryCoordinator<S, C>
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

    /// Deliver every pending notification of `scope`.
    ///
    /// Connection failures abort the run and are returned; everything that
    /// goes wrong for a single notification is logged and counted instead.
    pub async fn deliver(
        &self,
        credential: &Credential,
        scope: DeliveryScope,
    ) -> DeliveryResult<PassReport> {
        let mut report = PassReport::default();

        loop {
            match self.run_pass(credential, scope, &mut report).await? {
                PassOutcome::Completed => break,
                PassOutcome::Restart => {
                    report.restarts += 1;
                    info!(%scope, restarts = report.restarts, "Restarting delivery pass");
                }
            }
        }

        info!(
            %scope,
            attempted = report.attempted,
            sent = report.sent,
            write_failures = report.write_failures,
            devices_removed = report.devices_removed,
            "Delivery finished"
        );
        Ok(report)
    }

    async fn run_pass(
        &self,
        credential: &Credential,
        scope: DeliveryScope,
        report: &mut PassReport,
    ) -> DeliveryResult<PassOutcome> {
        let pending = self.store.find_pending_notifications(scope).await?;
        if pending.is_empty() {
            debug!(%scope, "No pending notifications");
            return Ok(PassOutcome::Completed);
        }

        let endpoint = &self.config.gateway;
        let mut session = match self.connector.connect(credential, endpoint).await {
            Ok(session) => session,
            Err(e) => {
                error!(%scope, endpoint = %endpoint, error = %e, "Failed to open gateway session");
                return Err(DeliveryError::ConnectionFailure {
                    endpoint: endpoint.to_string(),
                    source: e,
                });
            }
        };

        let mut pass = PassReport::default();
        let mut outcome = PassOutcome::Completed;

        for notification in &pending {
            pass.attempted += 1;
            if self.send_one(&mut session, notification, &mut pass).await? {
                outcome = PassOutcome::Restart;
                break;
            }
        }

        session.close().await;
        report.absorb(pass);
        Ok(outcome)
    }

    /// Write one notification and check for an error response.
    ///
    /// Returns `true` when a device was removed and the pass must restart.
    async fn send_one(
        &self,
        session: &mut GatewaySession,
        notification: &Notification,
        pass: &mut PassReport,
    ) -> DeliveryResult<bool> {
        let expiry = expiry_from_now(self.config.notification_expiration);
        let frame = match notification.enhanced_message_for_sending(expiry) {
            Ok(frame) => frame,
            Err(e) => {
                pass.encoding_failures += 1;
                error!(
                    notification_id = notification.id,
                    device_id = notification.device_id,
                    error = %e,
                    "Failed to encode notification, skipping"
                );
                return Ok(false);
            }
        };

        if let Err(e) = session.write(&frame).await {
            pass.write_failures += 1;
            warn!(
                notification_id = notification.id,
                device_id = notification.device_id,
                token = %notification.token,
                error = %e,
                "Failed to write notification"
            );
            return Ok(false);
        }

        pass.sent += 1;
        if let Err(e) = self.store.mark_sent(notification.id, Utc::now()).await {
            error!(
                notification_id = notification.id,
                error = %e,
                "Failed to mark notification as sent (notification was written)"
            );
        }

        let response = match session
            .read_with_timeout(ERROR_RESPONSE_LEN, self.config.response_timeout)
            .await
        {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(notification_id = notification.id, error = %e, "Failed to read error response");
                return Ok(false);
            }
        };

        let response = match decode_error_response(&response) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Malformed error response");
                return Ok(false);
            }
        };

        if !response.status.is_error() {
            debug!(notification_id = response.notification_id, "Gateway reported no error");
            return Ok(false);
        }

        pass.peer_errors += 1;
        warn!(
            code = response.status.code(),
            description = %response.status.description(),
            notification_id = response.notification_id,
            "Gateway rejected notification"
        );

        if response.status != ErrorCode::InvalidToken {
            return Ok(false);
        }

        self.remove_invalid_device(i64::from(response.notification_id), pass)
            .await
    }

    async fn remove_invalid_device(
        &self,
        notification_id: i64,
        pass: &mut PassReport,
    ) -> DeliveryResult<bool> {
        let Some(rejected) = self.store.find_notification(notification_id).await? else {
            warn!(notification_id, "Rejected notification no longer exists");
            return Ok(false);
        };

        if !self.store.delete_device(rejected.device_id).await? {
            debug!(device_id = rejected.device_id, "Device was already removed");
            return Ok(false);
        }

        pass.devices_removed += 1;
        info!(
            device_id = rejected.device_id,
            token = %rejected.token,
            notification_id,
            "Removing invalid device"
        );
        Ok(true)
    }
}
