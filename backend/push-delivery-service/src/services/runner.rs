//! Runs delivery, group delivery and feedback for every configured app.
//!
//! Scopes are processed concurrently, each with its own credential and
//! sessions. Runs that target the same scope are serialized so a device is
//! never mutated by two passes at once.

use std::future::Future;
use std::sync::Arc;

use apns_gateway::GatewayConnector;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::{
    DeliveryCoordinator, FeedbackProcessor, FeedbackReport, GroupDeliveryBatcher,
    GroupDeliveryReport, PassReport,
};
use crate::config::DeliveryConfig;
use crate::credentials::{resolve_credential, CredentialStore};
use crate::error::{DeliveryError, DeliveryResult};
use crate::models::DeliveryScope;
use crate::store::DeliveryStore;

/// Per-scope outcomes of one runner invocation.
#[derive(Debug)]
pub struct RunSummary<T> {
    pub outcomes: Vec<(DeliveryScope, DeliveryResult<T>)>,
}

impl<T> RunSummary<T> {
    pub fn failures(&self) -> impl Iterator<Item = (DeliveryScope, &DeliveryError)> {
        self.outcomes
            .iter()
            .filter_map(|(scope, outcome)| outcome.as_ref().err().map(|e| (*scope, e)))
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn successes(&self) -> impl Iterator<Item = (DeliveryScope, &T)> {
        self.outcomes
            .iter()
            .filter_map(|(scope, outcome)| outcome.as_ref().ok().map(|r| (*scope, r)))
    }
}

pub struct DeliveryRunner<S, C> {
    store: Arc<S>,
    credentials: Arc<dyn CredentialStore>,
    coordinator: DeliveryCoordinator<S, C>,
    batcher: GroupDeliveryBatcher<S, C>,
    feedback: FeedbackProcessor<S, C>,
    scope_locks: DashMap<DeliveryScope, Arc<Mutex<()>>>,
}

impl<S, C> DeliveryRunner<S, C>
where
    S: DeliveryStore,
    C: GatewayConnector,
{
    pub fn new(
        store: Arc<S>,
        connector: Arc<C>,
        credentials: Arc<dyn CredentialStore>,
        config: Arc<DeliveryConfig>,
    ) -> Self {
        Self {
            coordinator: DeliveryCoordinator::new(store.clone(), connector.clone(), config.clone()),
            batcher: GroupDeliveryBatcher::new(store.clone(), connector.clone(), config.clone()),
            feedback: FeedbackProcessor::new(store.clone(), connector, config),
            store,
            credentials,
            scope_locks: DashMap::new(),
        }
    }

    pub fn coordinator(&self) -> &DeliveryCoordinator<S, C> {
        &self.coordinator
    }

    /// Per-device delivery for every app, then for devices without an app
    /// when a default certificate is configured.
    pub async fn send_all(&self) -> DeliveryResult<RunSummary<PassReport>> {
        let scopes = self.scopes(true).await?;
        Ok(self.run_scopes(scopes, |scope| self.deliver_scope(scope)).await)
    }

    /// Group delivery for every app.
    pub async fn send_all_groups(&self) -> DeliveryResult<RunSummary<Vec<GroupDeliveryReport>>> {
        let scopes = self.scopes(false).await?;
        Ok(self
            .run_scopes(scopes, |scope| self.deliver_groups(scope))
            .await)
    }

    /// Feedback for every app certificate, then the default certificate.
    pub async fn process_all_feedback(&self) -> DeliveryResult<RunSummary<FeedbackReport>> {
        let scopes = self.scopes(true).await?;
        Ok(self
            .run_scopes(scopes, |scope| self.process_feedback(scope))
            .await)
    }

    /// One per-device pass for `scope`, serialized with other runs on the
    /// same scope.
    pub async fn deliver_scope(&self, scope: DeliveryScope) -> DeliveryResult<PassReport> {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock().await;

        let credential = resolve_credential(self.credentials.as_ref(), scope)?;
        self.coordinator.deliver(&credential, scope).await
    }

    async fn deliver_groups(&self, scope: DeliveryScope) -> DeliveryResult<Vec<GroupDeliveryReport>> {
        let Some(app_id) = scope.app_id() else {
            return Ok(Vec::new());
        };
        let lock = self.scope_lock(scope);
        let _guard = lock.lock().await;

        let credential = resolve_credential(self.credentials.as_ref(), scope)?;
        self.batcher.deliver_pending(app_id, &credential).await
    }

    async fn process_feedback(&self, scope: DeliveryScope) -> DeliveryResult<FeedbackReport> {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock().await;

        let credential = resolve_credential(self.credentials.as_ref(), scope)?;
        self.feedback.process_devices(&credential).await
    }

    fn scope_lock(&self, scope: DeliveryScope) -> Arc<Mutex<()>> {
        self.scope_locks.entry(scope).or_default().clone()
    }

    async fn scopes(&self, include_global: bool) -> DeliveryResult<Vec<DeliveryScope>> {
        let mut scopes: Vec<DeliveryScope> = self
            .store
            .list_apps()
            .await?
            .into_iter()
            .map(|app| DeliveryScope::App(app.id))
            .collect();

        if include_global && self.credentials.default_certificate()?.is_some() {
            scopes.push(DeliveryScope::Global);
        }
        Ok(scopes)
    }

    async fn run_scopes<'a, T, F, Fut>(&'a self, scopes: Vec<DeliveryScope>, run: F) -> RunSummary<T>
    where
        F: Fn(DeliveryScope) -> Fut,
        Fut: Future<Output = DeliveryResult<T>> + 'a,
    {
        let runs = scopes.into_iter().map(|scope| {
            let fut = run(scope);
            async move { (scope, fut.await) }
        });
        let outcomes = join_all(runs).await;

        for (scope, outcome) in &outcomes {
            if let Err(e) = outcome {
                error!(%scope, error = %e, "Scope failed");
            }
        }
        info!(
            scopes = outcomes.len(),
            failed = outcomes.iter().filter(|(_, o)| o.is_err()).count(),
            "Run finished"
        );

        RunSummary { outcomes }
    }
}
