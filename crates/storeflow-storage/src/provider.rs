//! Storage provider: the host-facing entry point
//!
//! Holds the shared lock registry, the remote clients and one
//! [`ResourceLifecycle`] per resource type, and turns each host call into a
//! per-operation context with the configured timeout.

use crate::account::AccountCache;
use crate::client::{ArmClient, ControlPlane};
use crate::dataplane::{DataPlaneClient, DataPlaneProber, HttpDataPlaneProber};
use crate::ids::StorageAccountId;
use crate::resources::{
    ManagementPolicyRuleResource, ObjectReplicationResource, SharePropertiesResource,
    StorageAccountResource,
};
use anyhow::{Context, anyhow};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use storeflow_cloud::{
    Compensation, LockRegistry, OperationContext, OperationKind, PollerConfig, ResourceConfig,
    ResourceLifecycle, ResourceState, Timeouts,
};
use storeflow_config::{PollerSettings, ProviderConfig, TimeoutSettings};
use tokio_util::sync::CancellationToken;

fn timeouts(settings: &TimeoutSettings) -> Timeouts {
    Timeouts {
        create: settings.create(),
        read: settings.read(),
        update: settings.update(),
        delete: settings.delete(),
    }
}

fn poller_config(settings: &PollerSettings) -> PollerConfig {
    PollerConfig {
        initial_delay: Duration::from_secs(settings.initial_delay_secs),
        poll_interval: Duration::from_secs(settings.interval_secs),
        max_interval: Duration::from_secs(settings.max_interval_secs),
        backoff_multiplier: settings.backoff_multiplier,
        dropped_connection_tolerance: settings.dropped_connection_tolerance,
    }
}

pub struct StorageProvider {
    config: ProviderConfig,
    locks: Arc<LockRegistry>,
    control_plane: Arc<dyn ControlPlane>,
    prober: Arc<dyn DataPlaneProber>,
    accounts: Arc<AccountCache>,
    resources: HashMap<String, Arc<dyn ResourceLifecycle>>,
    stop: CancellationToken,
}

impl StorageProvider {
    pub fn new(
        config: ProviderConfig,
        control_plane: Arc<dyn ControlPlane>,
        prober: Arc<dyn DataPlaneProber>,
    ) -> Self {
        let locks = Arc::new(LockRegistry::new());
        let accounts = Arc::new(AccountCache::new());
        let compensation = if config.features.compensate_partial_replication {
            Compensation::DeleteDestination
        } else {
            Compensation::None
        };

        let resources: Vec<Arc<dyn ResourceLifecycle>> = vec![
            Arc::new(
                StorageAccountResource::new(
                    control_plane.clone(),
                    locks.clone(),
                    accounts.clone(),
                    prober.clone(),
                )
                .with_poller(poller_config(&config.poller))
                .with_data_plane(config.features.data_plane_available)
                .with_subscription(config.subscription_id.clone()),
            ),
            Arc::new(ManagementPolicyRuleResource::new(
                control_plane.clone(),
                locks.clone(),
            )),
            Arc::new(ObjectReplicationResource::new(
                control_plane.clone(),
                locks.clone(),
                compensation,
            )),
            Arc::new(
                SharePropertiesResource::new(
                    control_plane.clone(),
                    locks.clone(),
                    accounts.clone(),
                    prober.clone(),
                )
                .with_poller(poller_config(&config.poller))
                .with_data_plane(config.features.data_plane_available),
            ),
        ];

        Self {
            resources: resources
                .into_iter()
                .map(|r| (r.resource_type().to_string(), r))
                .collect(),
            config,
            locks,
            control_plane,
            prober,
            accounts,
            stop: CancellationToken::new(),
        }
    }

    /// Provider talking to the real control and data planes
    ///
    /// `token` is a bearer credential for the management endpoint.
    pub fn connect(config: ProviderConfig, token: impl Into<String>) -> crate::Result<Self> {
        config.validate()?;
        let control_plane = Arc::new(ArmClient::new(&config.management_endpoint, token));
        let prober = Arc::new(HttpDataPlaneProber::new()?);
        Ok(Self::new(config, control_plane, prober))
    }

    /// Load `storeflow.yaml` (or defaults) and connect
    pub fn from_environment(token: impl Into<String>) -> crate::Result<Self> {
        let config = storeflow_config::load()?;
        Self::connect(config, token)
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    pub fn accounts(&self) -> &Arc<AccountCache> {
        &self.accounts
    }

    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.resources.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Signal every in-flight operation to stop
    pub fn stop(&self) {
        tracing::info!("Stop requested, cancelling in-flight operations");
        self.stop.cancel();
    }

    fn context(&self, kind: OperationKind) -> OperationContext {
        OperationContext::for_operation(kind, &timeouts(&self.config.timeouts), &self.stop)
    }

    fn resource(&self, resource_type: &str) -> anyhow::Result<&Arc<dyn ResourceLifecycle>> {
        self.resources
            .get(resource_type)
            .ok_or_else(|| anyhow!("unsupported resource type: {}", resource_type))
    }

    pub async fn create(&self, config: &ResourceConfig) -> anyhow::Result<ResourceState> {
        let resource = self.resource(&config.resource_type)?;
        let ctx = self.context(OperationKind::Create);
        tracing::debug!("create {}", config.key());
        resource
            .create(&ctx, config)
            .await
            .with_context(|| format!("creating {}", config.key()))
    }

    pub async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> anyhow::Result<Option<ResourceState>> {
        let resource = self.resource(resource_type)?;
        let ctx = self.context(OperationKind::Read);
        resource
            .read(&ctx, id)
            .await
            .with_context(|| format!("reading {} {}", resource_type, id))
    }

    pub async fn update(&self, id: &str, config: &ResourceConfig) -> anyhow::Result<ResourceState> {
        let resource = self.resource(&config.resource_type)?;
        let ctx = self.context(OperationKind::Update);
        tracing::debug!("update {} ({})", config.key(), id);
        resource
            .update(&ctx, id, config)
            .await
            .with_context(|| format!("updating {} {}", config.key(), id))
    }

    pub async fn delete(&self, resource_type: &str, id: &str) -> anyhow::Result<()> {
        let resource = self.resource(resource_type)?;
        let ctx = self.context(OperationKind::Delete);
        tracing::debug!("delete {} {}", resource_type, id);
        resource
            .delete(&ctx, id)
            .await
            .with_context(|| format!("deleting {} {}", resource_type, id))
    }

    pub async fn import(&self, resource_type: &str, id: &str) -> anyhow::Result<ResourceState> {
        let resource = self.resource(resource_type)?;
        let ctx = self.context(OperationKind::Import);
        resource
            .import(&ctx, id)
            .await
            .with_context(|| format!("importing {} {}", resource_type, id))
    }

    /// Data-plane handle for an account, after its endpoints answered
    pub async fn data_plane_client(&self, account_id: &str) -> anyhow::Result<DataPlaneClient> {
        let id = StorageAccountId::parse(account_id)?;
        let ctx = self.context(OperationKind::Read);
        let details = self
            .accounts
            .find(&ctx, &*self.control_plane, &id)
            .await
            .with_context(|| format!("looking up storage account {}", id.name))?;

        DataPlaneClient::connect(
            &ctx,
            self.prober.clone(),
            &poller_config(&self.config.poller),
            details,
            self.config.features.data_plane_available,
        )
        .await
        .with_context(|| format!("waiting for the data plane of {}", id.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_conversion() {
        let config = ProviderConfig::default();
        let t = timeouts(&config.timeouts);
        assert_eq!(t.for_kind(OperationKind::Import), Duration::from_secs(300));
        assert_eq!(t.create, Duration::from_secs(3600));

        let p = poller_config(&config.poller);
        assert_eq!(p.initial_delay, Duration::from_secs(10));
        assert_eq!(p.dropped_connection_tolerance, 3);
    }

    #[test]
    fn test_connect_rejects_invalid_config() {
        let mut config = ProviderConfig::default();
        config.timeouts.create = 0;
        assert!(StorageProvider::connect(config, "token").is_err());
    }
}
