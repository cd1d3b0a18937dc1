//! `storage_account`
//!
//! The account itself. Every other storage resource locks the account by
//! name, so the account lifecycle takes the same lock. Network rules point
//! at subnets, and the network API only accepts one change per virtual
//! network at a time, so update and delete also lock each referenced
//! virtual network.

use super::{STORAGE_ACCOUNT_RESOURCE, account_lock_key, decode_spec};
use crate::account::AccountCache;
use crate::client::{ControlPlane, get_json, put_json};
use crate::dataplane::{DataPlaneProber, wait_for_data_plane};
use crate::ids::StorageAccountId;
use crate::models::{
    AccountKind, NetworkRuleSet, Sku, SkuTier, StorageAccount, StorageAccountProperties,
    VirtualNetworkRule,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use storeflow_cloud::{
    CloudError, LockRegistry, OperationContext, PollerConfig, ResourceConfig, ResourceId,
    ResourceLifecycle, ResourceState, ResourceStatus, Result,
};

pub const RESOURCE_TYPE: &str = STORAGE_ACCOUNT_RESOURCE;

/// Lock type for virtual networks referenced by network rules
pub const VIRTUAL_NETWORK_RESOURCE: &str = "virtual_network";

/// Host-facing attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageAccountSpec {
    pub name: String,
    pub resource_group_name: String,
    /// Falls back to the provider's subscription
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    pub location: String,
    #[serde(default = "default_kind")]
    pub account_kind: AccountKind,
    #[serde(default = "default_tier")]
    pub account_tier: SkuTier,
    #[serde(default = "default_replication")]
    pub account_replication_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_rules: Option<NetworkRulesSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRulesSpec {
    #[serde(default = "default_action")]
    pub default_action: String,
    #[serde(default)]
    pub virtual_network_subnet_ids: Vec<String>,
}

fn default_kind() -> AccountKind {
    AccountKind::StorageV2
}

fn default_tier() -> SkuTier {
    SkuTier::Standard
}

fn default_replication() -> String {
    "LRS".to_string()
}

fn default_action() -> String {
    "Allow".to_string()
}

impl StorageAccountSpec {
    fn into_account(self) -> StorageAccount {
        StorageAccount {
            id: None,
            name: None,
            location: Some(self.location),
            kind: self.account_kind,
            sku: Sku {
                name: format!(
                    "{}_{}",
                    self.account_tier,
                    self.account_replication_type.to_ascii_uppercase()
                ),
                tier: Some(self.account_tier),
            },
            properties: StorageAccountProperties {
                network_acls: self.network_rules.map(|rules| NetworkRuleSet {
                    default_action: rules.default_action,
                    virtual_network_rules: rules
                        .virtual_network_subnet_ids
                        .into_iter()
                        .map(|id| VirtualNetworkRule {
                            id,
                            action: Some("Allow".to_string()),
                        })
                        .collect(),
                }),
                ..Default::default()
            },
        }
    }
}

/// Subnet ids referenced by an account's network rules
fn subnet_ids(account: &StorageAccount) -> Vec<&str> {
    account
        .properties
        .network_acls
        .iter()
        .flat_map(|acls| acls.virtual_network_rules.iter())
        .map(|rule| rule.id.as_str())
        .collect()
}

/// Distinct virtual network names of `subnet_ids`, sorted
pub fn virtual_network_names<S: AsRef<str>>(subnet_ids: &[S]) -> Result<Vec<String>> {
    let mut names = BTreeSet::new();
    for subnet_id in subnet_ids {
        let id = ResourceId::parse(subnet_id.as_ref())?;
        id.require("subnets")?;
        names.insert(id.require("virtualNetworks")?.to_string());
    }
    Ok(names.into_iter().collect())
}

pub struct StorageAccountResource {
    control_plane: Arc<dyn ControlPlane>,
    locks: Arc<LockRegistry>,
    accounts: Arc<AccountCache>,
    prober: Arc<dyn DataPlaneProber>,
    poller: PollerConfig,
    data_plane_available: bool,
    subscription_id: Option<String>,
}

impl StorageAccountResource {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        locks: Arc<LockRegistry>,
        accounts: Arc<AccountCache>,
        prober: Arc<dyn DataPlaneProber>,
    ) -> Self {
        Self {
            control_plane,
            locks,
            accounts,
            prober,
            poller: PollerConfig::default(),
            data_plane_available: true,
            subscription_id: None,
        }
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_data_plane(mut self, available: bool) -> Self {
        self.data_plane_available = available;
        self
    }

    /// Subscription for accounts whose config doesn't name one
    pub fn with_subscription(mut self, subscription_id: Option<String>) -> Self {
        self.subscription_id = subscription_id;
        self
    }

    fn account_id(
        &self,
        config: &ResourceConfig,
        spec: &StorageAccountSpec,
    ) -> Result<StorageAccountId> {
        let subscription = spec
            .subscription_id
            .clone()
            .or_else(|| self.subscription_id.clone())
            .ok_or_else(|| {
                CloudError::InvalidConfig(format!(
                    "{}: `subscription_id` is not set and the provider has no default",
                    config.key()
                ))
            })?;
        Ok(StorageAccountId::new(
            subscription,
            &spec.resource_group_name,
            &spec.name,
        ))
    }

    /// Current account document, `None` when it doesn't exist
    async fn existing(
        &self,
        ctx: &OperationContext,
        id: &StorageAccountId,
    ) -> Result<Option<StorageAccount>> {
        match get_json::<StorageAccount>(&*self.control_plane, ctx, &id.resource_id()).await {
            Ok(account) => Ok(Some(account)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn state(id: &StorageAccountId, account: &StorageAccount) -> ResourceState {
        let endpoints = &account.properties.primary_endpoints;
        let network_rules = account.properties.network_acls.as_ref().map(|acls| {
            json!({
                "default_action": acls.default_action,
                "virtual_network_subnet_ids": subnet_ids(account),
            })
        });

        let mut state = ResourceState::new(id.to_string(), RESOURCE_TYPE)
            .with_status(ResourceStatus::Active)
            .with_attribute("name", json!(id.name))
            .with_attribute("resource_group_name", json!(id.resource_group))
            .with_attribute("subscription_id", json!(id.subscription_id))
            .with_attribute("location", json!(account.location))
            .with_attribute("account_kind", json!(account.kind.to_string()))
            .with_attribute("account_tier", json!(account.sku.tier().to_string()))
            .with_attribute("account_replication_type", json!(account.sku.replication()))
            .with_attribute("primary_blob_endpoint", json!(endpoints.blob))
            .with_attribute("primary_queue_endpoint", json!(endpoints.queue))
            .with_attribute("primary_table_endpoint", json!(endpoints.table))
            .with_attribute("primary_file_endpoint", json!(endpoints.file))
            .with_attribute("primary_web_endpoint", json!(endpoints.web));
        if let Some(rules) = network_rules {
            state.set_attribute("network_rules", rules);
        }
        state
    }
}

#[async_trait]
impl ResourceLifecycle for StorageAccountResource {
    fn resource_type(&self) -> &str {
        RESOURCE_TYPE
    }

    async fn create(&self, ctx: &OperationContext, config: &ResourceConfig) -> Result<ResourceState> {
        let spec: StorageAccountSpec = decode_spec(config)?;
        let id = self.account_id(config, &spec)?;
        let _lock = self.locks.acquire(ctx, account_lock_key(&id)).await?;

        if self.existing(ctx, &id).await?.is_some() {
            return Err(CloudError::AlreadyExists(format!(
                "{} already exists and has to be imported",
                id
            )));
        }

        let stored = put_json(
            &*self.control_plane,
            ctx,
            &id.resource_id(),
            &spec.into_account(),
        )
        .await?;
        tracing::info!("Created storage account {}", id.name);

        // A previous account with this id may still be cached
        self.accounts.remove(&id);
        let details = self.accounts.find(ctx, &*self.control_plane, &id).await?;
        let services = wait_for_data_plane(
            ctx,
            self.prober.clone(),
            &self.poller,
            &details,
            self.data_plane_available,
        )
        .await?;
        tracing::debug!("Data plane of {} available for {:?}", id.name, services);

        Ok(Self::state(&id, &stored))
    }

    async fn read(&self, ctx: &OperationContext, id: &str) -> Result<Option<ResourceState>> {
        let id = StorageAccountId::parse(id)?;
        match self.existing(ctx, &id).await? {
            Some(account) => Ok(Some(Self::state(&id, &account))),
            None => {
                tracing::info!("Storage account {} was not found, removing from state", id);
                self.accounts.remove(&id);
                Ok(None)
            }
        }
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        id: &str,
        config: &ResourceConfig,
    ) -> Result<ResourceState> {
        let id = StorageAccountId::parse(id)?;
        let spec: StorageAccountSpec = decode_spec(config)?;
        if !spec.name.eq_ignore_ascii_case(&id.name)
            || !spec.resource_group_name.eq_ignore_ascii_case(&id.resource_group)
        {
            return Err(CloudError::InvalidConfig(format!(
                "{} cannot be moved to {}/{}; it has to be replaced",
                id, spec.resource_group_name, spec.name
            )));
        }

        let _lock = self.locks.acquire(ctx, account_lock_key(&id)).await?;
        let Some(current) = self.existing(ctx, &id).await? else {
            return Err(CloudError::NotFound(format!(
                "storage account {} was removed outside of this provider",
                id
            )));
        };

        // Rules being dropped touch their networks as much as rules being added
        let desired = spec.into_account();
        let mut subnets = subnet_ids(&current);
        subnets.extend(subnet_ids(&desired));
        let networks = virtual_network_names(&subnets)?;
        let _network_locks = self
            .locks
            .acquire_multiple_by_name(ctx, &networks, VIRTUAL_NETWORK_RESOURCE)
            .await?;

        let stored = put_json(&*self.control_plane, ctx, &id.resource_id(), &desired).await?;
        self.accounts.remove(&id);
        tracing::info!("Updated storage account {}", id.name);

        Ok(Self::state(&id, &stored))
    }

    async fn delete(&self, ctx: &OperationContext, id: &str) -> Result<()> {
        let id = StorageAccountId::parse(id)?;
        let _lock = self.locks.acquire(ctx, account_lock_key(&id)).await?;

        let Some(current) = self.existing(ctx, &id).await? else {
            self.accounts.remove(&id);
            return Ok(());
        };

        let networks = virtual_network_names(&subnet_ids(&current))?;
        let _network_locks = self
            .locks
            .acquire_multiple_by_name(ctx, &networks, VIRTUAL_NETWORK_RESOURCE)
            .await?;

        match self.control_plane.delete(ctx, &id.resource_id()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.accounts.remove(&id);
        tracing::info!("Deleted storage account {}", id.name);
        Ok(())
    }
}
