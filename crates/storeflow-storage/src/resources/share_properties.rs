//! `storage_account_share_properties`
//!
//! File service properties of an account. The properties are only
//! accepted once the account's file endpoint is serving, so create waits
//! on it with the availability poller before writing anything.

use super::{account_attribute, account_lock_key, decode_spec};
use crate::account::{AccountCache, AccountDetails};
use crate::client::{ControlPlane, get_json, put_json};
use crate::dataplane::{DataPlaneProber, DataPlaneService, wait_for_service};
use crate::error::StorageError;
use crate::ids::{SharePropertiesId, StorageAccountId};
use crate::models::{
    CorsRule, CorsRules, DeleteRetentionPolicy, FileServiceProperties, FileServicePropertiesBody,
    Multichannel, ProtocolSettings, SkuTier, SmbSetting,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storeflow_cloud::{
    CloudError, LockRegistry, OperationContext, PollerConfig, ResourceConfig, ResourceLifecycle,
    ResourceState, ResourceStatus, Result,
};

pub const RESOURCE_TYPE: &str = "storage_account_share_properties";

/// Host-facing attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharePropertiesSpec {
    #[serde(default)]
    pub cors_rule: Vec<CorsRuleSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_policy: Option<RetentionPolicySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smb: Option<SmbSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorsRuleSpec {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub exposed_headers: Vec<String>,
    #[serde(default)]
    pub max_age_in_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicySpec {
    #[serde(default = "default_retention_days")]
    pub days: u32,
}

fn default_retention_days() -> u32 {
    7
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmbSpec {
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub authentication_types: Vec<String>,
    #[serde(default)]
    pub kerberos_ticket_encryption_type: Vec<String>,
    #[serde(default)]
    pub channel_encryption_type: Vec<String>,
    /// Premium tier only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multichannel_enabled: Option<bool>,
}

fn join(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(";"))
    }
}

fn split(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .map(|v| v.split(';').filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

impl SharePropertiesSpec {
    /// Service defaults for an account of the given tier
    ///
    /// Premium accounts carry a multichannel setting, so resetting one means
    /// switching it off explicitly.
    pub fn defaults_for(tier: SkuTier) -> Self {
        match tier {
            SkuTier::Premium => Self {
                smb: Some(SmbSpec {
                    multichannel_enabled: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            },
            SkuTier::Standard => Self::default(),
        }
    }

    /// Build the wire document for an account of the given tier
    ///
    /// Standard tier accounts reject any multichannel setting: enabling it is
    /// an error, an explicit `false` is dropped from the payload.
    pub fn into_properties(self, tier: SkuTier) -> Result<FileServiceProperties> {
        let smb = match self.smb {
            Some(smb) => {
                let multichannel = match (tier, smb.multichannel_enabled) {
                    (SkuTier::Premium, Some(enabled)) => Some(Multichannel { enabled }),
                    (_, Some(true)) => {
                        return Err(CloudError::RemoteValidation(
                            "`multichannel_enabled` isn't supported for Standard tier storage accounts"
                                .to_string(),
                        ));
                    }
                    _ => None,
                };
                Some(SmbSetting {
                    versions: join(&smb.versions),
                    authentication_methods: join(&smb.authentication_types),
                    kerberos_ticket_encryption: join(&smb.kerberos_ticket_encryption_type),
                    channel_encryption: join(&smb.channel_encryption_type),
                    multichannel,
                })
            }
            None => None,
        };

        Ok(FileServiceProperties {
            id: None,
            properties: FileServicePropertiesBody {
                cors: Some(CorsRules {
                    cors_rules: self
                        .cors_rule
                        .into_iter()
                        .map(|c| CorsRule {
                            allowed_origins: c.allowed_origins,
                            allowed_methods: c.allowed_methods,
                            allowed_headers: c.allowed_headers,
                            exposed_headers: c.exposed_headers,
                            max_age_in_seconds: c.max_age_in_seconds,
                        })
                        .collect(),
                }),
                share_delete_retention_policy: Some(match self.retention_policy {
                    Some(policy) => DeleteRetentionPolicy {
                        enabled: true,
                        days: Some(policy.days),
                    },
                    None => DeleteRetentionPolicy {
                        enabled: false,
                        days: None,
                    },
                }),
                protocol_settings: smb.map(|smb| ProtocolSettings { smb: Some(smb) }),
            },
        })
    }

    pub fn from_properties(props: &FileServiceProperties) -> Self {
        let body = &props.properties;
        let smb = body
            .protocol_settings
            .as_ref()
            .and_then(|p| p.smb.as_ref())
            .map(|smb| SmbSpec {
                versions: split(&smb.versions),
                authentication_types: split(&smb.authentication_methods),
                kerberos_ticket_encryption_type: split(&smb.kerberos_ticket_encryption),
                channel_encryption_type: split(&smb.channel_encryption),
                multichannel_enabled: smb.multichannel.as_ref().map(|m| m.enabled),
            });

        Self {
            cors_rule: body
                .cors
                .as_ref()
                .map(|c| {
                    c.cors_rules
                        .iter()
                        .map(|r| CorsRuleSpec {
                            allowed_origins: r.allowed_origins.clone(),
                            allowed_methods: r.allowed_methods.clone(),
                            allowed_headers: r.allowed_headers.clone(),
                            exposed_headers: r.exposed_headers.clone(),
                            max_age_in_seconds: r.max_age_in_seconds,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            retention_policy: body
                .share_delete_retention_policy
                .as_ref()
                .filter(|p| p.enabled)
                .map(|p| RetentionPolicySpec {
                    days: p.days.unwrap_or_else(default_retention_days),
                }),
            smb,
        }
    }
}

pub struct SharePropertiesResource {
    control_plane: Arc<dyn ControlPlane>,
    locks: Arc<LockRegistry>,
    accounts: Arc<AccountCache>,
    prober: Arc<dyn DataPlaneProber>,
    poller: PollerConfig,
    data_plane_available: bool,
}

impl SharePropertiesResource {
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

    /// Account details, if the account can hold file shares
    async fn share_capable_account(
        &self,
        ctx: &OperationContext,
        account_id: &StorageAccountId,
    ) -> Result<AccountDetails> {
        let details = self
            .accounts
            .find(ctx, &*self.control_plane, account_id)
            .await?;
        if !details.support_level().share {
            return Err(StorageError::Unsupported {
                resource: RESOURCE_TYPE.to_string(),
                kind: details.kind.to_string(),
                tier: details.tier.to_string(),
            }
            .into());
        }
        Ok(details)
    }

    async fn write(
        &self,
        ctx: &OperationContext,
        account_id: &StorageAccountId,
        spec: SharePropertiesSpec,
        wait_for_endpoint: bool,
    ) -> Result<FileServiceProperties> {
        let _lock = self.locks.acquire(ctx, account_lock_key(account_id)).await?;
        let details = self.share_capable_account(ctx, account_id).await?;

        if wait_for_endpoint {
            if self.data_plane_available {
                let report = wait_for_service(
                    ctx,
                    self.prober.clone(),
                    &self.poller,
                    &details,
                    DataPlaneService::File,
                )
                .await?;
                tracing::debug!(
                    "File service of {} available after {} probes",
                    account_id.name,
                    report.attempts
                );
            } else {
                tracing::debug!(
                    "Data plane disabled, writing share properties of {} without waiting",
                    account_id.name
                );
            }
        }

        let properties = spec.into_properties(details.tier)?;
        put_json(
            &*self.control_plane,
            ctx,
            &account_id.file_service(),
            &properties,
        )
        .await
    }

    fn state(id: &SharePropertiesId, props: &FileServiceProperties) -> Result<ResourceState> {
        let spec = serde_json::to_value(SharePropertiesSpec::from_properties(props))?;
        let mut state = ResourceState::new(id.to_string(), RESOURCE_TYPE)
            .with_status(ResourceStatus::Active)
            .with_attribute("storage_account_id", serde_json::json!(id.to_string()));
        if let serde_json::Value::Object(fields) = spec {
            for (key, value) in fields {
                state.set_attribute(key, value);
            }
        }
        Ok(state)
    }
}

#[async_trait]
impl ResourceLifecycle for SharePropertiesResource {
    fn resource_type(&self) -> &str {
        RESOURCE_TYPE
    }

    async fn create(&self, ctx: &OperationContext, config: &ResourceConfig) -> Result<ResourceState> {
        let account_id = account_attribute(config, "storage_account_id")?;
        let spec: SharePropertiesSpec = decode_spec(config)?;

        let stored = self.write(ctx, &account_id, spec, true).await?;
        tracing::info!("Set share properties of {}", account_id.name);
        Self::state(&account_id, &stored)
    }

    async fn read(&self, ctx: &OperationContext, id: &str) -> Result<Option<ResourceState>> {
        let account_id = StorageAccountId::parse(id)?;
        match get_json::<FileServiceProperties>(&*self.control_plane, ctx, &account_id.file_service())
            .await
        {
            Ok(props) => Ok(Some(Self::state(&account_id, &props)?)),
            Err(e) if e.is_not_found() => {
                tracing::info!("Share properties of {} not found, removing from state", account_id);
                self.accounts.remove(&account_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        id: &str,
        config: &ResourceConfig,
    ) -> Result<ResourceState> {
        let account_id = StorageAccountId::parse(id)?;
        let spec: SharePropertiesSpec = decode_spec(config)?;

        let stored = self.write(ctx, &account_id, spec, false).await?;
        tracing::info!("Updated share properties of {}", account_id.name);
        Self::state(&account_id, &stored)
    }

    /// Share properties cannot be removed, only reset to the service defaults
    async fn delete(&self, ctx: &OperationContext, id: &str) -> Result<()> {
        let account_id = StorageAccountId::parse(id)?;
        let _lock = self.locks.acquire(ctx, account_lock_key(&account_id)).await?;

        let details = match self
            .accounts
            .find(ctx, &*self.control_plane, &account_id)
            .await
        {
            Ok(details) => details,
            Err(e) if e.is_not_found() => {
                tracing::info!("Account {} is gone, nothing to reset", account_id.name);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if !details.support_level().share {
            tracing::info!(
                "Account {} ({}, {}) has no file service, nothing to reset",
                account_id.name,
                details.kind,
                details.tier
            );
            return Ok(());
        }

        let defaults =
            SharePropertiesSpec::defaults_for(details.tier).into_properties(details.tier)?;
        match put_json(
            &*self.control_plane,
            ctx,
            &account_id.file_service(),
            &defaults,
        )
        .await
        {
            Ok(_) => {
                tracing::info!("Reset share properties of {}", account_id.name);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                self.accounts.remove(&account_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
