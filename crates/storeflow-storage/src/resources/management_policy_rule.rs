//! `storage_management_policy_rule`
//!
//! One named rule inside an account's `default` management policy. The
//! policy document holds every rule of the account, so each operation is a
//! locked get → modify → put of the whole document.

use super::{account_attribute, account_lock_key, decode_spec};
use crate::client::{ControlPlane, get_json, put_json};
use crate::ids::{ManagementPolicyRuleId, StorageAccountId};
use crate::models::{
    AgeAction, BaseBlobAction, DateAfterCreation, DateAfterModification, ManagementPolicy,
    ManagementPolicyAction, ManagementPolicyDefinition, ManagementPolicyFilter,
    ManagementPolicyRule,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storeflow_cloud::{
    CloudError, DocumentStore, ListMergeEngine, LockKey, LockRegistry, Mutation,
    OperationContext, RecordList, ResourceConfig, ResourceLifecycle, ResourceState,
    ResourceStatus, Result,
};

pub const RESOURCE_TYPE: &str = "storage_management_policy_rule";

/// The `default` management policy of an account
pub struct ManagementPolicyStore {
    control_plane: Arc<dyn ControlPlane>,
}

impl ManagementPolicyStore {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }
}

#[async_trait]
impl DocumentStore for ManagementPolicyStore {
    type Parent = StorageAccountId;
    type Document = ManagementPolicy;

    fn lock_key(&self, account: &StorageAccountId) -> LockKey {
        account_lock_key(account)
    }

    async fn get(&self, ctx: &OperationContext, account: &StorageAccountId) -> Result<ManagementPolicy> {
        get_json(&*self.control_plane, ctx, &account.management_policy()).await
    }

    /// The service rejects a policy without rules, so an empty list deletes
    /// the policy document instead
    async fn persist(
        &self,
        ctx: &OperationContext,
        account: &StorageAccountId,
        policy: ManagementPolicy,
    ) -> Result<ManagementPolicy> {
        let id = account.management_policy();
        if policy.records().is_empty() {
            tracing::debug!("Last rule removed, deleting management policy of {}", account.name);
            return match self.control_plane.delete(ctx, &id).await {
                Ok(()) => Ok(policy),
                Err(e) if e.is_not_found() => Ok(policy),
                Err(e) => Err(e),
            };
        }
        put_json(&*self.control_plane, ctx, &id, &policy).await
    }

    fn empty(&self, _account: &StorageAccountId) -> Option<ManagementPolicy> {
        Some(ManagementPolicy::default())
    }
}

/// Host-facing attributes of a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub filters: FilterSpec,
    #[serde(default)]
    pub actions: ActionsSpec,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub blob_types: Vec<String>,
    #[serde(default)]
    pub prefix_match: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_blob: Option<BaseBlobSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<AgeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<AgeSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseBlobSpec {
    pub tier_to_cool_after_days_since_modification_greater_than: Option<u32>,
    pub tier_to_cool_after_days_since_last_access_time_greater_than: Option<u32>,
    pub tier_to_cold_after_days_since_modification_greater_than: Option<u32>,
    pub tier_to_archive_after_days_since_modification_greater_than: Option<u32>,
    pub delete_after_days_since_modification_greater_than: Option<u32>,
    pub delete_after_days_since_creation_greater_than: Option<u32>,
}

/// Snapshot and version actions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgeSpec {
    pub change_tier_to_cool_after_days_since_creation: Option<u32>,
    pub change_tier_to_archive_after_days_since_creation: Option<u32>,
    pub delete_after_days_since_creation_greater_than: Option<u32>,
}

fn after_modification(days: Option<u32>) -> Option<DateAfterModification> {
    days.map(|d| DateAfterModification {
        days_after_modification_greater_than: Some(d),
        ..Default::default()
    })
}

fn after_creation(days: Option<u32>) -> Option<DateAfterCreation> {
    days.map(|d| DateAfterCreation {
        days_after_creation_greater_than: d,
    })
}

impl AgeSpec {
    fn into_action(self) -> AgeAction {
        AgeAction {
            tier_to_cool: after_creation(self.change_tier_to_cool_after_days_since_creation),
            tier_to_archive: after_creation(self.change_tier_to_archive_after_days_since_creation),
            delete: after_creation(self.delete_after_days_since_creation_greater_than),
        }
    }

    fn from_action(action: &AgeAction) -> Self {
        let days = |d: &Option<DateAfterCreation>| d.as_ref().map(|d| d.days_after_creation_greater_than);
        Self {
            change_tier_to_cool_after_days_since_creation: days(&action.tier_to_cool),
            change_tier_to_archive_after_days_since_creation: days(&action.tier_to_archive),
            delete_after_days_since_creation_greater_than: days(&action.delete),
        }
    }
}

impl BaseBlobSpec {
    fn into_action(self) -> BaseBlobAction {
        let tier_to_cool = match (
            self.tier_to_cool_after_days_since_modification_greater_than,
            self.tier_to_cool_after_days_since_last_access_time_greater_than,
        ) {
            (None, None) => None,
            (modified, accessed) => Some(DateAfterModification {
                days_after_modification_greater_than: modified,
                days_after_last_access_time_greater_than: accessed,
                ..Default::default()
            }),
        };
        let delete = match (
            self.delete_after_days_since_modification_greater_than,
            self.delete_after_days_since_creation_greater_than,
        ) {
            (None, None) => None,
            (modified, created) => Some(DateAfterModification {
                days_after_modification_greater_than: modified,
                days_after_creation_greater_than: created,
                ..Default::default()
            }),
        };

        BaseBlobAction {
            tier_to_cool,
            tier_to_cold: after_modification(self.tier_to_cold_after_days_since_modification_greater_than),
            tier_to_archive: after_modification(
                self.tier_to_archive_after_days_since_modification_greater_than,
            ),
            delete,
        }
    }

    fn from_action(action: &BaseBlobAction) -> Self {
        let cool = action.tier_to_cool.as_ref();
        let delete = action.delete.as_ref();
        Self {
            tier_to_cool_after_days_since_modification_greater_than: cool
                .and_then(|a| a.days_after_modification_greater_than),
            tier_to_cool_after_days_since_last_access_time_greater_than: cool
                .and_then(|a| a.days_after_last_access_time_greater_than),
            tier_to_cold_after_days_since_modification_greater_than: action
                .tier_to_cold
                .as_ref()
                .and_then(|a| a.days_after_modification_greater_than),
            tier_to_archive_after_days_since_modification_greater_than: action
                .tier_to_archive
                .as_ref()
                .and_then(|a| a.days_after_modification_greater_than),
            delete_after_days_since_modification_greater_than: delete
                .and_then(|a| a.days_after_modification_greater_than),
            delete_after_days_since_creation_greater_than: delete
                .and_then(|a| a.days_after_creation_greater_than),
        }
    }
}

impl RuleSpec {
    pub fn into_rule(self) -> Result<ManagementPolicyRule> {
        if self.name.is_empty() {
            return Err(CloudError::InvalidConfig("rule name must not be empty".to_string()));
        }
        if self.actions.base_blob.is_none()
            && self.actions.snapshot.is_none()
            && self.actions.version.is_none()
        {
            return Err(CloudError::InvalidConfig(format!(
                "rule {} needs at least one action",
                self.name
            )));
        }

        let filters = if self.filters.blob_types.is_empty() && self.filters.prefix_match.is_empty() {
            None
        } else {
            Some(ManagementPolicyFilter {
                blob_types: self.filters.blob_types,
                prefix_match: self.filters.prefix_match,
            })
        };

        Ok(ManagementPolicyRule {
            name: self.name,
            enabled: self.enabled,
            rule_type: "Lifecycle".to_string(),
            definition: ManagementPolicyDefinition {
                filters,
                actions: ManagementPolicyAction {
                    base_blob: self.actions.base_blob.map(BaseBlobSpec::into_action),
                    snapshot: self.actions.snapshot.map(AgeSpec::into_action),
                    version: self.actions.version.map(AgeSpec::into_action),
                },
            },
        })
    }

    pub fn from_rule(rule: &ManagementPolicyRule) -> Self {
        let filters = rule.definition.filters.clone().unwrap_or_default();
        let actions = &rule.definition.actions;
        Self {
            name: rule.name.clone(),
            enabled: rule.enabled,
            filters: FilterSpec {
                blob_types: filters.blob_types,
                prefix_match: filters.prefix_match,
            },
            actions: ActionsSpec {
                base_blob: actions.base_blob.as_ref().map(BaseBlobSpec::from_action),
                snapshot: actions.snapshot.as_ref().map(AgeSpec::from_action),
                version: actions.version.as_ref().map(AgeSpec::from_action),
            },
        }
    }
}

pub struct ManagementPolicyRuleResource {
    engine: ListMergeEngine<ManagementPolicyStore>,
}

impl ManagementPolicyRuleResource {
    pub fn new(control_plane: Arc<dyn ControlPlane>, locks: Arc<LockRegistry>) -> Self {
        Self {
            engine: ListMergeEngine::new(ManagementPolicyStore::new(control_plane), locks),
        }
    }

    fn state(id: &ManagementPolicyRuleId, rule: &ManagementPolicyRule) -> Result<ResourceState> {
        let status = if rule.enabled {
            ResourceStatus::Active
        } else {
            ResourceStatus::Disabled
        };
        let mut state = ResourceState::new(id.to_string(), RESOURCE_TYPE)
            .with_status(status)
            .with_attribute("storage_account_id", serde_json::json!(id.account.to_string()));
        let spec = serde_json::to_value(RuleSpec::from_rule(rule))?;
        if let serde_json::Value::Object(fields) = spec {
            for (key, value) in fields {
                state.set_attribute(key, value);
            }
        }
        Ok(state)
    }
}

#[async_trait]
impl ResourceLifecycle for ManagementPolicyRuleResource {
    fn resource_type(&self) -> &str {
        RESOURCE_TYPE
    }

    async fn create(&self, ctx: &OperationContext, config: &ResourceConfig) -> Result<ResourceState> {
        let account = account_attribute(config, "storage_account_id")?;
        let rule = decode_spec::<RuleSpec>(config)?.into_rule()?;
        let id = ManagementPolicyRuleId::new(account.clone(), rule.name.clone());

        self.engine
            .mutate(ctx, &account, Mutation::Add(rule.clone()))
            .await?;
        tracing::info!("Created management policy rule {}", id);

        Self::state(&id, &rule)
    }

    async fn read(&self, ctx: &OperationContext, id: &str) -> Result<Option<ResourceState>> {
        let id = ManagementPolicyRuleId::parse(id)?;
        match self
            .engine
            .read_record(ctx, &id.account, &id.rule_name)
            .await?
        {
            Some(rule) => Ok(Some(Self::state(&id, &rule)?)),
            None => {
                tracing::info!("Management policy rule {} was not found, removing from state", id);
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
        let id = ManagementPolicyRuleId::parse(id)?;
        let rule = decode_spec::<RuleSpec>(config)?.into_rule()?;
        if rule.name != id.rule_name {
            return Err(CloudError::InvalidConfig(format!(
                "rule {} cannot be renamed to {}; it has to be replaced",
                id.rule_name, rule.name
            )));
        }

        match self
            .engine
            .mutate(ctx, &id.account, Mutation::Replace(rule.clone()))
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(CloudError::NotFound(format!(
                    "management policy rule {} was removed outside of this provider",
                    id
                )));
            }
            Err(e) => return Err(e),
        }
        tracing::info!("Updated management policy rule {}", id);

        Self::state(&id, &rule)
    }

    async fn delete(&self, ctx: &OperationContext, id: &str) -> Result<()> {
        let id = ManagementPolicyRuleId::parse(id)?;
        self.engine
            .mutate(ctx, &id.account, Mutation::Remove(id.rule_name.clone()))
            .await?;
        tracing::info!("Deleted management policy rule {}", id);
        Ok(())
    }
}
