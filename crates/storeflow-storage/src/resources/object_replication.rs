//! `storage_object_replication`
//!
//! A replication policy exists twice: once on the destination account and
//! once on the source account, both under the policy id the destination
//! assigns. Provisioning goes through [`LinkedResourceProvisioner`].

use super::{STORAGE_ACCOUNT_RESOURCE, account_attribute, decode_spec};
use crate::client::{ControlPlane, get_json, list_json, put_json};
use crate::ids::{ObjectReplicationId, StorageAccountId};
use crate::models::{
    ObjectReplicationFilter, ObjectReplicationPolicy, ObjectReplicationPolicyProperties,
    ObjectReplicationRule,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storeflow_cloud::{
    CloudError, Compensation, LinkedEndpoints, LinkedPair, LinkedRequest,
    LinkedResourceProvisioner, LockRegistry, OperationContext, PairRef, ResourceConfig,
    ResourceLifecycle, ResourceState, ResourceStatus, Result, Side,
};

pub const RESOURCE_TYPE: &str = "storage_object_replication";

/// Policy id the destination PUT uses to ask for a server-assigned id
const NEW_POLICY_ID: &str = "default";

/// `minCreationTime` meaning "replicate existing blobs too"
const EVERYTHING: &str = "1601-01-01T00:00:00Z";

pub struct ObjectReplicationEndpoints {
    control_plane: Arc<dyn ControlPlane>,
}

impl ObjectReplicationEndpoints {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }
}

#[async_trait]
impl LinkedEndpoints for ObjectReplicationEndpoints {
    type Account = StorageAccountId;
    type Document = ObjectReplicationPolicy;

    fn lock_resource_type(&self) -> &str {
        STORAGE_ACCOUNT_RESOURCE
    }

    fn lock_name(&self, account: &StorageAccountId) -> String {
        account.name.clone()
    }

    async fn find_active(
        &self,
        ctx: &OperationContext,
        source: &StorageAccountId,
        destination: &StorageAccountId,
    ) -> Result<Option<ObjectReplicationPolicy>> {
        let policies: Vec<ObjectReplicationPolicy> = match list_json(
            &*self.control_plane,
            ctx,
            &destination.resource_id(),
            "objectReplicationPolicies",
        )
        .await
        {
            Ok(policies) => policies,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(policies.into_iter().find(|p| p.links(source, destination)))
    }

    async fn create_destination(
        &self,
        ctx: &OperationContext,
        destination: &StorageAccountId,
        request: ObjectReplicationPolicy,
    ) -> Result<ObjectReplicationPolicy> {
        tracing::debug!("Creating destination replication policy on {}", destination.name);
        put_json(
            &*self.control_plane,
            ctx,
            &destination.object_replication_policy(NEW_POLICY_ID),
            &request,
        )
        .await
    }

    async fn put(
        &self,
        ctx: &OperationContext,
        side: Side,
        account: &StorageAccountId,
        policy_id: &str,
        document: ObjectReplicationPolicy,
    ) -> Result<ObjectReplicationPolicy> {
        tracing::debug!("Writing {} replication policy {} on {}", side, policy_id, account.name);
        put_json(
            &*self.control_plane,
            ctx,
            &account.object_replication_policy(policy_id),
            &document,
        )
        .await
    }

    async fn get(
        &self,
        ctx: &OperationContext,
        _side: Side,
        account: &StorageAccountId,
        policy_id: &str,
    ) -> Result<ObjectReplicationPolicy> {
        get_json(
            &*self.control_plane,
            ctx,
            &account.object_replication_policy(policy_id),
        )
        .await
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        side: Side,
        account: &StorageAccountId,
        policy_id: &str,
    ) -> Result<()> {
        tracing::debug!("Deleting {} replication policy {} on {}", side, policy_id, account.name);
        self.control_plane
            .delete(ctx, &account.object_replication_policy(policy_id))
            .await
    }
}

/// Host-facing attributes
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationSpec {
    pub source_storage_account_id: String,
    pub destination_storage_account_id: String,
    pub rules: Vec<ReplicationRuleSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationRuleSpec {
    pub source_container_name: String,
    pub destination_container_name: String,
    /// `OnlyNewObjects` (default), `Everything`, or an RFC 3339 timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_blobs_created_after: Option<String>,
    #[serde(default)]
    pub filter_out_blobs_with_prefix: Vec<String>,
    /// Assigned by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl ReplicationRuleSpec {
    fn into_rule(self) -> ObjectReplicationRule {
        let min_creation_time = match self.copy_blobs_created_after.as_deref() {
            None | Some("OnlyNewObjects") => None,
            Some("Everything") => Some(EVERYTHING.to_string()),
            Some(timestamp) => Some(timestamp.to_string()),
        };
        let filters = if min_creation_time.is_none() && self.filter_out_blobs_with_prefix.is_empty() {
            None
        } else {
            Some(ObjectReplicationFilter {
                prefix_match: self.filter_out_blobs_with_prefix,
                min_creation_time,
            })
        };

        ObjectReplicationRule {
            rule_id: None,
            source_container: self.source_container_name,
            destination_container: self.destination_container_name,
            filters,
        }
    }

    fn from_rule(rule: &ObjectReplicationRule) -> Self {
        let filters = rule.filters.clone().unwrap_or_default();
        let copy_blobs_created_after = match filters.min_creation_time.as_deref() {
            None => None,
            Some(EVERYTHING) => Some("Everything".to_string()),
            Some(timestamp) => Some(timestamp.to_string()),
        };
        Self {
            source_container_name: rule.source_container.clone(),
            destination_container_name: rule.destination_container.clone(),
            copy_blobs_created_after,
            filter_out_blobs_with_prefix: filters.prefix_match,
            rule_id: rule.rule_id.clone(),
        }
    }
}

fn policy_request(
    source: &StorageAccountId,
    destination: &StorageAccountId,
    rules: Vec<ReplicationRuleSpec>,
) -> ObjectReplicationPolicy {
    ObjectReplicationPolicy {
        id: None,
        name: None,
        properties: ObjectReplicationPolicyProperties {
            policy_id: None,
            source_account: source.to_string(),
            destination_account: destination.to_string(),
            rules: rules.into_iter().map(ReplicationRuleSpec::into_rule).collect(),
        },
    }
}

pub struct ObjectReplicationResource {
    provisioner: LinkedResourceProvisioner<ObjectReplicationEndpoints>,
}

impl ObjectReplicationResource {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        locks: Arc<LockRegistry>,
        compensation: Compensation,
    ) -> Self {
        Self {
            provisioner: LinkedResourceProvisioner::new(
                ObjectReplicationEndpoints::new(control_plane),
                locks,
            )
            .with_compensation(compensation),
        }
    }

    fn accounts(config: &ResourceConfig) -> Result<(StorageAccountId, StorageAccountId)> {
        let source = account_attribute(config, "source_storage_account_id")?;
        let destination = account_attribute(config, "destination_storage_account_id")?;
        if source == destination {
            return Err(CloudError::InvalidConfig(format!(
                "{}: source and destination must be different accounts",
                config.key()
            )));
        }
        Ok((source, destination))
    }

    fn pair_ref(id: &ObjectReplicationId) -> PairRef<StorageAccountId> {
        PairRef {
            source: id.source.clone(),
            destination: id.destination.clone(),
            correlation_id: id.policy_id().to_string(),
        }
    }

    fn state(pair: &LinkedPair<StorageAccountId, ObjectReplicationPolicy>) -> Result<ResourceState> {
        let id = ObjectReplicationId::new(
            pair.source.clone(),
            pair.destination.clone(),
            &pair.correlation_id,
        );
        let rules: Vec<ReplicationRuleSpec> = pair
            .destination_document
            .properties
            .rules
            .iter()
            .map(ReplicationRuleSpec::from_rule)
            .collect();

        Ok(ResourceState::new(id.to_string(), RESOURCE_TYPE)
            .with_status(ResourceStatus::Active)
            .with_attribute("source_storage_account_id", serde_json::json!(pair.source.to_string()))
            .with_attribute(
                "destination_storage_account_id",
                serde_json::json!(pair.destination.to_string()),
            )
            .with_attribute(
                "source_object_replication_id",
                serde_json::json!(pair.source.object_replication_policy(&pair.correlation_id).to_string()),
            )
            .with_attribute(
                "destination_object_replication_id",
                serde_json::json!(
                    pair.destination
                        .object_replication_policy(&pair.correlation_id)
                        .to_string()
                ),
            )
            .with_attribute("rules", serde_json::to_value(rules)?))
    }
}

#[async_trait]
impl ResourceLifecycle for ObjectReplicationResource {
    fn resource_type(&self) -> &str {
        RESOURCE_TYPE
    }

    async fn create(&self, ctx: &OperationContext, config: &ResourceConfig) -> Result<ResourceState> {
        let (source, destination) = Self::accounts(config)?;
        let spec: ReplicationSpec = decode_spec(config)?;
        let request = policy_request(&source, &destination, spec.rules);

        let pair = self
            .provisioner
            .create(
                ctx,
                LinkedRequest {
                    source,
                    destination,
                    destination_request: request.clone(),
                    source_template: request,
                },
            )
            .await?;

        tracing::info!("Created object replication {}", pair.correlation_id);
        Self::state(&pair)
    }

    async fn read(&self, ctx: &OperationContext, id: &str) -> Result<Option<ResourceState>> {
        let id = ObjectReplicationId::parse(id)?;
        match self.provisioner.read(ctx, &Self::pair_ref(&id)).await? {
            Some(pair) => Ok(Some(Self::state(&pair)?)),
            None => {
                tracing::info!("Object replication {} was not found, removing from state", id);
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
        let id = ObjectReplicationId::parse(id)?;
        let (source, destination) = Self::accounts(config)?;
        if source != id.source || destination != id.destination {
            return Err(CloudError::InvalidConfig(format!(
                "object replication {} cannot move between accounts; it has to be replaced",
                id
            )));
        }
        let spec: ReplicationSpec = decode_spec(config)?;
        let request = policy_request(&source, &destination, spec.rules);

        // Rule ids of rules that survive are carried over from the current
        // destination policy while the accounts are locked
        let pair = self
            .provisioner
            .update(ctx, &Self::pair_ref(&id), request.clone(), request)
            .await?;
        tracing::info!("Updated object replication {}", id);
        Self::state(&pair)
    }

    async fn delete(&self, ctx: &OperationContext, id: &str) -> Result<()> {
        let id = ObjectReplicationId::parse(id)?;
        self.provisioner.delete(ctx, &Self::pair_ref(&id)).await?;
        tracing::info!("Deleted object replication {}", id);
        Ok(())
    }
}
