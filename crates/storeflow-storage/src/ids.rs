//! Typed identifiers for storage resources
//!
//! The host persists these as strings; each lifecycle call re-parses them.

use storeflow_cloud::{CloudError, ResourceId, Result};

const PROVIDER_NAMESPACE: &str = "Microsoft.Storage";

/// `/subscriptions/{s}/resourceGroups/{g}/providers/Microsoft.Storage/storageAccounts/{name}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageAccountId {
    pub subscription_id: String,
    pub resource_group: String,
    pub name: String,
}

impl StorageAccountId {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        Self::from_resource_id(&ResourceId::parse(input)?, input)
    }

    fn from_resource_id(id: &ResourceId, input: &str) -> Result<Self> {
        let namespace = id.require("providers")?;
        if !namespace.eq_ignore_ascii_case(PROVIDER_NAMESPACE) {
            return Err(CloudError::InvalidId(format!(
                "{:?} is not a {} resource",
                input, PROVIDER_NAMESPACE
            )));
        }
        Ok(Self {
            subscription_id: id.require("subscriptions")?.to_string(),
            resource_group: id.require("resourceGroups")?.to_string(),
            name: id.require("storageAccounts")?.to_string(),
        })
    }

    pub fn resource_id(&self) -> ResourceId {
        ResourceId::builder()
            .push("subscriptions", &self.subscription_id)
            .push("resourceGroups", &self.resource_group)
            .push("providers", PROVIDER_NAMESPACE)
            .push("storageAccounts", &self.name)
    }

    pub fn management_policy(&self) -> ResourceId {
        self.resource_id().push("managementPolicies", "default")
    }

    pub fn file_service(&self) -> ResourceId {
        self.resource_id().push("fileServices", "default")
    }

    pub fn object_replication_policy(&self, policy_id: &str) -> ResourceId {
        self.resource_id().push("objectReplicationPolicies", policy_id)
    }
}

impl std::fmt::Display for StorageAccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.resource_id())
    }
}

/// Share properties live on the account itself
pub type SharePropertiesId = StorageAccountId;

/// `{account}/managementPolicies/default/rules/{rule}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementPolicyRuleId {
    pub account: StorageAccountId,
    pub rule_name: String,
}

impl ManagementPolicyRuleId {
    pub fn new(account: StorageAccountId, rule_name: impl Into<String>) -> Self {
        Self {
            account,
            rule_name: rule_name.into(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let id = ResourceId::parse(input)?;
        let segments = id.segments();
        let Some((key, rule_name)) = segments.last() else {
            return Err(CloudError::InvalidId(format!("{:?} is empty", input)));
        };
        if !key.eq_ignore_ascii_case("rules") || segments.len() < 2 {
            return Err(CloudError::InvalidId(format!(
                "{:?} does not end in /managementPolicies/default/rules/{{name}}",
                input
            )));
        }
        let (policy_key, policy_name) = &segments[segments.len() - 2];
        if !policy_key.eq_ignore_ascii_case("managementPolicies") || policy_name != "default" {
            return Err(CloudError::InvalidId(format!(
                "{:?} does not belong to the default management policy",
                input
            )));
        }

        let account_id = id.clone().truncate(segments.len() - 2);
        Ok(Self {
            account: StorageAccountId::from_resource_id(&account_id, input)?,
            rule_name: rule_name.clone(),
        })
    }
}

impl std::fmt::Display for ManagementPolicyRuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/rules/{}",
            self.account.management_policy(),
            self.rule_name
        )
    }
}

/// Both halves of an object replication pair, joined by `;`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReplicationId {
    pub source: StorageAccountId,
    pub source_policy: String,
    pub destination: StorageAccountId,
    pub destination_policy: String,
}

impl ObjectReplicationId {
    /// Both halves share the correlation id assigned by the destination
    pub fn new(source: StorageAccountId, destination: StorageAccountId, policy_id: &str) -> Self {
        Self {
            source,
            source_policy: policy_id.to_string(),
            destination,
            destination_policy: policy_id.to_string(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let Some((source, destination)) = input.split_once(';') else {
            return Err(CloudError::InvalidId(format!(
                "{:?} is not a `source;destination` pair of policy ids",
                input
            )));
        };
        let (source, source_policy) = Self::parse_half(source, input)?;
        let (destination, destination_policy) = Self::parse_half(destination, input)?;

        if source_policy != destination_policy {
            return Err(CloudError::InvalidId(format!(
                "{:?}: source policy {} and destination policy {} differ",
                input, source_policy, destination_policy
            )));
        }

        Ok(Self {
            source,
            source_policy,
            destination,
            destination_policy,
        })
    }

    fn parse_half(half: &str, input: &str) -> Result<(StorageAccountId, String)> {
        let id = ResourceId::parse(half)?;
        let segments = id.segments();
        match segments.last() {
            Some((key, policy)) if key.eq_ignore_ascii_case("objectReplicationPolicies") => {
                let account_id = id.clone().truncate(segments.len() - 1);
                Ok((
                    StorageAccountId::from_resource_id(&account_id, input)?,
                    policy.clone(),
                ))
            }
            _ => Err(CloudError::InvalidId(format!(
                "{:?} does not end in /objectReplicationPolicies/{{id}}",
                half
            ))),
        }
    }

    pub fn policy_id(&self) -> &str {
        &self.destination_policy
    }
}

impl std::fmt::Display for ObjectReplicationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{};{}",
            self.source.object_replication_policy(&self.source_policy),
            self.destination
                .object_replication_policy(&self.destination_policy)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: &str =
        "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/acct1";

    #[test]
    fn test_account_id_roundtrip() {
        let id = StorageAccountId::parse(ACCOUNT).unwrap();
        assert_eq!(id.name, "acct1");
        assert_eq!(id.resource_group, "rg1");
        assert_eq!(id.to_string(), ACCOUNT);
    }

    #[test]
    fn test_account_id_wrong_namespace() {
        let err = StorageAccountId::parse(
            "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/virtualNetworks/vn",
        )
        .unwrap_err();
        assert!(matches!(err, CloudError::InvalidId(_)));
    }

    #[test]
    fn test_rule_id() {
        let input = format!("{}/managementPolicies/default/rules/rule-1", ACCOUNT);
        let id = ManagementPolicyRuleId::parse(&input).unwrap();
        assert_eq!(id.rule_name, "rule-1");
        assert_eq!(id.account.name, "acct1");
        assert_eq!(id.to_string(), input);

        let other_policy = format!("{}/managementPolicies/custom/rules/rule-1", ACCOUNT);
        assert!(ManagementPolicyRuleId::parse(&other_policy).is_err());
        assert!(ManagementPolicyRuleId::parse(ACCOUNT).is_err());
    }

    #[test]
    fn test_object_replication_id() {
        let dst = ACCOUNT.replace("acct1", "acct2");
        let input = format!(
            "{}/objectReplicationPolicies/p-1;{}/objectReplicationPolicies/p-1",
            ACCOUNT, dst
        );
        let id = ObjectReplicationId::parse(&input).unwrap();
        assert_eq!(id.source.name, "acct1");
        assert_eq!(id.destination.name, "acct2");
        assert_eq!(id.policy_id(), "p-1");
        assert_eq!(id.to_string(), input);
    }

    #[test]
    fn test_object_replication_id_mismatch() {
        let dst = ACCOUNT.replace("acct1", "acct2");
        let input = format!(
            "{}/objectReplicationPolicies/p-1;{}/objectReplicationPolicies/p-2",
            ACCOUNT, dst
        );
        assert!(ObjectReplicationId::parse(&input).is_err());
        assert!(ObjectReplicationId::parse(ACCOUNT).is_err());
    }
}
