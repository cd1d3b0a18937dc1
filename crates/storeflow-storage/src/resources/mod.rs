//! Storage resources exposed to the host
//!
//! Each resource implements [`storeflow_cloud::ResourceLifecycle`]. Anything
//! that writes to an account's shared documents takes the account lock
//! first, so resources never race each other on the same account.

pub mod management_policy_rule;
pub mod object_replication;
pub mod share_properties;
pub mod storage_account;

pub use management_policy_rule::{ManagementPolicyRuleResource, ManagementPolicyStore};
pub use object_replication::{ObjectReplicationEndpoints, ObjectReplicationResource};
pub use share_properties::SharePropertiesResource;
pub use storage_account::StorageAccountResource;

use crate::ids::StorageAccountId;
use serde::de::DeserializeOwned;
use storeflow_cloud::{CloudError, LockKey, ResourceConfig, Result};

/// Lock type shared by every resource that writes to a storage account
pub const STORAGE_ACCOUNT_RESOURCE: &str = "storage_account";

pub fn account_lock_key(account: &StorageAccountId) -> LockKey {
    LockKey::by_name(&account.name, STORAGE_ACCOUNT_RESOURCE)
}

/// Parse an account id attribute such as `storage_account_id`
pub(crate) fn account_attribute(config: &ResourceConfig, key: &str) -> Result<StorageAccountId> {
    let raw: String = config.require(key)?;
    StorageAccountId::parse(&raw)
}

/// Decode the whole attribute map into a typed spec
pub(crate) fn decode_spec<T: DeserializeOwned>(config: &ResourceConfig) -> Result<T> {
    serde_json::from_value(config.config.clone())
        .map_err(|e| CloudError::InvalidConfig(format!("{}: {}", config.key(), e)))
}
