//! Resource lifecycle trait definition

use crate::context::OperationContext;
use crate::error::{CloudError, Result};
use crate::state::ResourceState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle callbacks for one resource type
///
/// The orchestration host calls these; each call runs as an independent
/// operation and may execute in parallel with calls for other resources.
#[async_trait]
pub trait ResourceLifecycle: Send + Sync {
    /// Resource type name (e.g., "storage_management_policy_rule")
    fn resource_type(&self) -> &str;

    /// Create the resource described by `config`
    async fn create(&self, ctx: &OperationContext, config: &ResourceConfig) -> Result<ResourceState>;

    /// Refresh the resource; `Ok(None)` means it is gone and should be
    /// dropped from the host's state
    async fn read(&self, ctx: &OperationContext, id: &str) -> Result<Option<ResourceState>>;

    async fn update(
        &self,
        ctx: &OperationContext,
        id: &str,
        config: &ResourceConfig,
    ) -> Result<ResourceState>;

    /// Delete the resource; an already-absent resource is not an error
    async fn delete(&self, ctx: &OperationContext, id: &str) -> Result<()>;

    /// Adopt an existing remote resource by id
    async fn import(&self, ctx: &OperationContext, id: &str) -> Result<ResourceState> {
        self.read(ctx, id)
            .await?
            .ok_or_else(|| CloudError::NotFound(format!("{} {}", self.resource_type(), id)))
    }
}

/// Configuration for a resource, as handed over by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource type (e.g., "storage_object_replication")
    pub resource_type: String,

    /// Logical address in the host's configuration
    pub address: String,

    /// Provider name
    pub provider: String,

    /// Validated resource attributes
    pub config: serde_json::Value,
}

impl ResourceConfig {
    pub fn new(
        resource_type: impl Into<String>,
        address: impl Into<String>,
        provider: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            address: address.into(),
            provider: provider.into(),
            config,
        }
    }

    /// Get the full resource key (type.address)
    pub fn key(&self) -> String {
        format!("{}.{}", self.resource_type, self.address)
    }

    /// Get a configuration value as a specific type
    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Like [`get_config`](Self::get_config) but missing attributes are an error
    pub fn require<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.config.get(key).ok_or_else(|| {
            CloudError::InvalidConfig(format!("{}: missing attribute `{}`", self.key(), key))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            CloudError::InvalidConfig(format!("{}: attribute `{}`: {}", self.key(), key, e))
        })
    }
}
