use serde_json::Value;
use std::sync::Arc;
use storeflow_cloud::{LockRegistry, OperationContext, ResourceConfig};
use storeflow_storage::StorageAccountId;
use storeflow_storage::fake::{InMemoryControlPlane, ScriptedProber};

/// Fake control plane plus a couple of seeded accounts
pub struct TestEnv {
    pub control_plane: Arc<InMemoryControlPlane>,
    pub prober: Arc<ScriptedProber>,
    pub locks: Arc<LockRegistry>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            control_plane: Arc::new(InMemoryControlPlane::new()),
            prober: Arc::new(ScriptedProber::ready()),
            locks: Arc::new(LockRegistry::new()),
        }
    }

    /// Seed a general purpose v2 account on the standard tier
    pub fn standard_account(&self, name: &str) -> StorageAccountId {
        self.account(name, "StorageV2", "Standard_LRS")
    }

    pub fn account(&self, name: &str, kind: &str, sku: &str) -> StorageAccountId {
        let id = StorageAccountId::new("00000000-0000-0000-0000-000000000000", "rg-test", name);
        self.control_plane.insert_account(&id, kind, sku);
        id
    }

    #[allow(dead_code)]
    pub fn ctx(&self) -> OperationContext {
        OperationContext::background()
    }
}

pub fn resource(resource_type: &str, address: &str, config: Value) -> ResourceConfig {
    ResourceConfig::new(resource_type, address, "storeflow", config)
}

/// Rule names currently stored in an account's management policy
#[allow(dead_code)]
pub fn rule_names(env: &TestEnv, account: &StorageAccountId) -> Vec<String> {
    env.control_plane
        .document(&account.management_policy())
        .and_then(|doc| doc["properties"]["policy"]["rules"].as_array().cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|rule| rule["name"].as_str().map(str::to_string))
        .collect()
}
