mod common;

use common::{TestEnv, resource};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use storeflow_cloud::{CloudError, ProbeStatus, ResourceConfig, ResourceLifecycle};
use storeflow_storage::fake::{FailureKind, Method};
use storeflow_storage::resources::storage_account::VIRTUAL_NETWORK_RESOURCE;
use storeflow_storage::resources::{StorageAccountResource, account_lock_key};
use storeflow_storage::{AccountCache, DataPlaneService, StorageAccountId};

const ACCOUNT: &str = "storage_account";
const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

fn subnet(network: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/rg-net/providers/Microsoft.Network/virtualNetworks/{}/subnets/default",
        SUBSCRIPTION, network
    )
}

fn account_config(name: &str, extra: Value) -> ResourceConfig {
    let mut config = json!({
        "name": name,
        "resource_group_name": "rg-test",
        "location": "westeurope"
    });
    if let (Some(config), Value::Object(extra)) = (config.as_object_mut(), extra) {
        config.extend(extra);
    }
    resource(ACCOUNT, name, config)
}

fn with_networks(name: &str, networks: &[&str]) -> ResourceConfig {
    let subnets: Vec<String> = networks.iter().map(|n| subnet(n)).collect();
    account_config(
        name,
        json!({
            "network_rules": {
                "default_action": "Deny",
                "virtual_network_subnet_ids": subnets
            }
        }),
    )
}

fn accounts(env: &TestEnv, data_plane: bool) -> (StorageAccountResource, Arc<AccountCache>) {
    let cache = Arc::new(AccountCache::new());
    let resource = StorageAccountResource::new(
        env.control_plane.clone(),
        env.locks.clone(),
        cache.clone(),
        env.prober.clone(),
    )
    .with_data_plane(data_plane)
    .with_subscription(Some(SUBSCRIPTION.to_string()));
    (resource, cache)
}

fn account_id(name: &str) -> StorageAccountId {
    StorageAccountId::new(SUBSCRIPTION, "rg-test", name)
}

#[tokio::test(start_paused = true)]
async fn test_create_waits_for_every_supported_service() {
    let env = TestEnv::new();
    env.prober.script(
        DataPlaneService::File,
        vec![
            Ok(ProbeStatus::pending()),
            Ok(ProbeStatus::pending()),
            Ok(ProbeStatus::Ready),
        ],
    );
    let (resource, cache) = accounts(&env, true);

    let state = resource
        .create(&env.ctx(), &account_config("acct1", json!({})))
        .await
        .unwrap();

    assert_eq!(env.prober.calls(DataPlaneService::Blob), 1);
    assert_eq!(env.prober.calls(DataPlaneService::Queue), 1);
    assert_eq!(env.prober.calls(DataPlaneService::Table), 1);
    assert_eq!(env.prober.calls(DataPlaneService::File), 3);
    assert_eq!(env.prober.calls(DataPlaneService::StaticWebsite), 0);

    assert_eq!(state.id, account_id("acct1").to_string());
    assert_eq!(state.attributes["account_kind"], "StorageV2");
    assert_eq!(state.attributes["account_replication_type"], "LRS");
    assert_eq!(
        state.attributes["primary_file_endpoint"],
        "https://acct1.file.core.windows.net/"
    );
    assert!(cache.cached(&account_id("acct1")).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_create_premium_block_blob_waits_for_blob_only() {
    let env = TestEnv::new();
    let (resource, _) = accounts(&env, true);

    resource
        .create(
            &env.ctx(),
            &account_config(
                "blocks1",
                json!({ "account_kind": "BlockBlobStorage", "account_tier": "Premium" }),
            ),
        )
        .await
        .unwrap();

    assert_eq!(env.prober.calls(DataPlaneService::Blob), 1);
    assert_eq!(env.prober.total_calls(), 1);
}

#[tokio::test]
async fn test_create_without_data_plane_does_not_wait() {
    let env = TestEnv::new();
    let (resource, _) = accounts(&env, false);

    resource
        .create(&env.ctx(), &account_config("acct1", json!({})))
        .await
        .unwrap();
    assert_eq!(env.prober.total_calls(), 0);
    assert!(env.control_plane.contains(&account_id("acct1").resource_id()));
}

#[tokio::test]
async fn test_create_over_existing_account_requires_import() {
    let env = TestEnv::new();
    env.standard_account("acct1");
    let (resource, _) = accounts(&env, false);

    let err = resource
        .create(&env.ctx(), &account_config("acct1", json!({})))
        .await
        .unwrap_err();
    assert!(err.requires_import());
    assert_eq!(env.control_plane.count(Method::Put, "/storageAccounts/acct1"), 0);
}

#[tokio::test]
async fn test_create_without_subscription_is_invalid() {
    let env = TestEnv::new();
    let resource = StorageAccountResource::new(
        env.control_plane.clone(),
        env.locks.clone(),
        Arc::new(AccountCache::new()),
        env.prober.clone(),
    );

    let err = resource
        .create(&env.ctx(), &account_config("acct1", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::InvalidConfig(ref m) if m.contains("subscription_id")));
}

#[tokio::test(start_paused = true)]
async fn test_create_waits_for_account_lock() {
    let env = TestEnv::new();
    let (resource, _) = accounts(&env, false);
    let ctx = env.ctx();

    let guard = env
        .locks
        .acquire(&ctx, account_lock_key(&account_id("acct1")))
        .await
        .unwrap();
    let config = account_config("acct1", json!({}));
    let create = resource.create(&ctx, &config);
    tokio::pin!(create);

    let blocked = tokio::time::timeout(Duration::from_secs(1), &mut create).await;
    assert!(blocked.is_err());
    assert!(env.control_plane.requests().is_empty());

    guard.release();
    create.await.unwrap();
}

#[tokio::test]
async fn test_read_missing_evicts_account() {
    let env = TestEnv::new();
    let (resource, cache) = accounts(&env, false);
    let ctx = env.ctx();

    let state = resource
        .create(&ctx, &account_config("acct1", json!({})))
        .await
        .unwrap();
    assert!(cache.cached(&account_id("acct1")).is_some());

    env.control_plane
        .fail_next(Method::Get, "/storageAccounts/acct1", FailureKind::NotFound, 1);
    assert!(resource.read(&ctx, &state.id).await.unwrap().is_none());
    assert!(cache.cached(&account_id("acct1")).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_update_locks_old_and_new_networks() {
    let env = TestEnv::new();
    let (resource, cache) = accounts(&env, true);
    let ctx = env.ctx();

    let state = resource
        .create(&ctx, &with_networks("acct1", &["vnet-a"]))
        .await
        .unwrap();
    assert!(cache.cached(&account_id("acct1")).is_some());
    let puts = env.control_plane.count(Method::Put, "/storageAccounts/acct1");

    // The rule on vnet-a is being dropped, so vnet-a is locked as well
    let guard = env
        .locks
        .acquire_by_name(&ctx, "vnet-a", VIRTUAL_NETWORK_RESOURCE)
        .await
        .unwrap();
    let config = with_networks("acct1", &["vnet-b"]);
    let update = resource.update(&ctx, &state.id, &config);
    tokio::pin!(update);

    let blocked = tokio::time::timeout(Duration::from_secs(1), &mut update).await;
    assert!(blocked.is_err());
    assert_eq!(
        env.control_plane.count(Method::Put, "/storageAccounts/acct1"),
        puts
    );

    guard.release();
    let state = update.await.unwrap();
    assert_eq!(
        state.attributes["network_rules"]["virtual_network_subnet_ids"],
        json!([subnet("vnet-b")])
    );
    // Sku or endpoints may have changed; the next lookup refetches
    assert!(cache.cached(&account_id("acct1")).is_none());
}

#[tokio::test]
async fn test_update_cannot_move_account() {
    let env = TestEnv::new();
    let (resource, _) = accounts(&env, false);
    let ctx = env.ctx();

    let state = resource
        .create(&ctx, &account_config("acct1", json!({})))
        .await
        .unwrap();
    let err = resource
        .update(&ctx, &state.id, &account_config("acct2", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::InvalidConfig(ref m) if m.contains("replaced")));
}

#[tokio::test]
async fn test_update_of_removed_account_is_not_found() {
    let env = TestEnv::new();
    let (resource, _) = accounts(&env, false);

    let err = resource
        .update(
            &env.ctx(),
            &account_id("ghost").to_string(),
            &account_config("ghost", json!({})),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(env.control_plane.count(Method::Put, "ghost"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delete_locks_networks_and_evicts_account() {
    let env = TestEnv::new();
    let (resource, cache) = accounts(&env, true);
    let ctx = env.ctx();

    let state = resource
        .create(&ctx, &with_networks("acct1", &["vnet-a", "vnet-b"]))
        .await
        .unwrap();
    assert!(cache.cached(&account_id("acct1")).is_some());

    let guard = env
        .locks
        .acquire_by_name(&ctx, "vnet-b", VIRTUAL_NETWORK_RESOURCE)
        .await
        .unwrap();
    let delete = resource.delete(&ctx, &state.id);
    tokio::pin!(delete);

    let blocked = tokio::time::timeout(Duration::from_secs(1), &mut delete).await;
    assert!(blocked.is_err());
    assert!(env.control_plane.contains(&account_id("acct1").resource_id()));

    guard.release();
    delete.await.unwrap();
    assert!(!env.control_plane.contains(&account_id("acct1").resource_id()));
    assert!(cache.cached(&account_id("acct1")).is_none());
}

#[tokio::test]
async fn test_delete_missing_account() {
    let env = TestEnv::new();
    let (resource, _) = accounts(&env, false);

    resource
        .delete(&env.ctx(), &account_id("ghost").to_string())
        .await
        .unwrap();
    assert_eq!(env.control_plane.count(Method::Delete, "ghost"), 0);
}

#[tokio::test]
async fn test_stored_document_and_removal() {
    let env = TestEnv::new();
    let (resource, cache) = accounts(&env, false);
    let ctx = env.ctx();

    let state = resource
        .create(&ctx, &account_config("acct1", json!({})))
        .await
        .unwrap();
    let stored = env
        .control_plane
        .document(&account_id("acct1").resource_id())
        .unwrap();
    assert_eq!(stored["sku"]["name"], "Standard_LRS");
    assert_eq!(stored["properties"]["provisioningState"], "Succeeded");

    resource.delete(&ctx, &state.id).await.unwrap();
    assert!(cache.cached(&account_id("acct1")).is_none());
    assert!(resource.read(&ctx, &state.id).await.unwrap().is_none());
}
