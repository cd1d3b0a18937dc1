mod common;

use common::{TestEnv, resource};
use serde_json::json;
use std::sync::Arc;
use storeflow_cloud::{CloudError, ProbeStatus, ResourceConfig, ResourceLifecycle};
use storeflow_storage::fake::{FailureKind, Method};
use storeflow_storage::resources::SharePropertiesResource;
use storeflow_storage::{AccountCache, DataPlaneService, StorageAccountId};

const SHARE: &str = "storage_account_share_properties";

fn share_config(account: &StorageAccountId, multichannel: bool) -> ResourceConfig {
    resource(
        SHARE,
        "files",
        json!({
            "storage_account_id": account.to_string(),
            "retention_policy": { "days": 14 },
            "smb": {
                "versions": ["SMB3.0", "SMB3.1.1"],
                "multichannel_enabled": multichannel
            }
        }),
    )
}

fn shares(env: &TestEnv, data_plane: bool) -> (SharePropertiesResource, Arc<AccountCache>) {
    let accounts = Arc::new(AccountCache::new());
    let resource = SharePropertiesResource::new(
        env.control_plane.clone(),
        env.locks.clone(),
        accounts.clone(),
        env.prober.clone(),
    )
    .with_data_plane(data_plane);
    (resource, accounts)
}

#[tokio::test(start_paused = true)]
async fn test_create_waits_for_file_endpoint() {
    let env = TestEnv::new();
    let account = env.standard_account("files1");
    env.prober.script(
        DataPlaneService::File,
        vec![
            Ok(ProbeStatus::pending()),
            Ok(ProbeStatus::pending()),
            Ok(ProbeStatus::Ready),
        ],
    );
    let (resource, _) = shares(&env, true);

    let state = resource
        .create(&env.ctx(), &share_config(&account, false))
        .await
        .unwrap();

    assert_eq!(env.prober.calls(DataPlaneService::File), 3);
    assert_eq!(state.attributes["retention_policy"]["days"], 14);
    let stored = env.control_plane.document(&account.file_service()).unwrap();
    assert_eq!(
        stored["properties"]["protocolSettings"]["smb"]["versions"],
        "SMB3.0;SMB3.1.1"
    );
    assert!(stored["properties"]["protocolSettings"]["smb"]["multichannel"].is_null());
}

#[tokio::test(start_paused = true)]
async fn test_create_survives_dropped_connections() {
    let env = TestEnv::new();
    let account = env.standard_account("files1");
    env.prober.script(
        DataPlaneService::File,
        vec![
            Err(CloudError::TransientConnectivity("connection reset".into())),
            Err(CloudError::TransientConnectivity("connection reset".into())),
            Ok(ProbeStatus::Ready),
        ],
    );
    let (resource, _) = shares(&env, true);

    resource
        .create(&env.ctx(), &share_config(&account, false))
        .await
        .unwrap();
    assert!(env.control_plane.contains(&account.file_service()));
}

#[tokio::test(start_paused = true)]
async fn test_create_without_data_plane_does_not_probe() {
    let env = TestEnv::new();
    let account = env.standard_account("files1");
    let (resource, _) = shares(&env, false);

    resource
        .create(&env.ctx(), &share_config(&account, false))
        .await
        .unwrap();
    assert_eq!(env.prober.total_calls(), 0);
}

#[tokio::test]
async fn test_update_does_not_wait() {
    let env = TestEnv::new();
    let account = env.standard_account("files1");
    let (resource, _) = shares(&env, true);
    let ctx = env.ctx();

    let state = resource.create(&ctx, &share_config(&account, false)).await.unwrap();
    let calls = env.prober.total_calls();

    resource
        .update(&ctx, &state.id, &share_config(&account, false))
        .await
        .unwrap();
    assert_eq!(env.prober.total_calls(), calls);
}

#[tokio::test]
async fn test_block_blob_account_is_unsupported() {
    let env = TestEnv::new();
    let account = env.account("blocks1", "BlockBlobStorage", "Premium_LRS");
    let (resource, _) = shares(&env, true);

    let err = resource
        .create(&env.ctx(), &share_config(&account, false))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::InvalidConfig(ref m) if m.contains("BlockBlobStorage")));
    assert_eq!(env.control_plane.count(Method::Put, "fileServices"), 0);
}

#[tokio::test]
async fn test_multichannel_on_standard_is_rejected_before_write() {
    let env = TestEnv::new();
    let account = env.standard_account("files1");
    let (resource, _) = shares(&env, false);

    let err = resource
        .create(&env.ctx(), &share_config(&account, true))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::RemoteValidation(_)));
    assert_eq!(env.control_plane.count(Method::Put, "fileServices"), 0);
}

#[tokio::test]
async fn test_multichannel_on_premium_file_storage() {
    let env = TestEnv::new();
    let account = env.account("premium1", "FileStorage", "Premium_LRS");
    let (resource, _) = shares(&env, false);

    let state = resource
        .create(&env.ctx(), &share_config(&account, true))
        .await
        .unwrap();
    assert_eq!(state.attributes["smb"]["multichannel_enabled"], true);
}

#[tokio::test]
async fn test_read_missing_evicts_account() {
    let env = TestEnv::new();
    let account = env.standard_account("files1");
    let (resource, accounts) = shares(&env, false);
    let ctx = env.ctx();

    let state = resource.create(&ctx, &share_config(&account, false)).await.unwrap();
    assert!(accounts.cached(&account).is_some());

    env.control_plane
        .fail_next(Method::Get, "fileServices", FailureKind::NotFound, 1);
    assert!(resource.read(&ctx, &state.id).await.unwrap().is_none());
    assert!(accounts.cached(&account).is_none());
}

#[tokio::test]
async fn test_delete_resets_to_defaults() {
    let env = TestEnv::new();
    let account = env.standard_account("files1");
    let (resource, _) = shares(&env, false);
    let ctx = env.ctx();

    let state = resource.create(&ctx, &share_config(&account, false)).await.unwrap();
    resource.delete(&ctx, &state.id).await.unwrap();

    // The account itself is untouched
    assert!(env.control_plane.contains(&account.resource_id()));
    let stored = env.control_plane.document(&account.file_service()).unwrap();
    assert!(stored["properties"]["protocolSettings"].is_null());
}

#[tokio::test]
async fn test_delete_on_premium_turns_multichannel_off() {
    let env = TestEnv::new();
    let account = env.account("premium1", "FileStorage", "Premium_LRS");
    let (resource, _) = shares(&env, false);
    let ctx = env.ctx();

    let state = resource.create(&ctx, &share_config(&account, true)).await.unwrap();
    resource.delete(&ctx, &state.id).await.unwrap();

    let stored = env.control_plane.document(&account.file_service()).unwrap();
    let smb = &stored["properties"]["protocolSettings"]["smb"];
    assert_eq!(smb["multichannel"]["enabled"], false);
    assert!(smb["versions"].is_null());
    assert_eq!(
        stored["properties"]["shareDeleteRetentionPolicy"]["enabled"],
        false
    );
}

#[tokio::test]
async fn test_delete_after_account_is_gone() {
    let env = TestEnv::new();
    let account = env.standard_account("files1");
    let (resource, accounts) = shares(&env, false);
    let ctx = env.ctx();

    let state = resource.create(&ctx, &share_config(&account, false)).await.unwrap();
    accounts.remove(&account);
    env.control_plane
        .fail_next(Method::Get, "/storageAccounts/files1", FailureKind::NotFound, 1);

    resource.delete(&ctx, &state.id).await.unwrap();
    assert_eq!(env.control_plane.count(Method::Put, "fileServices"), 1);
    assert!(accounts.cached(&account).is_none());
}

#[tokio::test]
async fn test_delete_on_account_without_file_service_writes_nothing() {
    let env = TestEnv::new();
    let account = env.account("blocks1", "BlockBlobStorage", "Premium_LRS");
    let (resource, _) = shares(&env, false);

    resource
        .delete(&env.ctx(), &account.to_string())
        .await
        .unwrap();
    assert_eq!(env.control_plane.count(Method::Put, "fileServices"), 0);
}
