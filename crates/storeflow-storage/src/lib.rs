//! Storage account resources for StoreFlow
//!
//! This crate implements the storage provider on top of the coordination
//! primitives in `storeflow-cloud`: a control-plane client, data-plane
//! readiness probes, a per-account details cache and the concrete
//! resources the host can manage.
//!
//! # Resources
//!
//! - `storage_account`: the account itself
//! - `storage_management_policy_rule`: one rule in an account's lifecycle
//!   management policy
//! - `storage_object_replication`: a replication policy linking a source
//!   and a destination account
//! - `storage_account_share_properties`: file service properties of an
//!   account
//!
//! # Example
//!
//! ```ignore
//! use storeflow_cloud::ResourceConfig;
//! use storeflow_storage::{StorageProvider, telemetry};
//!
//! telemetry::init_tracing("info");
//! let provider = StorageProvider::from_environment(token)?;
//!
//! let config = ResourceConfig::new(
//!     "storage_management_policy_rule",
//!     "archive_logs",
//!     "storeflow",
//!     serde_json::json!({
//!         "storage_account_id": account_id,
//!         "name": "archive-logs",
//!         "actions": { "base_blob": { "delete_after_days_since_modification_greater_than": 90 } }
//!     }),
//! );
//! let state = provider.create(&config).await?;
//! ```

pub mod account;
pub mod client;
pub mod dataplane;
pub mod error;
pub mod ids;
pub mod models;
pub mod provider;
pub mod resources;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

pub use account::{AccountCache, AccountDetails, SupportLevel};
pub use client::{ArmClient, ControlPlane};
pub use dataplane::{
    DataPlaneClient, DataPlaneProber, DataPlaneService, HttpDataPlaneProber, wait_for_data_plane,
};
pub use error::{Result, StorageError};
pub use ids::{ManagementPolicyRuleId, ObjectReplicationId, SharePropertiesId, StorageAccountId};
pub use provider::StorageProvider;
