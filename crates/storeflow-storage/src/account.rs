//! Storage account lookups
//!
//! Every storage resource needs the owning account's kind, tier and
//! endpoints. [`AccountCache`] memoizes those per account id.

use crate::client::{ControlPlane, get_json};
use crate::ids::StorageAccountId;
use crate::models::{AccountKind, Endpoints, SkuTier, StorageAccount};
use std::collections::HashMap;
use std::sync::Mutex;
use storeflow_cloud::{OperationContext, Result};

/// Replication types whose `Storage` (v1) accounts expose a file endpoint
const FILE_SHARE_REPLICATION_TYPES: [&str; 3] = ["LRS", "GRS", "RAGRS"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDetails {
    pub id: StorageAccountId,
    pub kind: AccountKind,
    pub tier: SkuTier,
    /// Upper-cased replication suffix of the sku (`LRS`, `ZRS`, ...)
    pub replication: String,
    pub endpoints: Endpoints,
}

impl AccountDetails {
    pub fn from_account(id: StorageAccountId, account: &StorageAccount) -> Self {
        Self {
            id,
            kind: account.kind,
            tier: account.sku.tier(),
            replication: account.sku.replication(),
            endpoints: account.properties.primary_endpoints.clone(),
        }
    }

    pub fn support_level(&self) -> SupportLevel {
        SupportLevel::for_account(self.kind, self.tier, &self.replication)
    }
}

/// Data-plane services an account exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupportLevel {
    pub blob: bool,
    pub queue: bool,
    pub share: bool,
    pub table: bool,
    pub static_website: bool,
}

impl SupportLevel {
    pub fn for_account(kind: AccountKind, tier: SkuTier, replication: &str) -> Self {
        let standard = tier != SkuTier::Premium;
        let general_purpose = matches!(kind, AccountKind::Storage | AccountKind::StorageV2);

        // FileStorage is always share-capable; StorageV2 only on standard
        // tier; v1 only for the replication types that get a file endpoint
        let share = kind == AccountKind::FileStorage
            || (standard
                && (kind == AccountKind::StorageV2
                    || (kind == AccountKind::Storage
                        && FILE_SHARE_REPLICATION_TYPES.contains(&replication))));

        Self {
            blob: !matches!(kind, AccountKind::FileStorage | AccountKind::Unknown),
            queue: standard && general_purpose,
            share,
            table: standard && general_purpose,
            static_website: matches!(kind, AccountKind::StorageV2 | AccountKind::BlockBlobStorage),
        }
    }
}

/// Account details memoized by account id
#[derive(Default)]
pub struct AccountCache {
    entries: Mutex<HashMap<StorageAccountId, AccountDetails>>,
}

impl AccountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached details, fetching the account on a miss
    ///
    /// A `NotFound` from the control plane evicts any stale entry.
    pub async fn find(
        &self,
        ctx: &OperationContext,
        control_plane: &dyn ControlPlane,
        id: &StorageAccountId,
    ) -> Result<AccountDetails> {
        if let Some(details) = self.cached(id) {
            return Ok(details);
        }

        tracing::debug!("Looking up storage account {}", id);
        let account: StorageAccount = match get_json(control_plane, ctx, &id.resource_id()).await {
            Ok(account) => account,
            Err(e) => {
                if e.is_not_found() {
                    self.remove(id);
                }
                return Err(e);
            }
        };

        let details = AccountDetails::from_account(id.clone(), &account);
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.clone(), details.clone());
        Ok(details)
    }

    pub fn cached(&self, id: &StorageAccountId) -> Option<AccountDetails> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
    }

    /// Evict an account, e.g. after it was deleted
    pub fn remove(&self, id: &StorageAccountId) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id)
            .is_some()
    }
}
