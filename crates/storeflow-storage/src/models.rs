//! Control-plane documents (camelCase on the wire)

use crate::ids::StorageAccountId;
use serde::{Deserialize, Serialize};
use storeflow_cloud::{Correlated, NamedRecord, RecordList};

// ---------------------------------------------------------------------------
// Storage account
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub kind: AccountKind,
    pub sku: Sku,
    #[serde(default)]
    pub properties: StorageAccountProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountKind {
    Storage,
    StorageV2,
    BlobStorage,
    BlockBlobStorage,
    FileStorage,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AccountKind::Storage => "Storage",
            AccountKind::StorageV2 => "StorageV2",
            AccountKind::BlobStorage => "BlobStorage",
            AccountKind::BlockBlobStorage => "BlockBlobStorage",
            AccountKind::FileStorage => "FileStorage",
            AccountKind::Unknown => "Unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkuTier {
    Standard,
    Premium,
}

impl std::fmt::Display for SkuTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkuTier::Standard => write!(f, "Standard"),
            SkuTier::Premium => write!(f, "Premium"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sku {
    /// e.g. `Standard_LRS`, `Premium_ZRS`
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<SkuTier>,
}

impl Sku {
    /// Tier from the explicit field, falling back to the name prefix
    pub fn tier(&self) -> SkuTier {
        self.tier.unwrap_or_else(|| {
            if self.name.starts_with("Premium") {
                SkuTier::Premium
            } else {
                SkuTier::Standard
            }
        })
    }

    /// Replication suffix of the sku name, upper-cased (`LRS`, `RAGRS`, ...)
    pub fn replication(&self) -> String {
        self.name
            .split_once('_')
            .map(|(_, r)| r.to_ascii_uppercase())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccountProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub primary_endpoints: Endpoints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_acls: Option<NetworkRuleSet>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRuleSet {
    /// `Allow` or `Deny`
    pub default_action: String,
    #[serde(default)]
    pub virtual_network_rules: Vec<VirtualNetworkRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkRule {
    /// Subnet resource id
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<String>,
}

// ---------------------------------------------------------------------------
// Management policy
// ---------------------------------------------------------------------------

/// The single `default` management policy of an account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: ManagementPolicyProperties,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementPolicyProperties {
    #[serde(default)]
    pub policy: ManagementPolicySchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_time: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagementPolicySchema {
    #[serde(default)]
    pub rules: Vec<ManagementPolicyRule>,
}

impl RecordList for ManagementPolicy {
    type Record = ManagementPolicyRule;

    fn records(&self) -> &[ManagementPolicyRule] {
        &self.properties.policy.rules
    }

    fn records_mut(&mut self) -> &mut Vec<ManagementPolicyRule> {
        &mut self.properties.policy.rules
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementPolicyRule {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(rename = "type", default = "lifecycle")]
    pub rule_type: String,
    pub definition: ManagementPolicyDefinition,
}

impl NamedRecord for ManagementPolicyRule {
    fn name(&self) -> &str {
        &self.name
    }
}

fn default_true() -> bool {
    true
}

fn lifecycle() -> String {
    "Lifecycle".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementPolicyDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<ManagementPolicyFilter>,
    pub actions: ManagementPolicyAction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementPolicyFilter {
    #[serde(default)]
    pub blob_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefix_match: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementPolicyAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_blob: Option<BaseBlobAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<AgeAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<AgeAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseBlobAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_to_cool: Option<DateAfterModification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_to_cold: Option<DateAfterModification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_to_archive: Option<DateAfterModification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<DateAfterModification>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateAfterModification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_after_modification_greater_than: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_after_last_access_time_greater_than: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_after_creation_greater_than: Option<u32>,
}

/// Snapshot and version actions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_to_cool: Option<DateAfterCreation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_to_archive: Option<DateAfterCreation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<DateAfterCreation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateAfterCreation {
    pub days_after_creation_greater_than: u32,
}

// ---------------------------------------------------------------------------
// Object replication
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReplicationPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub properties: ObjectReplicationPolicyProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReplicationPolicyProperties {
    /// Assigned by the destination account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    pub source_account: String,
    pub destination_account: String,
    #[serde(default)]
    pub rules: Vec<ObjectReplicationRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReplicationRule {
    /// Assigned by the destination account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub source_container: String,
    pub destination_container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<ObjectReplicationFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReplicationFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefix_match: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_creation_time: Option<String>,
}

impl ObjectReplicationPolicy {
    /// Whether this policy replicates from `source` to `destination`
    ///
    /// The service reports accounts either by name or by full id.
    pub fn links(&self, source: &StorageAccountId, destination: &StorageAccountId) -> bool {
        account_matches(&self.properties.source_account, source)
            && account_matches(&self.properties.destination_account, destination)
    }
}

fn account_matches(reported: &str, account: &StorageAccountId) -> bool {
    reported.eq_ignore_ascii_case(&account.name)
        || reported.eq_ignore_ascii_case(&account.to_string())
}

impl Correlated for ObjectReplicationPolicy {
    fn correlation_id(&self) -> Option<&str> {
        self.properties.policy_id.as_deref()
    }

    fn echo_from(&self, destination: &Self) -> Self {
        let mut request = self.clone();
        request.properties.policy_id = destination.properties.policy_id.clone();

        // Rule ids follow the container pair, never the position; each
        // destination rule hands out its id at most once
        let mut taken = vec![false; destination.properties.rules.len()];
        for rule in request.properties.rules.iter_mut() {
            let rules = &destination.properties.rules;
            let assigned = (0..rules.len()).find(|&i| {
                !taken[i]
                    && rules[i].source_container == rule.source_container
                    && rules[i].destination_container == rule.destination_container
            });
            rule.rule_id = match assigned {
                Some(i) => {
                    taken[i] = true;
                    destination.properties.rules[i].rule_id.clone()
                }
                None => None,
            };
        }
        request
    }
}

// ---------------------------------------------------------------------------
// File service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileServiceProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: FileServicePropertiesBody,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileServicePropertiesBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_delete_retention_policy: Option<DeleteRetentionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_settings: Option<ProtocolSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsRules {
    #[serde(default)]
    pub cors_rules: Vec<CorsRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsRule {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub exposed_headers: Vec<String>,
    #[serde(default)]
    pub max_age_in_seconds: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRetentionPolicy {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smb: Option<SmbSetting>,
}

/// SMB settings; list-valued fields are `;`-joined strings on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmbSetting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_methods: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kerberos_ticket_encryption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_encryption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multichannel: Option<Multichannel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Multichannel {
    pub enabled: bool,
}
