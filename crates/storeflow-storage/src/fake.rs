//! In-memory stand-ins for the remote APIs
//!
//! [`InMemoryControlPlane`] keeps documents keyed by resource id and mimics
//! the few server-side behaviours the resources depend on (assigned object
//! replication ids, account endpoints, NotFound on absent documents).
//! [`ScriptedProber`] replays readiness outcomes per data-plane service.

use crate::client::ControlPlane;
use crate::dataplane::{DataPlaneProber, DataPlaneService};
use crate::ids::StorageAccountId;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use storeflow_cloud::{CloudError, OperationContext, ProbeStatus, ResourceId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Delete,
    List,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
}

/// Error an injected failure produces
#[derive(Debug, Clone)]
pub enum FailureKind {
    NotFound,
    Conflict,
    Transient,
    Validation(String),
    Api(String),
}

impl FailureKind {
    fn to_error(&self, path: &str) -> CloudError {
        match self {
            FailureKind::NotFound => CloudError::NotFound(path.to_string()),
            FailureKind::Conflict => CloudError::AlreadyExists(path.to_string()),
            FailureKind::Transient => {
                CloudError::TransientConnectivity(format!("connection reset by {}", path))
            }
            FailureKind::Validation(msg) => CloudError::RemoteValidation(msg.clone()),
            FailureKind::Api(msg) => CloudError::ApiError(msg.clone()),
        }
    }
}

struct InjectedFailure {
    method: Method,
    path_contains: String,
    kind: FailureKind,
    remaining: u32,
}

/// Control plane backed by a map of documents
#[derive(Default)]
pub struct InMemoryControlPlane {
    documents: Mutex<BTreeMap<String, Value>>,
    failures: Mutex<Vec<InjectedFailure>>,
    requests: Mutex<Vec<RecordedRequest>>,
    next_policy: AtomicU32,
    rule_counters: Mutex<HashMap<String, u32>>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &str) -> String {
        path.to_ascii_lowercase()
    }

    pub fn insert(&self, id: &ResourceId, document: Value) {
        self.documents
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(Self::key(&id.to_string()), document);
    }

    pub fn document(&self, id: &ResourceId) -> Option<Value> {
        self.documents
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&Self::key(&id.to_string()))
            .cloned()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.document(id).is_some()
    }

    /// Seed a storage account with endpoints for every service
    pub fn insert_account(&self, id: &StorageAccountId, kind: &str, sku: &str) {
        let name = &id.name;
        self.insert(
            &id.resource_id(),
            json!({
                "id": id.to_string(),
                "name": name,
                "kind": kind,
                "sku": { "name": sku },
                "properties": {
                    "provisioningState": "Succeeded",
                    "primaryEndpoints": Self::endpoints(name),
                }
            }),
        );
    }

    fn endpoints(account: &str) -> Value {
        json!({
            "blob": format!("https://{}.blob.core.windows.net/", account),
            "queue": format!("https://{}.queue.core.windows.net/", account),
            "table": format!("https://{}.table.core.windows.net/", account),
            "file": format!("https://{}.file.core.windows.net/", account),
            "web": format!("https://{}.z13.web.core.windows.net/", account),
        })
    }

    /// Account PUT: the service reports the account provisioned along with
    /// its endpoints
    fn provision_account(account: &str, body: &mut Value) {
        let Some(doc) = body.as_object_mut() else {
            return;
        };
        let props = doc.entry("properties").or_insert_with(|| json!({}));
        if let Some(props) = props.as_object_mut() {
            props.insert("provisioningState".to_string(), json!("Succeeded"));
            props.insert("primaryEndpoints".to_string(), Self::endpoints(account));
        }
    }

    /// Fail the next `times` requests of `method` whose path contains
    /// `path_contains`
    pub fn fail_next(&self, method: Method, path_contains: &str, kind: FailureKind, times: u32) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(InjectedFailure {
                method,
                path_contains: path_contains.to_string(),
                kind,
                remaining: times,
            });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn count(&self, method: Method, path_contains: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path.contains(path_contains))
            .count()
    }

    fn record(&self, method: Method, path: &str) -> Result<()> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(RecordedRequest {
                method,
                path: path.to_string(),
            });

        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(failure) = failures
            .iter_mut()
            .find(|f| f.method == method && f.remaining > 0 && path.contains(&f.path_contains))
        {
            failure.remaining -= 1;
            return Err(failure.kind.to_error(path));
        }
        Ok(())
    }

    /// Destination-side PUT to `objectReplicationPolicies/default`: the
    /// service assigns the policy id and the rule ids
    fn assign_replication_ids(&self, id: &ResourceId, mut body: Value) -> (ResourceId, Value) {
        let n = self.next_policy.fetch_add(1, Ordering::SeqCst) + 1;
        let policy_id = format!("policy-{}", n);
        let segments = id.segments().len();
        let assigned = id.clone().truncate(segments - 1).push("objectReplicationPolicies", &policy_id);

        if let Some(props) = body.get_mut("properties").and_then(Value::as_object_mut) {
            props.insert("policyId".to_string(), json!(policy_id));
        }
        self.fill_rule_ids(&policy_id, &mut body);
        (assigned, body)
    }

    /// Give every rule without a `ruleId` a fresh one; ids are never reused
    /// within a policy
    fn fill_rule_ids(&self, policy_id: &str, body: &mut Value) {
        let Some(rules) = body
            .pointer_mut("/properties/rules")
            .and_then(Value::as_array_mut)
        else {
            return;
        };
        let mut counters = self.rule_counters.lock().unwrap_or_else(|p| p.into_inner());
        let counter = counters.entry(policy_id.to_string()).or_insert(0);
        for rule in rules.iter_mut().filter_map(Value::as_object_mut) {
            if rule.get("ruleId").is_some_and(|id| !id.is_null()) {
                continue;
            }
            *counter += 1;
            rule.insert(
                "ruleId".to_string(),
                json!(format!("{}-rule-{}", policy_id, counter)),
            );
        }
    }

    /// Whether a replication policy PUT lands on its destination account
    fn is_destination_write(id: &ResourceId, body: &Value) -> bool {
        let account = id.get("storageAccounts").unwrap_or_default();
        body.pointer("/properties/destinationAccount")
            .and_then(Value::as_str)
            .is_some_and(|d| {
                d.eq_ignore_ascii_case(account)
                    || d.to_ascii_lowercase()
                        .ends_with(&format!("/storageaccounts/{}", account.to_ascii_lowercase()))
            })
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn get(&self, _ctx: &OperationContext, id: &ResourceId) -> Result<Value> {
        let path = id.to_string();
        self.record(Method::Get, &path)?;
        tokio::task::yield_now().await;
        self.document(id).ok_or(CloudError::NotFound(path))
    }

    async fn put(&self, _ctx: &OperationContext, id: &ResourceId, body: Value) -> Result<Value> {
        let path = id.to_string();
        self.record(Method::Put, &path)?;
        tokio::task::yield_now().await;

        let is_new_replication = matches!(
            id.segments().last(),
            Some((key, name)) if key.eq_ignore_ascii_case("objectReplicationPolicies") && name == "default"
        );
        let (id, mut body) = match id.segments().last() {
            _ if is_new_replication => self.assign_replication_ids(id, body),
            Some((key, account)) if key.eq_ignore_ascii_case("storageAccounts") => {
                let mut body = body;
                Self::provision_account(account, &mut body);
                (id.clone(), body)
            }
            Some((key, policy_id))
                if key.eq_ignore_ascii_case("objectReplicationPolicies")
                    && Self::is_destination_write(id, &body) =>
            {
                let mut body = body;
                self.fill_rule_ids(policy_id, &mut body);
                (id.clone(), body)
            }
            _ => (id.clone(), body),
        };

        if let Some(doc) = body.as_object_mut() {
            doc.insert("id".to_string(), json!(id.to_string()));
            if let Some((_, name)) = id.segments().last() {
                doc.insert("name".to_string(), json!(name));
            }
        }
        self.insert(&id, body.clone());
        Ok(body)
    }

    async fn delete(&self, _ctx: &OperationContext, id: &ResourceId) -> Result<()> {
        let path = id.to_string();
        self.record(Method::Delete, &path)?;
        tokio::task::yield_now().await;
        self.documents
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&Self::key(&path))
            .map(|_| ())
            .ok_or(CloudError::NotFound(path))
    }

    async fn list(
        &self,
        _ctx: &OperationContext,
        parent: &ResourceId,
        collection: &str,
    ) -> Result<Vec<Value>> {
        let prefix = format!("{}/{}/", parent, collection);
        self.record(Method::List, &prefix)?;
        tokio::task::yield_now().await;

        let prefix = Self::key(&prefix);
        let documents = self.documents.lock().unwrap_or_else(|p| p.into_inner());
        Ok(documents
            .iter()
            .filter(|(k, _)| k.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('/')))
            .map(|(_, v)| v.clone())
            .collect())
    }
}

/// Replayable probe outcome; the last entry of a script repeats forever
#[derive(Debug, Clone)]
enum Scripted {
    Status(ProbeStatus),
    Transient(String),
    Hard(String),
}

impl From<Result<ProbeStatus>> for Scripted {
    fn from(outcome: Result<ProbeStatus>) -> Self {
        match outcome {
            Ok(status) => Scripted::Status(status),
            Err(e) if e.is_transient() => Scripted::Transient(e.to_string()),
            Err(e) => Scripted::Hard(e.to_string()),
        }
    }
}

impl Scripted {
    fn replay(&self) -> Result<ProbeStatus> {
        match self {
            Scripted::Status(status) => Ok(status.clone()),
            Scripted::Transient(msg) => Err(CloudError::TransientConnectivity(msg.clone())),
            Scripted::Hard(msg) => Err(CloudError::ApiError(msg.clone())),
        }
    }
}

/// Data-plane prober driven by per-service scripts
pub struct ScriptedProber {
    default: Scripted,
    scripts: Mutex<HashMap<DataPlaneService, VecDeque<Scripted>>>,
    calls: Mutex<HashMap<DataPlaneService, u32>>,
}

impl ScriptedProber {
    /// Every endpoint is reachable unless scripted otherwise
    pub fn ready() -> Self {
        Self {
            default: Scripted::Status(ProbeStatus::Ready),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn script(&self, service: DataPlaneService, outcomes: Vec<Result<ProbeStatus>>) {
        self.scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(service, outcomes.into_iter().map(Scripted::from).collect());
    }

    pub fn calls(&self, service: DataPlaneService) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&service)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .sum()
    }
}

#[async_trait]
impl DataPlaneProber for ScriptedProber {
    async fn probe_endpoint(&self, service: DataPlaneService, _endpoint: &str) -> Result<ProbeStatus> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(service)
            .or_insert(0) += 1;

        let mut scripts = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
        let next = match scripts.get_mut(&service) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };
        next.unwrap_or_else(|| self.default.clone()).replay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> StorageAccountId {
        StorageAccountId::new("0000", "rg1", "acct1")
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let cp = InMemoryControlPlane::new();
        let err = cp
            .get(&OperationContext::background(), &account().resource_id())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_replication_default_gets_assigned_ids() {
        let cp = InMemoryControlPlane::new();
        let ctx = OperationContext::background();
        let body = json!({ "properties": {
            "sourceAccount": "acct0",
            "destinationAccount": "acct1",
            "rules": [{ "sourceContainer": "a", "destinationContainer": "b" }]
        }});

        let stored = cp
            .put(&ctx, &account().object_replication_policy("default"), body)
            .await
            .unwrap();
        assert_eq!(stored["properties"]["policyId"], "policy-1");
        assert_eq!(stored["properties"]["rules"][0]["ruleId"], "policy-1-rule-1");
        assert!(cp.contains(&account().object_replication_policy("policy-1")));
        assert!(!cp.contains(&account().object_replication_policy("default")));

        let listed = cp
            .list(&ctx, &account().resource_id(), "objectReplicationPolicies")
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let cp = InMemoryControlPlane::new();
        let ctx = OperationContext::background();
        let id = account().management_policy();
        cp.fail_next(Method::Put, "managementPolicies", FailureKind::Transient, 1);

        assert!(cp.put(&ctx, &id, json!({})).await.unwrap_err().is_transient());
        assert!(cp.put(&ctx, &id, json!({})).await.is_ok());
        assert_eq!(cp.count(Method::Put, "managementPolicies"), 2);
    }

    #[tokio::test]
    async fn test_scripted_prober_repeats_last() {
        let prober = ScriptedProber::ready();
        prober.script(
            DataPlaneService::File,
            vec![Ok(ProbeStatus::pending()), Ok(ProbeStatus::Ready)],
        );

        let first = prober.probe_endpoint(DataPlaneService::File, "x").await.unwrap();
        let second = prober.probe_endpoint(DataPlaneService::File, "x").await.unwrap();
        let third = prober.probe_endpoint(DataPlaneService::File, "x").await.unwrap();
        assert_eq!(first, ProbeStatus::pending());
        assert_eq!(second, ProbeStatus::Ready);
        assert_eq!(third, ProbeStatus::Ready);
        assert_eq!(prober.calls(DataPlaneService::File), 3);
    }
}
