//! Two-phase provisioning of a source/destination resource pair
//!
//! The destination side is created first and its response carries a
//! server-assigned correlation id. The source request is then rebuilt from
//! the caller's template with the identifiers echoed from that response, so
//! both halves agree on the id. The remote API has no cross-resource
//! transaction: when the second step fails the first one stays in place and
//! the caller gets [`CloudError::PartialFailure`], unless a compensating
//! action was opted into.

use crate::context::OperationContext;
use crate::error::{CloudError, Result};
use crate::lock::LockRegistry;
use crate::saga::{SagaLog, Side, StepKind};
use async_trait::async_trait;
use std::fmt::Display;
use std::sync::Arc;

/// A document that belongs to a linked pair
pub trait Correlated: Clone + Send + Sync {
    /// Correlation id assigned by the destination, if known
    fn correlation_id(&self) -> Option<&str>;

    /// Rebuild a source-side request from `self` (the template), taking the
    /// correlation id and any per-entry ids from the destination response
    fn echo_from(&self, destination: &Self) -> Self;
}

/// Remote operations on both halves of a pair
#[async_trait]
pub trait LinkedEndpoints: Send + Sync {
    type Account: Clone + Display + Send + Sync;
    type Document: Correlated;

    /// Resource type used for the per-account lock keys
    fn lock_resource_type(&self) -> &str;

    /// Lock name for an account
    fn lock_name(&self, account: &Self::Account) -> String;

    /// Existing active pair between `source` and `destination`, looked up on
    /// the destination account
    async fn find_active(
        &self,
        ctx: &OperationContext,
        source: &Self::Account,
        destination: &Self::Account,
    ) -> Result<Option<Self::Document>>;

    /// Create the destination half; the server picks the correlation id
    async fn create_destination(
        &self,
        ctx: &OperationContext,
        destination: &Self::Account,
        request: Self::Document,
    ) -> Result<Self::Document>;

    /// Create or update one half under a known correlation id
    async fn put(
        &self,
        ctx: &OperationContext,
        side: Side,
        account: &Self::Account,
        correlation_id: &str,
        document: Self::Document,
    ) -> Result<Self::Document>;

    async fn get(
        &self,
        ctx: &OperationContext,
        side: Side,
        account: &Self::Account,
        correlation_id: &str,
    ) -> Result<Self::Document>;

    async fn delete(
        &self,
        ctx: &OperationContext,
        side: Side,
        account: &Self::Account,
        correlation_id: &str,
    ) -> Result<()>;
}

/// What to do when the source create fails after the destination exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compensation {
    /// Leave the destination for manual cleanup
    #[default]
    None,
    /// Delete the destination half again
    DeleteDestination,
}

/// Input to [`LinkedResourceProvisioner::create`]
#[derive(Debug, Clone)]
pub struct LinkedRequest<A, D> {
    pub source: A,
    pub destination: A,
    pub destination_request: D,
    pub source_template: D,
}

/// Address of an existing pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRef<A> {
    pub source: A,
    pub destination: A,
    pub correlation_id: String,
}

/// Both halves of a provisioned pair
#[derive(Debug, Clone)]
pub struct LinkedPair<A, D> {
    pub source: A,
    pub destination: A,
    pub correlation_id: String,
    pub source_document: D,
    pub destination_document: D,
}

impl<A: Clone, D> LinkedPair<A, D> {
    pub fn pair_ref(&self) -> PairRef<A> {
        PairRef {
            source: self.source.clone(),
            destination: self.destination.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}

/// Drives create/read/update/delete of linked pairs
pub struct LinkedResourceProvisioner<E> {
    endpoints: E,
    locks: Arc<LockRegistry>,
    compensation: Compensation,
}

type Pair<E> = LinkedPair<<E as LinkedEndpoints>::Account, <E as LinkedEndpoints>::Document>;

impl<E: LinkedEndpoints> LinkedResourceProvisioner<E> {
    pub fn new(endpoints: E, locks: Arc<LockRegistry>) -> Self {
        Self {
            endpoints,
            locks,
            compensation: Compensation::None,
        }
    }

    pub fn with_compensation(mut self, compensation: Compensation) -> Self {
        self.compensation = compensation;
        self
    }

    pub fn endpoints(&self) -> &E {
        &self.endpoints
    }

    async fn lock_accounts(
        &self,
        ctx: &OperationContext,
        source: &E::Account,
        destination: &E::Account,
    ) -> Result<crate::lock::MultiLockGuard> {
        let names = [
            self.endpoints.lock_name(source),
            self.endpoints.lock_name(destination),
        ];
        self.locks
            .acquire_multiple_by_name(ctx, &names, self.endpoints.lock_resource_type())
            .await
    }

    /// Provision destination then source
    pub async fn create(
        &self,
        ctx: &OperationContext,
        request: LinkedRequest<E::Account, E::Document>,
    ) -> Result<Pair<E>> {
        let LinkedRequest {
            source,
            destination,
            destination_request,
            source_template,
        } = request;
        let _locks = self.lock_accounts(ctx, &source, &destination).await?;
        let mut log = SagaLog::new(format!("create pair {} -> {}", source, destination));

        if let Some(existing) = self
            .endpoints
            .find_active(ctx, &source, &destination)
            .await?
        {
            return Err(CloudError::AlreadyExists(format!(
                "replication pair {} -> {} ({})",
                source,
                destination,
                existing.correlation_id().unwrap_or("unknown id")
            )));
        }

        let destination_document = self
            .endpoints
            .create_destination(ctx, &destination, destination_request)
            .await?;
        let correlation_id = destination_document
            .correlation_id()
            .map(str::to_string)
            .ok_or_else(|| {
                CloudError::ApiError(format!(
                    "destination {} returned no correlation id",
                    destination
                ))
            })?;
        log.add_success(Side::Destination, StepKind::Create, correlation_id.clone());

        let source_request = source_template.echo_from(&destination_document);
        match self
            .endpoints
            .put(ctx, Side::Source, &source, &correlation_id, source_request)
            .await
        {
            Ok(source_document) => {
                log.add_success(Side::Source, StepKind::Create, correlation_id.clone());
                tracing::info!("Created replication pair {} ({})", correlation_id, log.operation);
                Ok(LinkedPair {
                    source,
                    destination,
                    correlation_id,
                    source_document,
                    destination_document,
                })
            }
            Err(err) => {
                log.add_failure(Side::Source, StepKind::Create, err.to_string());
                self.after_source_create_failure(ctx, &destination, &correlation_id, &mut log, err)
                    .await
            }
        }
    }

    async fn after_source_create_failure(
        &self,
        ctx: &OperationContext,
        destination: &E::Account,
        correlation_id: &str,
        log: &mut SagaLog,
        err: CloudError,
    ) -> Result<Pair<E>> {
        if self.compensation == Compensation::DeleteDestination {
            match self
                .endpoints
                .delete(ctx, Side::Destination, destination, correlation_id)
                .await
            {
                Ok(()) => {
                    log.add_success(Side::Destination, StepKind::Compensate, correlation_id);
                    return Err(err);
                }
                Err(undo_err) => {
                    log.add_failure(Side::Destination, StepKind::Compensate, undo_err.to_string());
                }
            }
        } else {
            tracing::warn!(
                "Destination {} of {} left in place after source create failed; manual cleanup required",
                correlation_id,
                destination
            );
        }

        Err(CloudError::PartialFailure {
            completed: log.completed_summary(),
            failed: "source create".to_string(),
            source: Box::new(err),
        })
    }

    /// Read both halves; `Ok(None)` if either is gone
    pub async fn read(
        &self,
        ctx: &OperationContext,
        pair: &PairRef<E::Account>,
    ) -> Result<Option<Pair<E>>> {
        let destination_document = match self
            .endpoints
            .get(ctx, Side::Destination, &pair.destination, &pair.correlation_id)
            .await
        {
            Ok(doc) => doc,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let source_document = match self
            .endpoints
            .get(ctx, Side::Source, &pair.source, &pair.correlation_id)
            .await
        {
            Ok(doc) => doc,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(Some(LinkedPair {
            source: pair.source.clone(),
            destination: pair.destination.clone(),
            correlation_id: pair.correlation_id.clone(),
            source_document,
            destination_document,
        }))
    }

    /// Update destination then source, independently
    ///
    /// Under the account locks the current destination is read first and its
    /// per-entry ids are echoed into `destination_request`, so entries that
    /// survive the update keep the ids the service assigned.
    pub async fn update(
        &self,
        ctx: &OperationContext,
        pair: &PairRef<E::Account>,
        destination_request: E::Document,
        source_template: E::Document,
    ) -> Result<Pair<E>> {
        let _locks = self
            .lock_accounts(ctx, &pair.source, &pair.destination)
            .await?;
        let mut log = SagaLog::new(format!("update pair {}", pair.correlation_id));

        let current = self
            .endpoints
            .get(ctx, Side::Destination, &pair.destination, &pair.correlation_id)
            .await?;
        let destination_request = destination_request.echo_from(&current);

        let destination_document = self
            .endpoints
            .put(
                ctx,
                Side::Destination,
                &pair.destination,
                &pair.correlation_id,
                destination_request,
            )
            .await?;
        log.add_success(Side::Destination, StepKind::Update, pair.correlation_id.clone());

        let source_request = source_template.echo_from(&destination_document);
        let source_document = match self
            .endpoints
            .put(ctx, Side::Source, &pair.source, &pair.correlation_id, source_request)
            .await
        {
            Ok(doc) => doc,
            Err(err) => {
                log.add_failure(Side::Source, StepKind::Update, err.to_string());
                return Err(CloudError::PartialFailure {
                    completed: log.completed_summary(),
                    failed: "source update".to_string(),
                    source: Box::new(err),
                });
            }
        };
        log.add_success(Side::Source, StepKind::Update, pair.correlation_id.clone());

        Ok(LinkedPair {
            source: pair.source.clone(),
            destination: pair.destination.clone(),
            correlation_id: pair.correlation_id.clone(),
            source_document,
            destination_document,
        })
    }

    /// Delete destination then source; halves already gone are skipped
    pub async fn delete(&self, ctx: &OperationContext, pair: &PairRef<E::Account>) -> Result<()> {
        let _locks = self
            .lock_accounts(ctx, &pair.source, &pair.destination)
            .await?;
        let mut log = SagaLog::new(format!("delete pair {}", pair.correlation_id));

        match self
            .endpoints
            .delete(ctx, Side::Destination, &pair.destination, &pair.correlation_id)
            .await
        {
            Ok(()) => log.add_success(Side::Destination, StepKind::Delete, "deleted"),
            Err(e) if e.is_not_found() => {
                log.add_success(Side::Destination, StepKind::Delete, "already gone")
            }
            Err(e) => return Err(e),
        }

        match self
            .endpoints
            .delete(ctx, Side::Source, &pair.source, &pair.correlation_id)
            .await
        {
            Ok(()) => log.add_success(Side::Source, StepKind::Delete, "deleted"),
            Err(e) if e.is_not_found() => log.add_success(Side::Source, StepKind::Delete, "already gone"),
            Err(err) => {
                log.add_failure(Side::Source, StepKind::Delete, err.to_string());
                return Err(CloudError::PartialFailure {
                    completed: log.completed_summary(),
                    failed: "source delete".to_string(),
                    source: Box::new(err),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Policy {
        id: Option<String>,
        rule_ids: Vec<Option<String>>,
        containers: Vec<String>,
    }

    impl Policy {
        fn draft(containers: &[&str]) -> Self {
            Self {
                id: None,
                rule_ids: vec![None; containers.len()],
                containers: containers.iter().map(|c| c.to_string()).collect(),
            }
        }
    }

    impl Correlated for Policy {
        fn correlation_id(&self) -> Option<&str> {
            self.id.as_deref()
        }

        fn echo_from(&self, destination: &Self) -> Self {
            let rule_ids = self
                .containers
                .iter()
                .map(|c| {
                    destination
                        .containers
                        .iter()
                        .position(|d| d == c)
                        .and_then(|i| destination.rule_ids.get(i).cloned().flatten())
                })
                .collect();
            Self {
                id: destination.id.clone(),
                rule_ids,
                containers: self.containers.clone(),
            }
        }
    }

    #[derive(Default)]
    struct MemoryEndpoints {
        docs: Mutex<HashMap<(String, String), Policy>>,
        next_id: Mutex<u32>,
        fail_source_put: Mutex<bool>,
        fail_source_delete: Mutex<bool>,
        destination_gets: Mutex<u32>,
    }

    impl MemoryEndpoints {
        fn stored(&self, account: &str, id: &str) -> Option<Policy> {
            self.docs
                .lock()
                .unwrap()
                .get(&(account.to_string(), id.to_string()))
                .cloned()
        }
    }

    #[async_trait]
    impl LinkedEndpoints for MemoryEndpoints {
        type Account = String;
        type Document = Policy;

        fn lock_resource_type(&self) -> &str {
            "storage_account"
        }

        fn lock_name(&self, account: &String) -> String {
            account.clone()
        }

        async fn find_active(
            &self,
            _ctx: &OperationContext,
            _source: &String,
            destination: &String,
        ) -> Result<Option<Policy>> {
            Ok(self
                .docs
                .lock()
                .unwrap()
                .iter()
                .find(|((account, _), _)| account == destination)
                .map(|(_, doc)| doc.clone()))
        }

        async fn create_destination(
            &self,
            _ctx: &OperationContext,
            destination: &String,
            request: Policy,
        ) -> Result<Policy> {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let id = format!("policy-{}", next);
            let doc = Policy {
                id: Some(id.clone()),
                rule_ids: (0..request.containers.len())
                    .map(|i| Some(format!("{}-rule-{}", id, i)))
                    .collect(),
                containers: request.containers,
            };
            self.docs
                .lock()
                .unwrap()
                .insert((destination.clone(), id), doc.clone());
            Ok(doc)
        }

        async fn put(
            &self,
            _ctx: &OperationContext,
            side: Side,
            account: &String,
            correlation_id: &str,
            document: Policy,
        ) -> Result<Policy> {
            if side == Side::Source && *self.fail_source_put.lock().unwrap() {
                return Err(CloudError::RemoteValidation("source account rejected policy".into()));
            }
            self.docs
                .lock()
                .unwrap()
                .insert((account.clone(), correlation_id.to_string()), document.clone());
            Ok(document)
        }

        async fn get(
            &self,
            _ctx: &OperationContext,
            side: Side,
            account: &String,
            correlation_id: &str,
        ) -> Result<Policy> {
            if side == Side::Destination {
                *self.destination_gets.lock().unwrap() += 1;
            }
            self.stored(account, correlation_id)
                .ok_or_else(|| CloudError::NotFound(correlation_id.to_string()))
        }

        async fn delete(
            &self,
            _ctx: &OperationContext,
            side: Side,
            account: &String,
            correlation_id: &str,
        ) -> Result<()> {
            if side == Side::Source && *self.fail_source_delete.lock().unwrap() {
                return Err(CloudError::ApiError("source delete failed".into()));
            }
            self.docs
                .lock()
                .unwrap()
                .remove(&(account.clone(), correlation_id.to_string()))
                .map(|_| ())
                .ok_or_else(|| CloudError::NotFound(correlation_id.to_string()))
        }
    }

    fn request() -> LinkedRequest<String, Policy> {
        LinkedRequest {
            source: "src".to_string(),
            destination: "dst".to_string(),
            destination_request: Policy::draft(&["logs", "images"]),
            // the caller's draft carries a stale id that must not survive
            source_template: Policy {
                id: Some("caller-draft".into()),
                ..Policy::draft(&["logs", "images"])
            },
        }
    }

    fn provisioner() -> LinkedResourceProvisioner<MemoryEndpoints> {
        LinkedResourceProvisioner::new(MemoryEndpoints::default(), Arc::new(LockRegistry::new()))
    }

    #[tokio::test]
    async fn test_create_echoes_correlation_id() {
        let provisioner = provisioner();
        let ctx = OperationContext::background();

        let pair = provisioner.create(&ctx, request()).await.unwrap();
        assert_eq!(pair.correlation_id, "policy-1");

        let endpoints = provisioner.endpoints();
        let dst = endpoints.stored("dst", "policy-1").unwrap();
        let src = endpoints.stored("src", "policy-1").unwrap();
        assert_eq!(dst.id, src.id);
        assert_eq!(dst.rule_ids, src.rule_ids);
        assert_eq!(src.rule_ids[1].as_deref(), Some("policy-1-rule-1"));
    }

    #[tokio::test]
    async fn test_create_existing_pair_requires_import() {
        let provisioner = provisioner();
        let ctx = OperationContext::background();
        provisioner.create(&ctx, request()).await.unwrap();

        let err = provisioner.create(&ctx, request()).await.unwrap_err();
        assert!(err.requires_import());
    }

    #[tokio::test]
    async fn test_source_failure_is_partial_and_keeps_destination() {
        let provisioner = provisioner();
        *provisioner.endpoints().fail_source_put.lock().unwrap() = true;

        let err = provisioner
            .create(&OperationContext::background(), request())
            .await
            .unwrap_err();
        match err {
            CloudError::PartialFailure {
                completed,
                failed,
                source,
            } => {
                assert_eq!(completed, "destination create");
                assert_eq!(failed, "source create");
                assert!(matches!(*source, CloudError::RemoteValidation(_)));
            }
            other => panic!("expected PartialFailure, got {:?}", other),
        }
        assert!(provisioner.endpoints().stored("dst", "policy-1").is_some());
        assert!(provisioner.endpoints().stored("src", "policy-1").is_none());
    }

    #[tokio::test]
    async fn test_compensation_removes_destination() {
        let provisioner = provisioner().with_compensation(Compensation::DeleteDestination);
        *provisioner.endpoints().fail_source_put.lock().unwrap() = true;

        let err = provisioner
            .create(&OperationContext::background(), request())
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::RemoteValidation(_)));
        assert!(provisioner.endpoints().stored("dst", "policy-1").is_none());
    }

    #[tokio::test]
    async fn test_read_update_delete() {
        let provisioner = provisioner();
        let ctx = OperationContext::background();
        let pair = provisioner.create(&ctx, request()).await.unwrap().pair_ref();

        let updated = provisioner
            .update(
                &ctx,
                &pair,
                Policy {
                    id: Some(pair.correlation_id.clone()),
                    rule_ids: vec![Some("policy-1-rule-0".into())],
                    containers: vec!["logs".into()],
                },
                Policy::draft(&["logs"]),
            )
            .await
            .unwrap();
        assert_eq!(updated.source_document.containers, vec!["logs".to_string()]);
        assert_eq!(updated.source_document.id.as_deref(), Some("policy-1"));

        let read = provisioner.read(&ctx, &pair).await.unwrap().unwrap();
        assert_eq!(read.destination_document, updated.destination_document);

        provisioner.delete(&ctx, &pair).await.unwrap();
        assert!(provisioner.read(&ctx, &pair).await.unwrap().is_none());

        // deleting again finds both halves gone and succeeds
        provisioner.delete(&ctx, &pair).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_keeps_ids_of_surviving_entries() {
        let provisioner = provisioner();
        let ctx = OperationContext::background();
        let pair = provisioner.create(&ctx, request()).await.unwrap().pair_ref();

        // "images" moves to the front, "logs" goes away, "audit" is new
        let draft = Policy::draft(&["images", "audit"]);
        let updated = provisioner
            .update(&ctx, &pair, draft.clone(), draft)
            .await
            .unwrap();

        let expected = vec![Some("policy-1-rule-1".to_string()), None];
        assert_eq!(updated.destination_document.rule_ids, expected);
        assert_eq!(updated.source_document.rule_ids, expected);
    }

    #[tokio::test]
    async fn test_update_of_missing_destination_writes_nothing() {
        let provisioner = provisioner();
        let ctx = OperationContext::background();
        let pair = provisioner.create(&ctx, request()).await.unwrap().pair_ref();
        provisioner
            .endpoints()
            .docs
            .lock()
            .unwrap()
            .remove(&("dst".to_string(), "policy-1".to_string()));

        let draft = Policy::draft(&["logs"]);
        let err = provisioner
            .update(&ctx, &pair, draft.clone(), draft)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            provisioner.endpoints().stored("src", "policy-1").unwrap().containers,
            vec!["logs".to_string(), "images".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_reads_destination_while_locked() {
        let locks = Arc::new(LockRegistry::new());
        let provisioner = LinkedResourceProvisioner::new(MemoryEndpoints::default(), locks.clone());
        let ctx = OperationContext::background();
        let pair = provisioner.create(&ctx, request()).await.unwrap().pair_ref();
        let gets = || *provisioner.endpoints().destination_gets.lock().unwrap();
        let before = gets();

        let guard = locks.acquire_by_name(&ctx, "dst", "storage_account").await.unwrap();
        let draft = Policy::draft(&["logs"]);
        let update = provisioner.update(&ctx, &pair, draft.clone(), draft);
        tokio::pin!(update);

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), &mut update).await;
        assert!(waited.is_err());
        assert_eq!(gets(), before);

        guard.release();
        update.await.unwrap();
        assert_eq!(gets(), before + 1);
    }

    #[tokio::test]
    async fn test_delete_source_failure_orphans_source() {
        let provisioner = provisioner();
        let ctx = OperationContext::background();
        let pair = provisioner.create(&ctx, request()).await.unwrap().pair_ref();
        *provisioner.endpoints().fail_source_delete.lock().unwrap() = true;

        let err = provisioner.delete(&ctx, &pair).await.unwrap_err();
        assert!(err.is_partial_failure());
        assert!(provisioner.endpoints().stored("dst", "policy-1").is_none());
        assert!(provisioner.endpoints().stored("src", "policy-1").is_some());
    }
}
