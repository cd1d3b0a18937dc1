//! Named records embedded in a shared parent document
//!
//! Some remote resources are not addressable on their own: they are entries
//! in a list inside one parent document that is only ever read and written
//! whole. The functions here are pure `(document, mutation) -> document`
//! transforms; [`ListMergeEngine`] wraps them in a lock-protected
//! get → mutate → persist sequence.
//!
//! The remote API exposes no per-record concurrency token. The lock keeps
//! cooperating writers from racing each other, but an out-of-band edit made
//! between `get` and `persist` is silently overwritten.

use crate::context::OperationContext;
use crate::error::{CloudError, Result};
use crate::lock::{LockKey, LockRegistry};
use async_trait::async_trait;
use std::sync::Arc;

/// An entry identified by name within its parent document
pub trait NamedRecord: Clone + Send + Sync {
    fn name(&self) -> &str;
}

/// A parent document holding an ordered list of named records
pub trait RecordList: Clone + Send + Sync {
    type Record: NamedRecord;

    fn records(&self) -> &[Self::Record];

    fn records_mut(&mut self) -> &mut Vec<Self::Record>;
}

/// A change to one record of a document
#[derive(Debug, Clone)]
pub enum Mutation<R> {
    /// Append; fails if the name is taken
    Add(R),
    /// Replace the record with the same name; fails if absent
    Replace(R),
    /// Remove by name; absent names are ignored
    Remove(String),
}

impl<R: NamedRecord> Mutation<R> {
    pub fn record_name(&self) -> &str {
        match self {
            Mutation::Add(r) | Mutation::Replace(r) => r.name(),
            Mutation::Remove(name) => name,
        }
    }
}

/// First record named `name`
pub fn find_record<'a, D: RecordList>(doc: &'a D, name: &str) -> Option<&'a D::Record> {
    doc.records().iter().find(|r| r.name() == name)
}

/// Append `record` unless a record with the same name exists
pub fn add_record<D: RecordList>(mut doc: D, record: D::Record) -> Result<D> {
    if find_record(&doc, record.name()).is_some() {
        return Err(CloudError::AlreadyExists(record.name().to_string()));
    }
    doc.records_mut().push(record);
    Ok(doc)
}

/// Mutate the first record named `name` in place
pub fn update_record<D, F>(mut doc: D, name: &str, mutator: F) -> Result<D>
where
    D: RecordList,
    F: FnOnce(&mut D::Record),
{
    let record = doc
        .records_mut()
        .iter_mut()
        .find(|r| r.name() == name)
        .ok_or_else(|| CloudError::NotFound(name.to_string()))?;
    mutator(record);
    Ok(doc)
}

/// Drop every record named `name`; returns the new document and whether
/// anything was removed
pub fn delete_record<D: RecordList>(mut doc: D, name: &str) -> (D, bool) {
    let before = doc.records().len();
    let kept: Vec<D::Record> = doc
        .records()
        .iter()
        .filter(|r| r.name() != name)
        .cloned()
        .collect();
    let removed = kept.len() != before;
    *doc.records_mut() = kept;
    (doc, removed)
}

/// Apply one mutation
pub fn apply<D: RecordList>(doc: D, mutation: Mutation<D::Record>) -> Result<D> {
    match mutation {
        Mutation::Add(record) => add_record(doc, record),
        Mutation::Replace(record) => {
            let name = record.name().to_string();
            update_record(doc, &name, |existing| *existing = record)
        }
        Mutation::Remove(name) => Ok(delete_record(doc, &name).0),
    }
}

/// Whole-document access to a parent
#[async_trait]
pub trait DocumentStore: Send + Sync {
    type Parent: std::fmt::Display + Send + Sync;
    type Document: RecordList;

    /// Lock key that every writer of `parent` shares
    fn lock_key(&self, parent: &Self::Parent) -> LockKey;

    /// Fetch the current document; `NotFound` if the parent has none
    async fn get(&self, ctx: &OperationContext, parent: &Self::Parent) -> Result<Self::Document>;

    /// Overwrite the whole document
    async fn persist(
        &self,
        ctx: &OperationContext,
        parent: &Self::Parent,
        doc: Self::Document,
    ) -> Result<Self::Document>;

    /// Starting document for a parent that has none yet, if one may be created
    fn empty(&self, _parent: &Self::Parent) -> Option<Self::Document> {
        None
    }
}

/// Lock-protected record operations over a [`DocumentStore`]
pub struct ListMergeEngine<S> {
    store: S,
    locks: Arc<LockRegistry>,
}

impl<S: DocumentStore> ListMergeEngine<S> {
    pub fn new(store: S, locks: Arc<LockRegistry>) -> Self {
        Self { store, locks }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch the parent document (no lock; reads are snapshots)
    pub async fn get(&self, ctx: &OperationContext, parent: &S::Parent) -> Result<S::Document> {
        self.store.get(ctx, parent).await
    }

    /// Fetch one record; `Ok(None)` if the parent or the record is absent
    pub async fn read_record(
        &self,
        ctx: &OperationContext,
        parent: &S::Parent,
        name: &str,
    ) -> Result<Option<<S::Document as RecordList>::Record>> {
        match self.store.get(ctx, parent).await {
            Ok(doc) => Ok(find_record(&doc, name).cloned()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Lock the parent, then get → apply → persist
    ///
    /// A `Remove` against a parent with no document, or for an absent
    /// record, succeeds without writing.
    pub async fn mutate(
        &self,
        ctx: &OperationContext,
        parent: &S::Parent,
        mutation: Mutation<<S::Document as RecordList>::Record>,
    ) -> Result<S::Document> {
        let guard = self.locks.acquire(ctx, self.store.lock_key(parent)).await?;

        let current = match self.store.get(ctx, parent).await {
            Ok(doc) => doc,
            Err(e) if e.is_not_found() => match (&mutation, self.store.empty(parent)) {
                (Mutation::Add(_), Some(empty)) => empty,
                (Mutation::Remove(name), Some(empty)) => {
                    tracing::debug!("{} has no document, nothing to remove for {}", parent, name);
                    return Ok(empty);
                }
                _ => return Err(e),
            },
            Err(e) => return Err(e),
        };

        let result = match mutation {
            Mutation::Remove(name) => {
                let (doc, removed) = delete_record(current, &name);
                if !removed {
                    tracing::debug!("{} not present in {}, nothing to remove", name, parent);
                    return Ok(doc);
                }
                self.store.persist(ctx, parent, doc).await
            }
            other => {
                let name = other.record_name().to_string();
                let doc = apply(current, other).map_err(|e| match e {
                    CloudError::AlreadyExists(_) => {
                        CloudError::AlreadyExists(format!("{} in {}", name, parent))
                    }
                    CloudError::NotFound(_) => CloudError::NotFound(format!("{} in {}", name, parent)),
                    other => other,
                })?;
                self.store.persist(ctx, parent, doc).await
            }
        };

        guard.release();
        result
    }
}
