//! Named locks for read-modify-write sequences against shared remote documents
//!
//! The remote API has no per-record concurrency token, so every writer of a
//! shared document (or account) serializes through a named lock taken from a
//! [`LockRegistry`]. Handles are created lazily and live as long as the
//! registry. Locks are not reentrant: acquiring the same key twice inside one
//! operation deadlocks until the operation's context gives up.

use crate::context::OperationContext;
use crate::error::{CloudError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Opaque lock identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a named resource of a given type (e.g. an account name)
    pub fn by_name(name: &str, resource_type: &str) -> Self {
        Self(format!("{}.{}", resource_type, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LockKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for LockKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Registry mapping lock keys to async mutexes
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the mutex for `key`
    fn handle(&self, key: &LockKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Block until `key` is exclusively held
    ///
    /// Fails with [`CloudError::LockTimeout`] if the context is cancelled or
    /// its deadline passes while waiting.
    pub async fn acquire(
        &self,
        ctx: &OperationContext,
        key: impl Into<LockKey>,
    ) -> Result<NamedLockGuard> {
        let key = key.into();
        let handle = self.handle(&key);

        tracing::debug!("Waiting for lock {}", key);
        tokio::select! {
            biased;
            guard = handle.lock_owned() => {
                tracing::debug!("Acquired lock {}", key);
                Ok(NamedLockGuard { key, guard: Some(guard) })
            }
            _ = ctx.done() => Err(CloudError::LockTimeout(key.to_string())),
        }
    }

    pub async fn acquire_by_name(
        &self,
        ctx: &OperationContext,
        name: &str,
        resource_type: &str,
    ) -> Result<NamedLockGuard> {
        self.acquire(ctx, LockKey::by_name(name, resource_type)).await
    }

    pub async fn acquire_by_id(&self, ctx: &OperationContext, id: &str) -> Result<NamedLockGuard> {
        self.acquire(ctx, LockKey::new(id)).await
    }

    /// Lock several names of one type at once
    ///
    /// Names are deduplicated and taken in sorted order so two callers with
    /// overlapping sets cannot deadlock each other. If any acquisition fails
    /// the locks already held are released.
    pub async fn acquire_multiple_by_name<S: AsRef<str>>(
        &self,
        ctx: &OperationContext,
        names: &[S],
        resource_type: &str,
    ) -> Result<MultiLockGuard> {
        let mut keys: Vec<LockKey> = names
            .iter()
            .map(|n| LockKey::by_name(n.as_ref(), resource_type))
            .collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.acquire(ctx, key).await?);
        }
        Ok(MultiLockGuard { guards })
    }

    /// Whether a handle exists for `key` (held or not)
    pub fn contains(&self, key: &LockKey) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.contains_key(key)
    }

    /// Number of handles created so far
    pub fn len(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// RAII guard for a named lock
#[derive(Debug)]
pub struct NamedLockGuard {
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NamedLockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Release the lock
    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if self.guard.take().is_some() {
            tracing::debug!("Released lock {}", self.key);
        }
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// Guard set returned by [`LockRegistry::acquire_multiple_by_name`]
#[derive(Debug)]
pub struct MultiLockGuard {
    guards: Vec<NamedLockGuard>,
}

impl MultiLockGuard {
    pub fn keys(&self) -> impl Iterator<Item = &LockKey> {
        self.guards.iter().map(|g| g.key())
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Release every held lock, last acquired first
    pub fn release(mut self) {
        while let Some(guard) = self.guards.pop() {
            guard.release();
        }
    }
}
