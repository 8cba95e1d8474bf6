//! In-memory object store for tests.
//!
//! Keeps objects in a sorted map, records every mutation in order so tests
//! can assert on write/delete sequencing, and supports failure injection by
//! key substring.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::listing::{page_sorted_keys, validate_key};
use crate::{ListPage, ListRequest, ObjectStore, StoreError, StoreResult};

/// A mutation applied to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put(String),
    Delete(String),
}

/// Failure injection configuration.
///
/// An operation fails when its key contains any of the configured substrings.
#[derive(Debug, Clone, Default)]
pub struct FailureInjection {
    pub fail_get: Vec<String>,
    pub fail_put: Vec<String>,
    pub fail_delete: Vec<String>,
    pub fail_list: bool,
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    ops: Vec<StoreOp>,
    failures: FailureInjection,
    page_size: Option<usize>,
}

/// Thread-safe in-memory object store.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap every listing page at `page_size` entries regardless of the request.
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.write().page_size = Some(page_size);
        self
    }

    /// Configure failure injection.
    pub fn set_failures(&self, failures: FailureInjection) {
        self.write().failures = failures;
    }

    /// Every mutation so far, in order.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.read().ops.clone()
    }

    /// Forget the recorded mutations.
    pub fn clear_operations(&self) {
        self.write().ops.clear();
    }

    /// All keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.read().objects.keys().cloned().collect()
    }

    /// Content type recorded for an object.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.read()
            .objects
            .get(key)
            .map(|object| object.content_type.clone())
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn injected(patterns: &[String], key: &str, op: &str) -> StoreResult<()> {
        if patterns.iter().any(|p| key.contains(p.as_str())) {
            return Err(StoreError::Backend(format!("injected {} failure for '{}'", op, key)));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let inner = self.read();
        Self::injected(&inner.failures.fail_get, key, "get")?;
        Ok(inner.objects.get(key).map(|object| object.body.clone()))
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let inner = self.read();
        Self::injected(&inner.failures.fail_get, key, "head")?;
        Ok(inner.objects.contains_key(key))
    }

    fn put(&self, key: &str, body: &[u8], content_type: &str) -> StoreResult<()> {
        validate_key(key)?;
        let mut inner = self.write();
        Self::injected(&inner.failures.fail_put, key, "put")?;
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        inner.ops.push(StoreOp::Put(key.to_string()));
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut inner = self.write();
        Self::injected(&inner.failures.fail_delete, key, "delete")?;
        inner.objects.remove(key);
        inner.ops.push(StoreOp::Delete(key.to_string()));
        Ok(())
    }

    fn list(&self, request: &ListRequest, token: Option<&str>) -> StoreResult<ListPage> {
        let inner = self.read();
        if inner.failures.fail_list {
            return Err(StoreError::Backend(format!(
                "injected list failure for '{}'",
                request.prefix
            )));
        }
        let max_keys = inner
            .page_size
            .map_or(request.max_keys, |cap| cap.min(request.max_keys));
        let keys = inner
            .objects
            .range(request.prefix.clone()..)
            .map(|(key, _)| key.as_str())
            .take_while(|key| key.starts_with(request.prefix.as_str()));
        Ok(page_sorted_keys(keys, request, token, max_keys))
    }
}
