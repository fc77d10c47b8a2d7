/*!
 * Key-value document store abstraction.
 *
 * Everything durable (source documents, progress records, finished results)
 * is a JSON value stored under a namespaced key. The orchestrator only talks
 * to the `DocumentStore` trait, so any backend with get/put/delete by id works.
 */

use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::StoreError;

/// Key namespaces used inside the store
pub mod keys {
    /// Source document and its metadata
    pub fn source(translation_id: &str) -> String {
        format!("source:{}", translation_id)
    }

    /// Batch progress record
    pub fn progress(translation_id: &str) -> String {
        format!("progress:{}", translation_id)
    }

    /// Completed translated document
    pub fn result(translation_id: &str) -> String {
        format!("result:{}", translation_id)
    }

    /// Throttled snapshot of in-flight streaming progress
    pub fn live(translation_id: &str) -> String {
        format!("live:{}", translation_id)
    }
}

/// Durable key-value store of JSON documents
#[async_trait]
pub trait DocumentStore: Send + Sync + Debug {
    /// Fetch the document stored under `id`
    async fn get(&self, id: &str) -> Result<Option<Value>, StoreError>;

    /// Insert or replace the document stored under `id`
    async fn put(&self, id: &str, value: Value) -> Result<(), StoreError>;

    /// Remove the document stored under `id`; removing a missing id is not an error
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Fetch and deserialize a typed document
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    id: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(id).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and store a typed document
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn DocumentStore,
    id: &str,
    value: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(value)?;
    store.put(id, value).await
}

/// In-process store backed by a hash map.
///
/// Writes can be made to fail on demand, which lets tests exercise the
/// persistence error path without a real backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Value>>,
    /// Number of upcoming `put` calls that will fail
    failing_writes: AtomicUsize,
    /// Key prefixes whose writes always fail
    failing_prefixes: RwLock<HashSet<String>>,
    /// Total `put` calls, failed ones included
    put_calls: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Make every write to keys starting with `prefix` fail
    pub fn fail_writes_with_prefix(&self, prefix: impl Into<String>) {
        self.failing_prefixes.write().insert(prefix.into());
    }

    /// Stop failing writes
    pub fn clear_write_failures(&self) {
        self.failing_writes.store(0, Ordering::SeqCst);
        self.failing_prefixes.write().clear();
    }

    /// Number of `put` calls seen so far
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Whether a document exists under `id`
    pub fn contains(&self, id: &str) -> bool {
        self.documents.read().contains_key(id)
    }

    fn should_fail(&self, id: &str) -> bool {
        if self
            .failing_prefixes
            .read()
            .iter()
            .any(|prefix| id.starts_with(prefix.as_str()))
        {
            return true;
        }

        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.documents.read().get(id).cloned())
    }

    async fn put(&self, id: &str, value: Value) -> Result<(), StoreError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(id) {
            debug!("Injected write failure for {}", id);
            return Err(StoreError::Backend(format!("injected write failure for {}", id)));
        }
        self.documents.write().insert(id.to_string(), value);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.documents.write().remove(id);
        Ok(())
    }
}
