//! In-memory document store for standalone mode and testing.
//!
//! Honours unique indexes the same way the MongoDB backend does, so the
//! recharge workflow's reservation race behaves identically. Supports
//! per-collection failure injection for failure-path tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::interfaces::document_store::{Document, DocumentStore, Filter, Result, StoreError};

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Document>>,
    unique_indexes: HashMap<String, HashSet<String>>,
}

impl Inner {
    /// Find a document other than `skip` that already holds one of the
    /// unique values in `candidate`.
    fn unique_conflict(
        &self,
        collection: &str,
        candidate: &Document,
        skip: Option<usize>,
    ) -> Option<String> {
        let fields = self.unique_indexes.get(collection)?;
        let documents = self.collections.get(collection)?;
        for field in fields {
            let Some(value) = candidate.get(field) else {
                continue;
            };
            let taken = documents
                .iter()
                .enumerate()
                .any(|(i, d)| Some(i) != skip && d.get(field) == Some(value));
            if taken {
                return Some(format!("{}={}", field, render(value)));
            }
        }
        None
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Document store that keeps every collection in process memory.
#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: RwLock<Inner>,
    fail_writes: RwLock<HashSet<String>>,
    fail_reads: RwLock<HashSet<String>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `collection` fail until cleared.
    pub async fn set_fail_writes(&self, collection: &str, fail: bool) {
        let mut failing = self.fail_writes.write().await;
        if fail {
            failing.insert(collection.to_string());
        } else {
            failing.remove(collection);
        }
    }

    /// Make every read from `collection` fail until cleared.
    pub async fn set_fail_reads(&self, collection: &str, fail: bool) {
        let mut failing = self.fail_reads.write().await;
        if fail {
            failing.insert(collection.to_string());
        } else {
            failing.remove(collection);
        }
    }

    /// Snapshot of a collection's documents.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner
            .read()
            .await
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    async fn check_write(&self, collection: &str) -> Result<()> {
        if self.fail_writes.read().await.contains(collection) {
            return Err(StoreError::Injected(collection.to_string()));
        }
        Ok(())
    }

    async fn check_read(&self, collection: &str) -> Result<()> {
        if self.fail_reads.read().await.contains(collection) {
            return Err(StoreError::Injected(collection.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ensure_unique_index(&self, collection: &str, field: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .unique_indexes
            .entry(collection.to_string())
            .or_default()
            .insert(field.to_string());
        Ok(())
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        self.check_write(collection).await?;
        let mut inner = self.inner.write().await;
        if let Some(key) = inner.unique_conflict(collection, &document, None) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                key,
            });
        }
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(document);
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        self.check_read(collection).await?;
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        self.check_read(collection).await?;
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Document,
    ) -> Result<bool> {
        self.check_write(collection).await?;
        let mut inner = self.inner.write().await;
        let Some(position) = inner
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().position(|d| filter.matches(d)))
        else {
            return Ok(false);
        };

        let mut updated = inner.collections[collection][position].clone();
        updated.extend(fields);
        if let Some(key) = inner.unique_conflict(collection, &updated, Some(position)) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                key,
            });
        }
        if let Some(docs) = inner.collections.get_mut(collection) {
            docs[position] = updated;
        }
        Ok(true)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool> {
        self.check_write(collection).await?;
        let mut inner = self.inner.write().await;
        let Some(docs) = inner.collections.get_mut(collection) else {
            return Ok(false);
        };
        match docs.iter().position(|d| filter.matches(d)) {
            Some(position) => {
                docs.remove(position);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.check_read(collection).await?;
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_unique_index_rejects_duplicate_insert() {
        let store = MemoryDocumentStore::new();
        store.ensure_unique_index("orders", "orderSn").await.unwrap();

        store
            .insert_one("orders", doc(json!({"orderSn": "A1"})))
            .await
            .unwrap();
        let err = store
            .insert_one("orders", doc(json!({"orderSn": "A1"})))
            .await
            .unwrap_err();

        match err {
            StoreError::DuplicateKey { collection, key } => {
                assert_eq!(collection, "orders");
                assert_eq!(key, "orderSn=A1");
            }
            other => panic!("expected DuplicateKey, got {other:?}"),
        }
        assert_eq!(store.count("orders", &Filter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_without_index_duplicates_are_allowed() {
        let store = MemoryDocumentStore::new();
        store
            .insert_one("history", doc(json!({"userId": "u1"})))
            .await
            .unwrap();
        store
            .insert_one("history", doc(json!({"userId": "u1"})))
            .await
            .unwrap();
        assert_eq!(store.count("history", &Filter::all()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_reports_match() {
        let store = MemoryDocumentStore::new();
        store
            .insert_one("credits", doc(json!({"userId": "u1", "credit": 1})))
            .await
            .unwrap();

        let matched = store
            .update_one(
                "credits",
                &Filter::eq("userId", "u1"),
                doc(json!({"credit": 5})),
            )
            .await
            .unwrap();
        assert!(matched);

        let missed = store
            .update_one(
                "credits",
                &Filter::eq("userId", "u2"),
                doc(json!({"credit": 5})),
            )
            .await
            .unwrap();
        assert!(!missed);

        let found = store
            .find_one("credits", &Filter::eq("userId", "u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["credit"], 5);
    }

    #[tokio::test]
    async fn test_update_cannot_steal_unique_value() {
        let store = MemoryDocumentStore::new();
        store.ensure_unique_index("novels", "storyOutline").await.unwrap();
        store
            .insert_one("novels", doc(json!({"storyOutline": "a"})))
            .await
            .unwrap();
        store
            .insert_one("novels", doc(json!({"storyOutline": "b"})))
            .await
            .unwrap();

        let result = store
            .update_one(
                "novels",
                &Filter::eq("storyOutline", "b"),
                doc(json!({"storyOutline": "a"})),
            )
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn test_delete_absent_is_not_an_error() {
        let store = MemoryDocumentStore::new();
        let removed = store
            .delete_one("novels", &Filter::eq("storyOutline", "nope"))
            .await
            .unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn test_failure_injection_is_per_collection() {
        let store = MemoryDocumentStore::new();
        store.set_fail_writes("user_credits", true).await;

        assert!(store
            .insert_one("user_credits", doc(json!({"userId": "u1"})))
            .await
            .is_err());
        assert!(store
            .insert_one("novels", doc(json!({"storyOutline": "a"})))
            .await
            .is_ok());

        store.set_fail_writes("user_credits", false).await;
        assert!(store
            .insert_one("user_credits", doc(json!({"userId": "u1"})))
            .await
            .is_ok());

        store.set_fail_reads("novels", true).await;
        assert!(store.count("novels", &Filter::all()).await.is_err());
    }
}
