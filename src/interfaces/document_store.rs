//! Document store interface.
//!
//! The projection lives in a schema-flexible document store. Documents are
//! JSON objects grouped in named collections; filters are conjunctions of
//! field equalities.

use async_trait::async_trait;
use serde_json::Value;

/// A schema-flexible document.
pub type Document = serde_json::Map<String, Value>;

/// Result type for document store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique index rejected the write.
    #[error("Duplicate key in '{collection}': {key}")]
    DuplicateKey { collection: String, key: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Expected a JSON object for collection '{0}'")]
    NotAnObject(String),

    #[error("Injected failure on '{0}'")]
    Injected(String),

    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

/// Equality filter over document fields.
///
/// An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Filter matching all documents.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching documents whose `field` equals `value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    /// Add another equality clause.
    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, value)| document.get(field) == Some(value))
    }
}

/// Collection-scoped CRUD with unique-index support.
///
/// Implementations:
/// - `MemoryDocumentStore`: in-process store for standalone mode and tests
/// - `MongoDocumentStore`: MongoDB (feature `mongodb`)
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a unique index on `field` if it does not exist yet.
    async fn ensure_unique_index(&self, collection: &str, field: &str) -> Result<()>;

    /// Insert a document. Fails with `DuplicateKey` on unique-index conflict.
    async fn insert_one(&self, collection: &str, document: Document) -> Result<()>;

    /// First document matching the filter.
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>>;

    /// All documents matching the filter.
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Set `fields` on the first matching document. Returns whether one matched.
    async fn update_one(&self, collection: &str, filter: &Filter, fields: Document)
        -> Result<bool>;

    /// Remove the first matching document. Returns whether one was removed.
    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool>;

    /// Number of documents matching the filter.
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Release backend resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
