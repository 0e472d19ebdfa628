//! MongoDB implementation of the document store.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use serde_json::Value;
use tracing::info;

use crate::config::MongodbConfig;
use crate::interfaces::document_store::{Document, DocumentStore, Filter, Result, StoreError};

/// Server error code for unique index violations.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB implementation of DocumentStore.
pub struct MongoDocumentStore {
    client: Client,
    database: Database,
}

impl MongoDocumentStore {
    /// Connect and verify the server is reachable.
    pub async fn connect(config: &MongodbConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.max_pool_size = Some(config.max_pool_size);
        options.min_pool_size = Some(config.min_pool_size);
        options.connect_timeout = Some(Duration::from_millis(config.connect_timeout_ms));
        options.app_name = Some("ledgersync".to_string());

        let client = Client::with_options(options)?;
        let database = client.database(&config.database);
        database.run_command(doc! { "ping": 1 }).await?;
        info!(database = %config.database, "Connected to MongoDB");

        Ok(Self { client, database })
    }

    /// Wrap an existing client.
    pub fn new(client: Client, database_name: &str) -> Self {
        let database = client.database(database_name);
        Self { client, database }
    }

    /// Get the database reference.
    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<bson::Document> {
        self.database.collection(name)
    }
}

fn to_bson_document(collection: &str, document: Document) -> Result<bson::Document> {
    match bson::to_bson(&Value::Object(document))
        .map_err(|e| StoreError::Backend(e.to_string()))?
    {
        Bson::Document(d) => Ok(d),
        _ => Err(StoreError::NotAnObject(collection.to_string())),
    }
}

fn from_bson_document(mut document: bson::Document) -> Result<Document> {
    document.remove("_id");
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Backend("document is not an object".to_string())),
    }
}

fn to_filter(filter: &Filter) -> Result<bson::Document> {
    let mut out = bson::Document::new();
    for (field, value) in filter.clauses() {
        let value = bson::to_bson(value).map_err(|e| StoreError::Backend(e.to_string()))?;
        out.insert(field.clone(), value);
    }
    Ok(out)
}

/// Map a unique-index violation to `DuplicateKey`.
fn map_write_error(collection: &str, e: mongodb::error::Error) -> StoreError {
    if let ErrorKind::Write(WriteFailure::WriteError(ref write_err)) = *e.kind {
        if write_err.code == DUPLICATE_KEY_CODE {
            return StoreError::DuplicateKey {
                collection: collection.to_string(),
                key: write_err.message.clone(),
            };
        }
    }
    StoreError::Mongo(e)
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn ensure_unique_index(&self, collection: &str, field: &str) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { field: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection(collection).create_index(index).await?;
        Ok(())
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        let document = to_bson_document(collection, document)?;
        self.collection(collection)
            .insert_one(document)
            .await
            .map_err(|e| map_write_error(collection, e))?;
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        match self.collection(collection).find_one(to_filter(filter)?).await? {
            Some(document) => Ok(Some(from_bson_document(document)?)),
            None => Ok(None),
        }
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let cursor = self.collection(collection).find(to_filter(filter)?).await?;
        let documents: Vec<bson::Document> = cursor.try_collect().await?;
        documents.into_iter().map(from_bson_document).collect()
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Document,
    ) -> Result<bool> {
        let update = doc! { "$set": to_bson_document(collection, fields)? };
        let result = self
            .collection(collection)
            .update_one(to_filter(filter)?, update)
            .await
            .map_err(|e| map_write_error(collection, e))?;
        Ok(result.matched_count > 0)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool> {
        let result = self
            .collection(collection)
            .delete_one(to_filter(filter)?)
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        Ok(self
            .collection(collection)
            .count_documents(to_filter(filter)?)
            .await?)
    }

    async fn close(&self) -> Result<()> {
        self.client.clone().shutdown().await;
        info!("MongoDB client shut down");
        Ok(())
    }
}
