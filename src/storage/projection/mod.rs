//! Typed projection adapter over a [`DocumentStore`].
//!
//! Projection records are addressed by their business (natural) key, never
//! by the store's internal identity.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::interfaces::document_store::{Document, DocumentStore, Filter, Result, StoreError};
use crate::models::{RechargeRecord, RechargeStatus, User};

/// Collection names.
pub const NOVELS_COLLECTION: &str = "novels";
pub const USER_CREDITS_COLLECTION: &str = "user_credits";
pub const CREDIT_HISTORIES_COLLECTION: &str = "credit_histories";
pub const RECHARGE_RECORDS_COLLECTION: &str = "recharge_records";
pub const USERS_COLLECTION: &str = "users";
pub const SYNC_POSITIONS_COLLECTION: &str = "sync_positions";

/// A record mirrored into its own collection under a unique natural key.
pub trait ProjectionEntity: Serialize + DeserializeOwned + Send + Sync {
    /// Collection holding this entity.
    const COLLECTION: &'static str;
    /// Field carrying the natural key. Backed by a unique index.
    const NATURAL_KEY: &'static str;
    /// Fields an update never overwrites.
    const IMMUTABLE_FIELDS: &'static [&'static str] = &[];

    fn natural_key(&self) -> &str;

    /// Surrogate identity slot, for entities that carry one.
    fn surrogate_id_mut(&mut self) -> Option<&mut String> {
        None
    }
}

/// Serialize a value into a document.
pub fn to_document<T: Serialize>(collection: &str, value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject(collection.to_string())),
    }
}

fn from_document<T: DeserializeOwned>(document: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

/// Typed CRUD over the projection collections.
///
/// Cheap to clone; all clones share the same backend handle.
#[derive(Clone)]
pub struct ProjectionStore {
    backend: Arc<dyn DocumentStore>,
}

impl ProjectionStore {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn DocumentStore> {
        &self.backend
    }

    /// Create the unique indexes the sync handlers and the recharge
    /// workflow rely on.
    pub async fn init(&self) -> Result<()> {
        let indexes = [
            (NOVELS_COLLECTION, "storyOutline"),
            (USER_CREDITS_COLLECTION, "userId"),
            (RECHARGE_RECORDS_COLLECTION, "orderSn"),
            (USERS_COLLECTION, "email"),
            (SYNC_POSITIONS_COLLECTION, "handler"),
        ];
        for (collection, field) in indexes {
            self.backend.ensure_unique_index(collection, field).await?;
            debug!(collection, field, "Unique index ensured");
        }
        info!("Projection indexes initialized");
        Ok(())
    }

    /// Release the backend.
    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }

    // ========================================================================
    // Entity CRUD
    // ========================================================================

    pub async fn find_by_key<E: ProjectionEntity>(&self, key: &str) -> Result<Option<E>> {
        let filter = Filter::eq(E::NATURAL_KEY, key);
        match self.backend.find_one(E::COLLECTION, &filter).await? {
            Some(document) => Ok(Some(from_document(document)?)),
            None => Ok(None),
        }
    }

    pub async fn insert<E: ProjectionEntity>(&self, entity: &E) -> Result<()> {
        let document = to_document(E::COLLECTION, entity)?;
        self.backend.insert_one(E::COLLECTION, document).await
    }

    /// Overwrite the mutable fields of the record with the entity's key.
    ///
    /// Returns `false` when no record has that key.
    pub async fn update_by_key<E: ProjectionEntity>(&self, entity: &E) -> Result<bool> {
        let mut fields = to_document(E::COLLECTION, entity)?;
        for field in E::IMMUTABLE_FIELDS {
            fields.remove(*field);
        }
        let filter = Filter::eq(E::NATURAL_KEY, entity.natural_key());
        self.backend.update_one(E::COLLECTION, &filter, fields).await
    }

    /// Remove the record with `key`. Returns whether one existed.
    pub async fn delete_by_key<E: ProjectionEntity>(&self, key: &str) -> Result<bool> {
        let filter = Filter::eq(E::NATURAL_KEY, key);
        self.backend.delete_one(E::COLLECTION, &filter).await
    }

    pub async fn count<E: ProjectionEntity>(&self) -> Result<u64> {
        self.backend.count(E::COLLECTION, &Filter::all()).await
    }

    pub async fn all<E: ProjectionEntity>(&self) -> Result<Vec<E>> {
        self.backend
            .find(E::COLLECTION, &Filter::all())
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// Insert into a keyless, append-only collection.
    pub async fn append<T: Serialize>(&self, collection: &str, value: &T) -> Result<()> {
        let document = to_document(collection, value)?;
        self.backend.insert_one(collection, document).await
    }

    pub async fn count_in(&self, collection: &str) -> Result<u64> {
        self.backend.count(collection, &Filter::all()).await
    }

    // ========================================================================
    // Recharge bookkeeping
    // ========================================================================

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_by_key::<User>(email).await
    }

    pub async fn find_recharge(&self, order_sn: &str) -> Result<Option<RechargeRecord>> {
        self.find_by_key::<RechargeRecord>(order_sn).await
    }

    /// Insert a new record. A lost race surfaces as `StoreError::DuplicateKey`.
    pub async fn reserve_recharge(&self, record: &RechargeRecord) -> Result<()> {
        self.insert(record).await
    }

    /// Record an order that failed before it could be reserved.
    ///
    /// An existing record for the same order wins; this never overwrites it.
    pub async fn record_failed_recharge(&self, record: &RechargeRecord) -> Result<bool> {
        match self.insert(record).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_duplicate_key() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Move a pending order to `failed`. Terminal records are left alone.
    pub async fn mark_recharge_failed(&self, order_sn: &str) -> Result<bool> {
        let now = serde_json::to_value(Utc::now())?;
        let mut fields = Document::new();
        fields.insert("status".into(), RechargeStatus::Failed.as_str().into());
        fields.insert("updatedAt".into(), now);
        self.backend
            .update_one(RECHARGE_RECORDS_COLLECTION, &pending_order(order_sn), fields)
            .await
    }

    /// Move a pending order to `success` with its outcome.
    pub async fn finalize_recharge(
        &self,
        order_sn: &str,
        user_id: &str,
        amount: i64,
        new_credit: i64,
    ) -> Result<bool> {
        let now = serde_json::to_value(Utc::now())?;
        let mut fields = Document::new();
        fields.insert("status".into(), RechargeStatus::Success.as_str().into());
        fields.insert("userId".into(), user_id.into());
        fields.insert("amount".into(), amount.into());
        fields.insert("newCredit".into(), new_credit.into());
        fields.insert("processedAt".into(), now.clone());
        fields.insert("updatedAt".into(), now);
        self.backend
            .update_one(RECHARGE_RECORDS_COLLECTION, &pending_order(order_sn), fields)
            .await
    }

    // ========================================================================
    // Sync positions
    // ========================================================================

    /// Last block a handler finished, if it ever checkpointed.
    pub async fn load_position(&self, handler: &str) -> Result<Option<u64>> {
        let filter = Filter::eq("handler", handler);
        let document = self
            .backend
            .find_one(SYNC_POSITIONS_COLLECTION, &filter)
            .await?;
        Ok(document.and_then(|d| d.get("block").and_then(Value::as_u64)))
    }

    /// Record the last block a handler finished.
    pub async fn save_position(&self, handler: &str, block: u64) -> Result<()> {
        let filter = Filter::eq("handler", handler);
        let mut fields = Document::new();
        fields.insert("block".into(), block.into());
        fields.insert("updatedAt".into(), serde_json::to_value(Utc::now())?);

        if self
            .backend
            .update_one(SYNC_POSITIONS_COLLECTION, &filter, fields.clone())
            .await?
        {
            return Ok(());
        }

        fields.insert("handler".into(), handler.into());
        match self.backend.insert_one(SYNC_POSITIONS_COLLECTION, fields).await {
            // Another writer created it first; positions only move forward per
            // handler so the next save updates it.
            Err(e) if e.is_duplicate_key() => Ok(()),
            other => other,
        }
    }
}

fn pending_order(order_sn: &str) -> Filter {
    Filter::eq("orderSn", order_sn).and("status", RechargeStatus::Pending.as_str())
}
