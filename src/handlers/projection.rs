//! Generic natural-key sync and append-only history sync.

use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{SyncError, SyncHandler, SyncOutcome};
use crate::dispatcher::{Fields, FromFields};
use crate::models::CreditHistory;
use crate::storage::projection::CREDIT_HISTORIES_COLLECTION;
use crate::storage::{ProjectionEntity, ProjectionStore};

/// Mutation an event stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

/// Mirrors one entity family into its collection by natural key.
///
/// - create: insert unless a record with the key exists
/// - update: update by key, or create when nothing matched
/// - delete: remove by key; already absent counts as success
pub struct ProjectionSyncHandler<E> {
    name: String,
    action: SyncAction,
    store: ProjectionStore,
    _entity: PhantomData<fn() -> E>,
}

impl<E> ProjectionSyncHandler<E>
where
    E: ProjectionEntity + FromFields,
{
    pub fn new(name: impl Into<String>, action: SyncAction, store: ProjectionStore) -> Self {
        Self {
            name: name.into(),
            action,
            store,
            _entity: PhantomData,
        }
    }

    async fn create(&self, entity: &mut E) -> Result<SyncOutcome, SyncError> {
        let key = entity.natural_key().to_string();
        if self.store.find_by_key::<E>(&key).await?.is_some() {
            debug!(collection = E::COLLECTION, %key, "Record already present");
            return Ok(SyncOutcome::AlreadyPresent);
        }

        if let Some(id) = entity.surrogate_id_mut() {
            if id.is_empty() {
                *id = uuid::Uuid::new_v4().to_string();
            }
        }

        match self.store.insert(&*entity).await {
            Ok(()) => {
                info!(collection = E::COLLECTION, %key, "Record created");
                Ok(SyncOutcome::Created)
            }
            // A concurrent writer inserted the same key between find and insert.
            Err(e) if e.is_duplicate_key() => Ok(SyncOutcome::AlreadyPresent),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, mut entity: E) -> Result<SyncOutcome, SyncError> {
        if self.store.update_by_key(&entity).await? {
            debug!(collection = E::COLLECTION, key = entity.natural_key(), "Record updated");
            return Ok(SyncOutcome::Updated);
        }

        info!(
            collection = E::COLLECTION,
            key = entity.natural_key(),
            "No record to update, creating from update payload"
        );
        match self.create(&mut entity).await? {
            SyncOutcome::Created => Ok(SyncOutcome::Healed),
            // Created concurrently after the update missed; apply again.
            _ => {
                self.store.update_by_key(&entity).await?;
                Ok(SyncOutcome::Updated)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<SyncOutcome, SyncError> {
        if self.store.delete_by_key::<E>(key).await? {
            info!(collection = E::COLLECTION, %key, "Record deleted");
            Ok(SyncOutcome::Deleted)
        } else {
            debug!(collection = E::COLLECTION, %key, "Record already absent");
            Ok(SyncOutcome::AlreadyAbsent)
        }
    }
}

#[async_trait]
impl<E> SyncHandler for ProjectionSyncHandler<E>
where
    E: ProjectionEntity + FromFields + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, fields: &Fields) -> Result<SyncOutcome, SyncError> {
        let mut entity = E::from_fields(fields);
        if entity.natural_key().is_empty() {
            return Err(SyncError::MissingKey {
                entity: E::COLLECTION,
                field: E::NATURAL_KEY,
            });
        }

        match self.action {
            SyncAction::Create => self.create(&mut entity).await,
            SyncAction::Update => self.update(entity).await,
            SyncAction::Delete => self.delete(entity.natural_key()).await,
        }
    }
}

/// Appends credit history entries. Duplicate deliveries append again.
pub struct CreditHistoryHandler {
    store: ProjectionStore,
}

impl CreditHistoryHandler {
    pub fn new(store: ProjectionStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SyncHandler for CreditHistoryHandler {
    fn name(&self) -> &str {
        "credit-history"
    }

    async fn handle(&self, fields: &Fields) -> Result<SyncOutcome, SyncError> {
        let history = CreditHistory::from_fields(fields);
        if history.user_id.is_empty() {
            return Err(SyncError::MissingKey {
                entity: CREDIT_HISTORIES_COLLECTION,
                field: "userId",
            });
        }
        self.store
            .append(CREDIT_HISTORIES_COLLECTION, &history)
            .await?;
        debug!(user_id = %history.user_id, kind = %history.kind, "Credit history appended");
        Ok(SyncOutcome::Appended)
    }
}
