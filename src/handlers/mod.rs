//! Projection sync handlers.
//!
//! A handler applies one ledger event to the projection. The ledger has
//! already committed by the time an event arrives, so handler failures are
//! reported to the dispatcher for logging and never travel back to the
//! ledger side.

mod projection;

pub use projection::{CreditHistoryHandler, ProjectionSyncHandler, SyncAction};

use async_trait::async_trait;

use crate::dispatcher::Fields;
use crate::error::ErrorKind;
use crate::interfaces::StoreError;

/// Errors raised while applying an event to the projection.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Payload has no '{field}' for {entity}")]
    MissingKey {
        entity: &'static str,
        field: &'static str,
    },

    #[error("Projection write failed: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ProjectionWriteFailure
    }
}

/// What a handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    /// The record already existed; the event was a duplicate delivery.
    AlreadyPresent,
    Updated,
    /// An update found no record and created one instead.
    Healed,
    Deleted,
    /// The record was already gone.
    AlreadyAbsent,
    Appended,
}

/// Applies events of one name to the projection.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Handler name for logs.
    fn name(&self) -> &str;

    async fn handle(&self, fields: &Fields) -> Result<SyncOutcome, SyncError>;
}
