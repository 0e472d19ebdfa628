//! Abstract interfaces for ledgersync's external collaborators.
//!
//! These traits define the contracts for:
//! - The ledger (durable submit, read-only evaluate)
//! - The ledger's event feed (ordered per block, best effort)
//! - The document store backing the projection

pub mod document_store;
pub mod ledger;

pub use document_store::{Document, DocumentStore, Filter, StoreError};
pub use ledger::{EventFeed, EventStream, Ledger, LedgerError, LedgerEvent};
