//! ledgersync - Ledger projection sync and idempotent recharge
//!
//! Keeps a query-friendly document projection eventually consistent with an
//! append-only ledger that only offers submit/evaluate and a best-effort
//! event feed, and runs a signed, replay-protected recharge workflow on top
//! of both.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod interfaces;
pub mod ledger;
pub mod models;
pub mod recharge;
pub mod reconcile;
pub mod storage;
pub mod utils;

pub use error::ErrorKind;
