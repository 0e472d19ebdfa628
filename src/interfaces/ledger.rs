//! Ledger interface.
//!
//! The ledger is the authoritative, append-only store. It is reached only
//! through two operations: `submit` (durably commits a state change and may
//! emit one event) and `evaluate` (read-only, never emits). Its event feed is
//! exposed separately through [`EventFeed`].

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur talking to the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Transaction '{tx_name}' rejected: {message}")]
    Rejected { tx_name: String, message: String },

    /// The caller stopped waiting. For submits the mutation may still have
    /// committed.
    #[error("Transaction '{tx_name}' timed out after {timeout_ms}ms (commit unknown: {commit_unknown})")]
    Timeout {
        tx_name: String,
        timeout_ms: u64,
        commit_unknown: bool,
    },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Subscription failed: {0}")]
    Subscription(String),

    #[error("Malformed response for '{tx_name}'")]
    Decode {
        tx_name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl LedgerError {
    /// Whether a caller may retry the same call.
    ///
    /// Rejections are deterministic (key exists, key absent, insufficient
    /// credit) and never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Timeout { .. } | LedgerError::Connection(_)
        )
    }
}

/// One state-change notification from the event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    /// Name of the emitting operation (`CreateNovel`, `UpdateUserCredit`, ...).
    pub event_name: String,
    /// JSON encoding of the entity after the mutation (before it, for deletes).
    pub payload: Vec<u8>,
    /// Block the emitting transaction was committed in.
    pub block_number: u64,
}

impl LedgerEvent {
    pub fn new(event_name: impl Into<String>, payload: Vec<u8>, block_number: u64) -> Self {
        Self {
            event_name: event_name.into(),
            payload,
            block_number,
        }
    }
}

/// Ordered stream of ledger events. Ends when the feed closes.
pub type EventStream = BoxStream<'static, LedgerEvent>;

/// Transaction interface of the ledger.
///
/// Implementations:
/// - `InMemoryLedger`: reference ledger for standalone mode and tests
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Submit a mutating transaction and wait for its commit.
    async fn submit(&self, tx_name: &str, args: &[String]) -> Result<Vec<u8>>;

    /// Evaluate a read-only transaction.
    async fn evaluate(&self, tx_name: &str, args: &[String]) -> Result<Vec<u8>>;
}

/// Event feed of the ledger.
#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Open a subscription.
    ///
    /// With `Some(block)` delivery starts at that block (replay/backfill),
    /// with `None` at the feed's live position.
    async fn subscribe(&self, start_block: Option<u64>) -> Result<EventStream>;
}
