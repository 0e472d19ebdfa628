//! Error taxonomy shared across the sync pipeline and the recharge workflow.
//!
//! Each module keeps its own `thiserror` enum; `ErrorKind` is the
//! transport-neutral classification callers map to responses.

use std::fmt;

/// Classification of every failure the subsystem can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SignatureInvalid,
    TimestampExpired,
    TimestampFuture,
    UserNotFound,
    DuplicateOrderInProgress,
    OrderAlreadyFailed,
    LedgerReadFailure,
    LedgerWriteFailure,
    /// Never returned to a recharge caller; logged where it happens.
    ProjectionWriteFailure,
    /// The projection could not be read, so a recharge could not be
    /// checked for idempotency.
    ProjectionReadFailure,
    SubscriptionFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SignatureInvalid => "SignatureInvalid",
            ErrorKind::TimestampExpired => "TimestampExpired",
            ErrorKind::TimestampFuture => "TimestampFuture",
            ErrorKind::UserNotFound => "UserNotFound",
            ErrorKind::DuplicateOrderInProgress => "DuplicateOrderInProgress",
            ErrorKind::OrderAlreadyFailed => "OrderAlreadyFailed",
            ErrorKind::LedgerReadFailure => "LedgerReadFailure",
            ErrorKind::LedgerWriteFailure => "LedgerWriteFailure",
            ErrorKind::ProjectionWriteFailure => "ProjectionWriteFailure",
            ErrorKind::ProjectionReadFailure => "ProjectionReadFailure",
            ErrorKind::SubscriptionFailure => "SubscriptionFailure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
