//! Idempotent recharge workflow.
//!
//! A recharge credits a fixed token package to the user behind an email
//! address, once per order number. The order's [`RechargeRecord`] is the only
//! idempotency anchor: the ledger itself cannot tell whether a recharge
//! already happened. The unique index on `orderSn` decides which of several
//! concurrent executions may reach the ledger write, across processes.
//!
//! Order lifecycle: `pending` then exactly one of `success` or `failed`.
//! Terminal states never change.

pub mod signature;

pub use signature::{canonical_string, SignatureValidator, ValidationError};

use std::collections::BTreeMap;

use tracing::{error, info, warn};

use crate::config::RechargeConfig;
use crate::error::ErrorKind;
use crate::interfaces::{LedgerError, StoreError};
use crate::ledger::LedgerClient;
use crate::models::{ledger_timestamp, RechargeRecord, RechargeStatus, UserCredit};
use crate::storage::ProjectionStore;

/// Recharge failures.
#[derive(Debug, thiserror::Error)]
pub enum RechargeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("No user with email {email}")]
    UserNotFound { email: String },

    #[error("Order {order_sn} is already being processed")]
    InProgress { order_sn: String },

    /// Needs operator action; never retried automatically.
    #[error("Order {order_sn} previously failed")]
    AlreadyFailed { order_sn: String },

    #[error("Failed to read credit for order {order_sn}: {source}")]
    LedgerRead {
        order_sn: String,
        #[source]
        source: LedgerError,
    },

    #[error("Failed to write credit for order {order_sn}: {source}")]
    LedgerWrite {
        order_sn: String,
        #[source]
        source: LedgerError,
    },

    #[error("Order bookkeeping unavailable: {0}")]
    Store(#[from] StoreError),
}

impl RechargeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RechargeError::Validation(e) => e.kind(),
            RechargeError::UserNotFound { .. } => ErrorKind::UserNotFound,
            RechargeError::InProgress { .. } => ErrorKind::DuplicateOrderInProgress,
            RechargeError::AlreadyFailed { .. } => ErrorKind::OrderAlreadyFailed,
            RechargeError::LedgerRead { .. } => ErrorKind::LedgerReadFailure,
            RechargeError::LedgerWrite { .. } => ErrorKind::LedgerWriteFailure,
            RechargeError::Store(_) => ErrorKind::ProjectionReadFailure,
        }
    }
}

/// Inbound recharge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RechargeRequest {
    /// Product title. Informational, not signed.
    pub title: String,
    pub order_sn: String,
    pub email: String,
    /// Paid price in cents.
    pub actual_price: i64,
    /// Unix seconds at which the caller signed the request.
    pub timestamp: i64,
    /// Hex HMAC-SHA256 over [`RechargeRequest::signing_params`].
    pub signature: String,
}

impl RechargeRequest {
    /// The parameters covered by the signature.
    pub fn signing_params(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("actual_price".to_string(), self.actual_price.to_string()),
            ("email".to_string(), self.email.clone()),
            ("order_sn".to_string(), self.order_sn.clone()),
            ("timestamp".to_string(), self.timestamp.to_string()),
        ])
    }
}

/// Outcome of a recharge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RechargeReceipt {
    pub order_sn: String,
    pub user_id: String,
    /// Credit balance right after this order was applied.
    pub new_credit: i64,
    pub added_tokens: i64,
    /// The order had already succeeded; nothing was done this time.
    pub replayed: bool,
}

impl RechargeReceipt {
    fn replay_of(record: &RechargeRecord) -> Self {
        Self {
            order_sn: record.order_sn.clone(),
            user_id: record.user_id.clone(),
            new_credit: record.new_credit,
            added_tokens: record.amount,
            replayed: true,
        }
    }
}

/// Orchestrates validation, order bookkeeping, the ledger write and the
/// best-effort projection update.
#[derive(Clone)]
pub struct RechargeWorkflow {
    ledger: LedgerClient,
    store: ProjectionStore,
    validator: SignatureValidator,
    package_amount: i64,
}

impl RechargeWorkflow {
    pub fn new(
        ledger: LedgerClient,
        store: ProjectionStore,
        validator: SignatureValidator,
        package_amount: i64,
    ) -> Self {
        Self {
            ledger,
            store,
            validator,
            package_amount,
        }
    }

    pub fn from_config(
        ledger: LedgerClient,
        store: ProjectionStore,
        config: &RechargeConfig,
    ) -> Result<Self, ValidationError> {
        let validator = SignatureValidator::new(config.signing_key(), config.max_age_secs)?;
        Ok(Self::new(ledger, store, validator, config.package_amount))
    }

    pub fn validator(&self) -> &SignatureValidator {
        &self.validator
    }

    pub fn package_amount(&self) -> i64 {
        self.package_amount
    }

    pub async fn recharge(&self, request: &RechargeRequest) -> Result<RechargeReceipt, RechargeError> {
        self.recharge_at(request, chrono::Utc::now().timestamp()).await
    }

    /// Run the workflow with `now` as the current Unix time.
    #[tracing::instrument(name = "recharge", skip_all, fields(order_sn = %request.order_sn))]
    pub async fn recharge_at(
        &self,
        request: &RechargeRequest,
        now: i64,
    ) -> Result<RechargeReceipt, RechargeError> {
        self.validator
            .verify_signature(&request.signing_params(), &request.signature)?;
        self.validator.validate_timestamp(request.timestamp, now)?;

        // 1. Idempotency check
        if let Some(record) = self.store.find_recharge(&request.order_sn).await? {
            return settled(record);
        }

        // 2. Resolve user
        let Some(user) = self.store.find_user_by_email(&request.email).await? else {
            let record = RechargeRecord::new(
                &request.order_sn,
                "",
                &request.email,
                request.actual_price,
                RechargeStatus::Failed,
            );
            if let Err(e) = self.store.record_failed_recharge(&record).await {
                warn!(error = %e, "Failed to record unknown-user order");
            }
            return Err(RechargeError::UserNotFound {
                email: request.email.clone(),
            });
        };

        // 3. Reserve the order
        let record = RechargeRecord::new(
            &request.order_sn,
            &user.id,
            &request.email,
            request.actual_price,
            RechargeStatus::Pending,
        );
        match self.store.reserve_recharge(&record).await {
            Ok(()) => {}
            Err(e) if e.is_duplicate_key() => {
                info!("Lost reservation race");
                return match self.store.find_recharge(&request.order_sn).await? {
                    Some(winner) => settled(winner),
                    None => Err(RechargeError::InProgress {
                        order_sn: request.order_sn.clone(),
                    }),
                };
            }
            Err(e) => return Err(e.into()),
        }

        // 4. Compute the new balance from the ledger
        let current = match self.ledger.read_user_credit(&user.id).await {
            Ok(credit) => credit,
            Err(source) => {
                self.fail_order(&request.order_sn).await;
                return Err(RechargeError::LedgerRead {
                    order_sn: request.order_sn.clone(),
                    source,
                });
            }
        };
        let updated = UserCredit {
            credit: current.credit + self.package_amount,
            total_recharge: current.total_recharge + self.package_amount,
            updated_at: ledger_timestamp(),
            ..current
        };

        // 5. Commit to the ledger
        if let Err(source) = self
            .ledger
            .update_user_credit(
                &user.id,
                updated.credit,
                updated.total_used,
                updated.total_recharge,
            )
            .await
        {
            if matches!(source, LedgerError::Timeout { commit_unknown: true, .. }) {
                error!(user_id = %user.id, "Ledger commit unknown; order needs operator review");
            }
            self.fail_order(&request.order_sn).await;
            return Err(RechargeError::LedgerWrite {
                order_sn: request.order_sn.clone(),
                source,
            });
        }

        // 6. Mirror into the projection; the event feed repairs any miss
        match self.store.update_by_key(&updated).await {
            Ok(true) => {}
            Ok(false) => info!(user_id = %user.id, "No projected credit yet, leaving it to sync"),
            Err(e) => warn!(
                user_id = %user.id,
                kind = %ErrorKind::ProjectionWriteFailure,
                error = %e,
                "Projection update failed"
            ),
        }

        // 7. Finalize
        match self
            .store
            .finalize_recharge(&request.order_sn, &user.id, self.package_amount, updated.credit)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("Order was no longer pending at finalize"),
            // The credit is committed; the pending record keeps retries out.
            Err(e) => error!(error = %e, "Failed to finalize order"),
        }

        info!(
            user_id = %user.id,
            amount = self.package_amount,
            new_credit = updated.credit,
            "Recharge succeeded"
        );
        Ok(RechargeReceipt {
            order_sn: request.order_sn.clone(),
            user_id: user.id,
            new_credit: updated.credit,
            added_tokens: self.package_amount,
            replayed: false,
        })
    }

    async fn fail_order(&self, order_sn: &str) {
        if let Err(e) = self.store.mark_recharge_failed(order_sn).await {
            error!(order_sn, error = %e, "Failed to mark order failed");
        }
    }
}

/// Answer for an order that already has a record.
fn settled(record: RechargeRecord) -> Result<RechargeReceipt, RechargeError> {
    match record.status {
        RechargeStatus::Success => {
            info!(user_id = %record.user_id, "Order already succeeded, replaying result");
            Ok(RechargeReceipt::replay_of(&record))
        }
        RechargeStatus::Failed => Err(RechargeError::AlreadyFailed {
            order_sn: record.order_sn,
        }),
        RechargeStatus::Pending => Err(RechargeError::InProgress {
            order_sn: record.order_sn,
        }),
    }
}
