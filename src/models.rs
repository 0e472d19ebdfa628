//! Domain records shared by the ledger client, the projection and the
//! recharge workflow.
//!
//! Field names serialize in camelCase, matching the ledger's JSON encoding so
//! the same structs read ledger responses and write projection documents.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::projection::{
    ProjectionEntity, NOVELS_COLLECTION, RECHARGE_RECORDS_COLLECTION, USERS_COLLECTION,
    USER_CREDITS_COLLECTION,
};

/// Textual date-time format used by ledger entities.
pub const LEDGER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time in the ledger's textual format.
pub fn ledger_timestamp() -> String {
    Local::now().format(LEDGER_TIME_FORMAT).to_string()
}

/// A novel resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Novel {
    pub id: String,
    pub author: String,
    pub story_outline: String,
    pub subsections: String,
    pub characters: String,
    pub items: String,
    pub total_scenes: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectionEntity for Novel {
    const COLLECTION: &'static str = NOVELS_COLLECTION;
    const NATURAL_KEY: &'static str = "storyOutline";
    const IMMUTABLE_FIELDS: &'static [&'static str] = &["id", "createdAt"];

    fn natural_key(&self) -> &str {
        &self.story_outline
    }

    fn surrogate_id_mut(&mut self) -> Option<&mut String> {
        Some(&mut self.id)
    }
}

/// Credit balance of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserCredit {
    pub user_id: String,
    pub credit: i64,
    pub total_used: i64,
    pub total_recharge: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectionEntity for UserCredit {
    const COLLECTION: &'static str = USER_CREDITS_COLLECTION;
    const NATURAL_KEY: &'static str = "userId";
    const IMMUTABLE_FIELDS: &'static [&'static str] = &["createdAt"];

    fn natural_key(&self) -> &str {
        &self.user_id
    }
}

/// One credit movement. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreditHistory {
    pub user_id: String,
    pub amount: i64,
    /// `consume`, `recharge` or `reward`.
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub novel_id: String,
}

/// Account in the user directory, resolved by email during recharge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
}

impl ProjectionEntity for User {
    const COLLECTION: &'static str = USERS_COLLECTION;
    const NATURAL_KEY: &'static str = "email";

    fn natural_key(&self) -> &str {
        &self.email
    }
}

/// Lifecycle of a recharge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RechargeStatus {
    Pending,
    Success,
    Failed,
}

impl RechargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RechargeStatus::Pending => "pending",
            RechargeStatus::Success => "success",
            RechargeStatus::Failed => "failed",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RechargeStatus::Pending)
    }
}

/// Idempotency anchor of one recharge order, keyed by `orderSn`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeRecord {
    pub id: String,
    pub order_sn: String,
    #[serde(default)]
    pub user_id: String,
    pub email: String,
    /// Tokens credited. Zero until the order succeeds.
    #[serde(default)]
    pub amount: i64,
    /// Paid price in cents.
    pub actual_price: i64,
    /// Credit balance after this recharge. Zero until the order succeeds.
    #[serde(default)]
    pub new_credit: i64,
    pub status: RechargeStatus,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RechargeRecord {
    /// New record in `status` with nothing credited yet.
    pub fn new(
        order_sn: impl Into<String>,
        user_id: impl Into<String>,
        email: impl Into<String>,
        actual_price: i64,
        status: RechargeStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order_sn: order_sn.into(),
            user_id: user_id.into(),
            email: email.into(),
            amount: 0,
            actual_price,
            new_credit: 0,
            status,
            processed_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}

impl ProjectionEntity for RechargeRecord {
    const COLLECTION: &'static str = RECHARGE_RECORDS_COLLECTION;
    const NATURAL_KEY: &'static str = "orderSn";

    fn natural_key(&self) -> &str {
        &self.order_sn
    }
}
