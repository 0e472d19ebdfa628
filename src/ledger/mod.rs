//! Typed access to the ledger.
//!
//! `LedgerClient` turns the string-argument transaction surface into typed
//! calls and bounds every call with a timeout. A submit that times out may
//! still have committed; callers get `LedgerError::Timeout` with
//! `commit_unknown` set and must rely on their own idempotency.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::LedgerConfig;
use crate::interfaces::ledger::{Ledger, LedgerError, Result};
use crate::models::{CreditHistory, Novel, UserCredit};

pub use memory::InMemoryLedger;

/// Transaction and event names.
pub mod tx {
    pub const CREATE_NOVEL: &str = "CreateNovel";
    pub const UPDATE_NOVEL: &str = "UpdateNovel";
    pub const DELETE_NOVEL: &str = "DeleteNovel";
    pub const READ_NOVEL: &str = "ReadNovel";
    pub const GET_ALL_NOVELS: &str = "GetAllNovels";

    pub const CREATE_USER_CREDIT: &str = "CreateUserCredit";
    pub const UPDATE_USER_CREDIT: &str = "UpdateUserCredit";
    pub const DELETE_USER_CREDIT: &str = "DeleteUserCredit";
    pub const READ_USER_CREDIT: &str = "ReadUserCredit";
    pub const GET_ALL_USER_CREDITS: &str = "GetAllUserCredits";

    pub const CREATE_CREDIT_HISTORY: &str = "CreateCreditHistory";

    /// Emitted by ledgers that record token consumption as its own event.
    pub const CONSUME_USER_TOKEN: &str = "ConsumeUserToken";
}

/// Timeout-bounded, typed client over a [`Ledger`].
#[derive(Clone)]
pub struct LedgerClient {
    ledger: Arc<dyn Ledger>,
    evaluate_timeout: Duration,
    submit_timeout: Duration,
}

impl LedgerClient {
    pub fn new(ledger: Arc<dyn Ledger>, config: &LedgerConfig) -> Self {
        Self {
            ledger,
            evaluate_timeout: config.evaluate_timeout(),
            submit_timeout: config.submit_timeout(),
        }
    }

    pub async fn submit(&self, tx_name: &str, args: &[String]) -> Result<Vec<u8>> {
        debug!(tx_name, "Submitting transaction");
        match tokio::time::timeout(self.submit_timeout, self.ledger.submit(tx_name, args)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout {
                tx_name: tx_name.to_string(),
                timeout_ms: self.submit_timeout.as_millis() as u64,
                commit_unknown: true,
            }),
        }
    }

    pub async fn evaluate(&self, tx_name: &str, args: &[String]) -> Result<Vec<u8>> {
        match tokio::time::timeout(self.evaluate_timeout, self.ledger.evaluate(tx_name, args))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout {
                tx_name: tx_name.to_string(),
                timeout_ms: self.evaluate_timeout.as_millis() as u64,
                commit_unknown: false,
            }),
        }
    }

    async fn evaluate_json<T: DeserializeOwned>(&self, tx_name: &str, args: &[String]) -> Result<T> {
        let bytes = self.evaluate(tx_name, args).await?;
        serde_json::from_slice(&bytes).map_err(|source| LedgerError::Decode {
            tx_name: tx_name.to_string(),
            source,
        })
    }

    // ========================================================================
    // Novels
    // ========================================================================

    pub async fn create_novel(&self, novel: &Novel) -> Result<()> {
        self.submit(tx::CREATE_NOVEL, &novel_args(novel)).await?;
        Ok(())
    }

    pub async fn update_novel(&self, novel: &Novel) -> Result<()> {
        self.submit(tx::UPDATE_NOVEL, &novel_args(novel)).await?;
        Ok(())
    }

    pub async fn delete_novel(&self, id: &str) -> Result<()> {
        self.submit(tx::DELETE_NOVEL, &[id.to_string()]).await?;
        Ok(())
    }

    pub async fn read_novel(&self, id: &str) -> Result<Novel> {
        self.evaluate_json(tx::READ_NOVEL, &[id.to_string()]).await
    }

    pub async fn get_all_novels(&self) -> Result<Vec<Novel>> {
        let novels: Option<Vec<Novel>> = self.evaluate_json(tx::GET_ALL_NOVELS, &[]).await?;
        Ok(novels.unwrap_or_default())
    }

    // ========================================================================
    // User credits
    // ========================================================================

    pub async fn create_user_credit(
        &self,
        user_id: &str,
        credit: i64,
        total_used: i64,
        total_recharge: i64,
    ) -> Result<()> {
        let args = credit_args(user_id, credit, total_used, total_recharge);
        self.submit(tx::CREATE_USER_CREDIT, &args).await?;
        Ok(())
    }

    pub async fn update_user_credit(
        &self,
        user_id: &str,
        credit: i64,
        total_used: i64,
        total_recharge: i64,
    ) -> Result<()> {
        let args = credit_args(user_id, credit, total_used, total_recharge);
        self.submit(tx::UPDATE_USER_CREDIT, &args).await?;
        Ok(())
    }

    pub async fn delete_user_credit(&self, user_id: &str) -> Result<()> {
        self.submit(tx::DELETE_USER_CREDIT, &[user_id.to_string()])
            .await?;
        Ok(())
    }

    pub async fn read_user_credit(&self, user_id: &str) -> Result<UserCredit> {
        self.evaluate_json(tx::READ_USER_CREDIT, &[user_id.to_string()])
            .await
    }

    pub async fn get_all_user_credits(&self) -> Result<Vec<UserCredit>> {
        let credits: Option<Vec<UserCredit>> =
            self.evaluate_json(tx::GET_ALL_USER_CREDITS, &[]).await?;
        Ok(credits.unwrap_or_default())
    }

    /// Spend one token. Rejected when the balance is exhausted.
    ///
    /// Returns the balance after the spend.
    pub async fn consume_user_token(&self, user_id: &str) -> Result<UserCredit> {
        let mut credit = self.read_user_credit(user_id).await?;
        if credit.credit <= 0 {
            return Err(LedgerError::Rejected {
                tx_name: tx::CONSUME_USER_TOKEN.to_string(),
                message: format!(
                    "user {} has insufficient credit: {}",
                    user_id, credit.credit
                ),
            });
        }
        credit.credit -= 1;
        credit.total_used += 1;
        self.update_user_credit(
            user_id,
            credit.credit,
            credit.total_used,
            credit.total_recharge,
        )
        .await?;
        Ok(credit)
    }

    // ========================================================================
    // Credit history
    // ========================================================================

    pub async fn create_credit_history(&self, history: &CreditHistory) -> Result<()> {
        let args = vec![
            history.user_id.clone(),
            history.amount.to_string(),
            history.kind.clone(),
            history.description.clone(),
            history.novel_id.clone(),
        ];
        self.submit(tx::CREATE_CREDIT_HISTORY, &args).await?;
        Ok(())
    }

    // ========================================================================
    // Counts
    // ========================================================================

    /// Number of novels on the ledger.
    pub async fn count_novels(&self) -> Result<u64> {
        self.count_all(tx::GET_ALL_NOVELS).await
    }

    /// Number of user credit records on the ledger.
    pub async fn count_user_credits(&self) -> Result<u64> {
        self.count_all(tx::GET_ALL_USER_CREDITS).await
    }

    /// Element count of a full-range scan. `null` is an empty scan.
    async fn count_all(&self, tx_name: &str) -> Result<u64> {
        let items: Option<Vec<serde_json::Value>> = self.evaluate_json(tx_name, &[]).await?;
        Ok(items.map_or(0, |items| items.len() as u64))
    }
}

fn novel_args(novel: &Novel) -> Vec<String> {
    vec![
        novel.id.clone(),
        novel.author.clone(),
        novel.story_outline.clone(),
        novel.subsections.clone(),
        novel.characters.clone(),
        novel.items.clone(),
        novel.total_scenes.clone(),
    ]
}

fn credit_args(user_id: &str, credit: i64, total_used: i64, total_recharge: i64) -> Vec<String> {
    vec![
        user_id.to_string(),
        credit.to_string(),
        total_used.to_string(),
        total_recharge.to_string(),
    ]
}
