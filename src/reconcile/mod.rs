//! Ledger/projection consistency check.
//!
//! Compares true record counts per entity family. Read-only on both sides;
//! drift is reported, never repaired here.

use serde::Serialize;
use tracing::{info, warn};

use crate::interfaces::{LedgerError, StoreError};
use crate::ledger::LedgerClient;
use crate::models::{Novel, UserCredit};
use crate::storage::ProjectionStore;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Failed to count ledger records: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Failed to count projection records: {0}")]
    Store(#[from] StoreError),
}

/// Record counts of one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub novels: u64,
    pub user_credits: u64,
}

/// Credit totals over the projected user credits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProjectionStats {
    pub total_credit: i64,
    pub average_credit: f64,
}

impl ProjectionStats {
    fn from_credits(credits: &[UserCredit]) -> Self {
        let total_credit: i64 = credits.iter().map(|c| c.credit).sum();
        let average_credit = if credits.is_empty() {
            0.0
        } else {
            total_credit as f64 / credits.len() as f64
        };
        Self {
            total_credit,
            average_credit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub consistent: bool,
    pub discrepancies: Vec<String>,
    pub ledger_counts: EntityCounts,
    pub projection_counts: EntityCounts,
    pub stats: ProjectionStats,
}

/// Compares the ledger against the projection.
#[derive(Clone)]
pub struct Reconciler {
    ledger: LedgerClient,
    store: ProjectionStore,
}

impl Reconciler {
    pub fn new(ledger: LedgerClient, store: ProjectionStore) -> Self {
        Self { ledger, store }
    }

    #[tracing::instrument(name = "reconcile", skip_all)]
    pub async fn reconcile(&self) -> Result<ConsistencyReport, ReconcileError> {
        let ledger_counts = EntityCounts {
            novels: self.ledger.count_novels().await?,
            user_credits: self.ledger.count_user_credits().await?,
        };

        let credits: Vec<UserCredit> = self.store.all().await?;
        let projection_counts = EntityCounts {
            novels: self.store.count::<Novel>().await?,
            user_credits: credits.len() as u64,
        };

        let mut discrepancies = Vec::new();
        if ledger_counts.novels != projection_counts.novels {
            discrepancies.push(format!(
                "Novels count mismatch: ledger {}, projection {}",
                ledger_counts.novels, projection_counts.novels
            ));
        }
        if ledger_counts.user_credits != projection_counts.user_credits {
            discrepancies.push(format!(
                "UserCredits count mismatch: ledger {}, projection {}",
                ledger_counts.user_credits, projection_counts.user_credits
            ));
        }

        let report = ConsistencyReport {
            consistent: discrepancies.is_empty(),
            discrepancies,
            ledger_counts,
            projection_counts,
            stats: ProjectionStats::from_credits(&credits),
        };

        if report.consistent {
            info!(
                novels = ledger_counts.novels,
                user_credits = ledger_counts.user_credits,
                "Ledger and projection consistent"
            );
        } else {
            for discrepancy in &report.discrepancies {
                warn!(%discrepancy, "Projection drift detected");
            }
        }
        Ok(report)
    }
}
