use crate::types::{BatchId, OrderId, TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One grant of PT credits with its own consumption/expiry tracking.
///
/// The ledger is append-only: rows are created by `grant` and only the
/// `consumed` column is ever mutated afterwards (by consume/refund).
/// Corrections are new batches, not edits of history. A negative
/// `total_credits` is an administrative deduction; such batches are never
/// consumed from, they just reduce the available sum.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditBatch {
    pub id: BatchId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub order_id: Option<OrderId>,
    pub total_credits: i64,
    pub consumed: i64,
    pub purchased_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CreditBatch {
    pub fn remaining(&self) -> i64 {
        self.total_credits - self.consumed
    }

    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|e| e < now)
    }
}

/// Database request for creating a new credit batch
#[derive(Debug, Clone)]
pub struct CreditGrantDBRequest {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub order_id: Option<OrderId>,
    pub total_credits: i64,
    /// Defaults to NOW() when absent (order backfill passes an explicit one).
    pub purchased_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

/// Outcome of a refund. A refund that finds no consumed balance anywhere is
/// a tolerated no-op ("nothing to refund"), not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundOutcome {
    pub requested: i64,
    pub restored: i64,
}

impl RefundOutcome {
    pub fn nothing_to_refund(&self) -> bool {
        self.restored == 0
    }
}
