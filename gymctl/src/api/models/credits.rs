use crate::{
    db::models::credits::CreditBatch,
    types::{OrderId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditGrantCreate {
    /// Customer receiving the credits
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    /// Number of credits; negative values are administrative deductions
    pub credits: i64,
    /// Purchase order this grant came from, if any
    #[schema(value_type = Option<String>, format = "uuid")]
    pub order_id: Option<OrderId>,
    /// When the batch expires; absent means it never does
    pub expires_at: Option<DateTime<Utc>>,
    /// Free-form note for the audit trail
    pub note: Option<String>,
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditBatchResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub order_id: Option<OrderId>,
    pub total_credits: i64,
    pub consumed: i64,
    /// Credits still spendable from this batch
    pub remaining: i64,
    pub purchased_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    /// Spendable credits across all non-expired batches
    pub available: i64,
    pub as_of: DateTime<Utc>,
}

// Conversions
impl From<CreditBatch> for CreditBatchResponse {
    fn from(batch: CreditBatch) -> Self {
        let remaining = batch.remaining();
        Self {
            id: batch.id,
            user_id: batch.user_id,
            order_id: batch.order_id,
            total_credits: batch.total_credits,
            consumed: batch.consumed,
            remaining,
            purchased_at: batch.purchased_at,
            expires_at: batch.expires_at,
            note: batch.note,
            created_at: batch.created_at,
        }
    }
}
