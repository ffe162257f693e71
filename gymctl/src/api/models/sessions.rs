use crate::{
    db::models::sessions::{PtSession, SessionStatus},
    types::UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionBook {
    #[schema(value_type = String, format = "uuid")]
    pub trainer_id: UserId,
    /// Staff may book on behalf of a customer; members always book for
    /// themselves and must leave this absent.
    #[schema(value_type = Option<String>, format = "uuid")]
    pub customer_id: Option<UserId>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Book into PENDING_APPROVAL so the trainer confirms first
    #[serde(default)]
    pub requires_approval: bool,
    pub note: Option<String>,
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub trainer_id: UserId,
    #[schema(value_type = String, format = "uuid")]
    pub customer_id: UserId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub cancelled_by: Option<UserId>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionCancelResponse {
    #[serde(flatten)]
    pub session: SessionResponse,
    /// Whether the booking credit went back to the customer
    pub refunded: bool,
    /// Set when a customer cancellation missed the notice window
    pub required_notice_hours: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionNoShowResponse {
    #[serde(flatten)]
    pub session: SessionResponse,
    pub refunded: bool,
}

// Conversions
impl From<PtSession> for SessionResponse {
    fn from(s: PtSession) -> Self {
        Self {
            id: s.id,
            trainer_id: s.trainer_id,
            customer_id: s.customer_id,
            starts_at: s.starts_at,
            ends_at: s.ends_at,
            status: s.status,
            cancelled_by: s.cancelled_by,
            note: s.note,
            created_at: s.created_at,
        }
    }
}
