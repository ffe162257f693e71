use crate::types::{SessionId, TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use utoipa::ToSchema;

/// PT session status stored as TEXT in the database.
///
/// Transitions: PENDING_APPROVAL -> SCHEDULED | REJECTED;
/// SCHEDULED -> COMPLETED | CANCELLED | NO_SHOW. Everything else is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    PendingApproval,
    Scheduled,
    Completed,
    Cancelled,
    Rejected,
    NoShow,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::PendingApproval => "PENDING_APPROVAL",
            SessionStatus::Scheduled => "SCHEDULED",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Cancelled => "CANCELLED",
            SessionStatus::Rejected => "REJECTED",
            SessionStatus::NoShow => "NO_SHOW",
        };
        write!(f, "{s}")
    }
}

// Database entity model for a PT session
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PtSession {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub trainer_id: UserId,
    pub customer_id: UserId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub cancelled_by: Option<UserId>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionBookDBRequest {
    pub tenant_id: TenantId,
    pub trainer_id: UserId,
    pub customer_id: UserId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Book into PENDING_APPROVAL instead of SCHEDULED.
    pub requires_approval: bool,
    pub note: Option<String>,
}

/// What cancellation decided about the booking credit. `required_notice_hours`
/// is set when a customer cancellation was inside the notice window, so the
/// client can tell the user exactly which threshold was missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationOutcome {
    pub refunded: bool,
    pub required_notice_hours: Option<i64>,
}
