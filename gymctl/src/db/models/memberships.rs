use crate::types::{FreezeIntervalId, MembershipId, PlanId, TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use utoipa::ToSchema;

/// Membership status stored as TEXT in the database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    Active,
    Frozen,
    Suspended,
    Cancelled,
    Blacklisted,
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MembershipStatus::Active => "ACTIVE",
            MembershipStatus::Frozen => "FROZEN",
            MembershipStatus::Suspended => "SUSPENDED",
            MembershipStatus::Cancelled => "CANCELLED",
            MembershipStatus::Blacklisted => "BLACKLISTED",
        };
        write!(f, "{s}")
    }
}

// Database entity model for a membership
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: MembershipId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub status: MembershipStatus,
    pub freezes_used_this_year: i32,
    pub freeze_reset_year: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: PlanId,
    pub tenant_id: TenantId,
    pub name: String,
    pub max_freezes_per_year: i32,
    pub created_at: DateTime<Utc>,
}

/// One freeze period attached to a membership. Immutable after creation;
/// the reconciliation scheduler reads it to decide when to act.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FreezeInterval {
    pub id: FreezeIntervalId,
    pub tenant_id: TenantId,
    pub membership_id: MembershipId,
    pub user_id: UserId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MembershipCreateDBRequest {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub starts_at: DateTime<Utc>,
    pub auto_renew: bool,
}

#[derive(Debug, Clone)]
pub struct PlanCreateDBRequest {
    pub tenant_id: TenantId,
    pub name: String,
    pub max_freezes_per_year: i32,
}
