use crate::{
    db::models::{
        memberships::{FreezeInterval, Membership, MembershipStatus, Plan},
        policies::{BookingPolicy, TenantPolicy},
    },
    types::{PlanId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlanCreate {
    pub name: String,
    /// How many freezes a membership on this plan gets per calendar year
    pub max_freezes_per_year: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MembershipCreate {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = String, format = "uuid")]
    pub plan_id: PlanId,
    /// Defaults to now when absent
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_renew: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FreezeCreate {
    /// Defaults to now when absent
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MembershipCancel {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PolicyUpdate {
    /// Hours of notice a customer must give to get a cancellation refund
    pub cancel_notice_hours: i64,
    /// Whether a no-show refunds the booking credit
    pub refund_no_show: bool,
}

impl From<&PolicyUpdate> for BookingPolicy {
    fn from(update: &PolicyUpdate) -> Self {
        Self {
            cancel_notice_hours: update.cancel_notice_hours,
            refund_no_show: update.refund_no_show,
        }
    }
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlanResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub name: String,
    pub max_freezes_per_year: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MembershipResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = String, format = "uuid")]
    pub plan_id: PlanId,
    pub status: MembershipStatus,
    pub freezes_used_this_year: i32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub cancel_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FreezeIntervalResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub membership_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PolicyResponse {
    pub cancel_notice_hours: i64,
    pub refund_no_show: bool,
    /// Absent when the tenant runs on the process-wide defaults
    pub updated_at: Option<DateTime<Utc>>,
}

// Conversions
impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        Self {
            id: plan.id,
            name: plan.name,
            max_freezes_per_year: plan.max_freezes_per_year,
            created_at: plan.created_at,
        }
    }
}

impl From<Membership> for MembershipResponse {
    fn from(m: Membership) -> Self {
        Self {
            id: m.id,
            user_id: m.user_id,
            plan_id: m.plan_id,
            status: m.status,
            freezes_used_this_year: m.freezes_used_this_year,
            starts_at: m.starts_at,
            ends_at: m.ends_at,
            auto_renew: m.auto_renew,
            cancel_reason: m.cancel_reason,
        }
    }
}

impl From<FreezeInterval> for FreezeIntervalResponse {
    fn from(fi: FreezeInterval) -> Self {
        Self {
            id: fi.id,
            membership_id: fi.membership_id,
            starts_at: fi.starts_at,
            ends_at: fi.ends_at,
            reason: fi.reason,
        }
    }
}

impl From<TenantPolicy> for PolicyResponse {
    fn from(p: TenantPolicy) -> Self {
        Self {
            cancel_notice_hours: p.cancel_notice_hours,
            refund_no_show: p.refund_no_show,
            updated_at: Some(p.updated_at),
        }
    }
}

impl From<BookingPolicy> for PolicyResponse {
    fn from(p: BookingPolicy) -> Self {
        Self {
            cancel_notice_hours: p.cancel_notice_hours,
            refund_no_show: p.refund_no_show,
            updated_at: None,
        }
    }
}
