use crate::types::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The effective booking policy applied to a session lifecycle decision:
/// either a tenant's stored overrides or the process-wide defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingPolicy {
    #[serde(default = "default_cancel_notice_hours")]
    pub cancel_notice_hours: i64,
    #[serde(default)]
    pub refund_no_show: bool,
}

fn default_cancel_notice_hours() -> i64 {
    24
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            cancel_notice_hours: default_cancel_notice_hours(),
            refund_no_show: false,
        }
    }
}

/// Tenant-configurable booking policy row. A missing row means the tenant
/// runs on the process-wide defaults from the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TenantPolicy {
    pub tenant_id: TenantId,
    /// A customer-initiated cancellation refunds the credit only when made
    /// at least this many hours before the session start.
    pub cancel_notice_hours: i64,
    /// Whether a NO_SHOW refunds the credit (customer-caused absence, so the
    /// default is no).
    pub refund_no_show: bool,
    pub updated_at: DateTime<Utc>,
}

impl TenantPolicy {
    pub fn booking(&self) -> BookingPolicy {
        BookingPolicy {
            cancel_notice_hours: self.cancel_notice_hours,
            refund_no_show: self.refund_no_show,
        }
    }
}
