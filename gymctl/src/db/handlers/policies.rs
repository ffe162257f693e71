use crate::{
    db::{
        errors::DbError,
        models::policies::{BookingPolicy, TenantPolicy},
    },
    errors::Result,
    types::TenantId,
};
use sqlx::PgConnection;

const POLICY_COLUMNS: &str = "tenant_id, cancel_notice_hours, refund_no_show, updated_at";

/// Per-tenant booking policy overrides.
pub struct Policies<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Policies<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn get(&mut self, tenant_id: TenantId) -> Result<Option<TenantPolicy>> {
        let policy =
            sqlx::query_as::<_, TenantPolicy>(&format!("SELECT {POLICY_COLUMNS} FROM tenant_policies WHERE tenant_id = $1"))
                .bind(tenant_id)
                .fetch_optional(&mut *self.db)
                .await
                .map_err(DbError::from)?;
        Ok(policy)
    }

    /// The policy that applies to a tenant right now: its stored overrides,
    /// or the process-wide defaults when it has none.
    pub async fn effective(&mut self, tenant_id: TenantId, defaults: BookingPolicy) -> Result<BookingPolicy> {
        Ok(self.get(tenant_id).await?.map(|p| p.booking()).unwrap_or(defaults))
    }

    pub async fn upsert(&mut self, tenant_id: TenantId, policy: BookingPolicy) -> Result<TenantPolicy> {
        let policy = sqlx::query_as::<_, TenantPolicy>(&format!(
            "INSERT INTO tenant_policies (tenant_id, cancel_notice_hours, refund_no_show)
             VALUES ($1, $2, $3)
             ON CONFLICT (tenant_id) DO UPDATE
             SET cancel_notice_hours = EXCLUDED.cancel_notice_hours,
                 refund_no_show = EXCLUDED.refund_no_show,
                 updated_at = NOW()
             RETURNING {POLICY_COLUMNS}"
        ))
        .bind(tenant_id)
        .bind(policy.cancel_notice_hours)
        .bind(policy.refund_no_show)
        .fetch_one(&mut *self.db)
        .await
        .map_err(DbError::from)?;
        Ok(policy)
    }
}
