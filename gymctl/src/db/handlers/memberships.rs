use crate::{
    db::{
        errors::DbError,
        models::memberships::{
            FreezeInterval, Membership, MembershipCreateDBRequest, MembershipStatus, Plan, PlanCreateDBRequest,
        },
    },
    errors::{Error, Result},
    types::{MembershipId, PlanId},
};
use chrono::{DateTime, Datelike, Utc};
use sqlx::{Connection, PgConnection};
use tracing::trace;

const MEMBERSHIP_COLUMNS: &str = "id, tenant_id, user_id, plan_id, status, freezes_used_this_year, freeze_reset_year, \
                                  starts_at, ends_at, auto_renew, cancel_reason, created_at, updated_at";
const FREEZE_COLUMNS: &str = "id, tenant_id, membership_id, user_id, starts_at, ends_at, reason, created_at";
const PLAN_COLUMNS: &str = "id, tenant_id, name, max_freezes_per_year, created_at";

/// Lazy yearly reset of the freeze counter: the counter starts over the
/// first time a freeze is evaluated in a new calendar year. There is no
/// separate reset job.
pub(crate) fn roll_freeze_counter(used: i32, reset_year: i32, current_year: i32) -> i32 {
    if reset_year != current_year {
        0
    } else {
        used
    }
}

/// The membership freeze lifecycle: quota-checked freezes, manual unfreeze,
/// cancellation, and the conditional restore used by the reconciliation
/// scheduler.
pub struct Memberships<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Memberships<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn create_plan(&mut self, request: &PlanCreateDBRequest) -> Result<Plan> {
        let plan = sqlx::query_as::<_, Plan>(&format!(
            "INSERT INTO plans (tenant_id, name, max_freezes_per_year)
             VALUES ($1, $2, $3)
             RETURNING {PLAN_COLUMNS}"
        ))
        .bind(request.tenant_id)
        .bind(request.name.clone())
        .bind(request.max_freezes_per_year)
        .fetch_one(&mut *self.db)
        .await
        .map_err(DbError::from)?;
        Ok(plan)
    }

    pub async fn get_plan(&mut self, plan_id: PlanId) -> Result<Option<Plan>> {
        let plan = sqlx::query_as::<_, Plan>(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = $1"))
            .bind(plan_id)
            .fetch_optional(&mut *self.db)
            .await
            .map_err(DbError::from)?;
        Ok(plan)
    }

    pub async fn create(&mut self, request: &MembershipCreateDBRequest) -> Result<Membership> {
        let membership = sqlx::query_as::<_, Membership>(&format!(
            "INSERT INTO memberships (tenant_id, user_id, plan_id, starts_at, auto_renew, freeze_reset_year)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {MEMBERSHIP_COLUMNS}"
        ))
        .bind(request.tenant_id)
        .bind(request.user_id)
        .bind(request.plan_id)
        .bind(request.starts_at)
        .bind(request.auto_renew)
        .bind(request.starts_at.year())
        .fetch_one(&mut *self.db)
        .await
        .map_err(DbError::from)?;
        Ok(membership)
    }

    pub async fn get(&mut self, membership_id: MembershipId) -> Result<Option<Membership>> {
        let membership =
            sqlx::query_as::<_, Membership>(&format!("SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE id = $1"))
                .bind(membership_id)
                .fetch_optional(&mut *self.db)
                .await
                .map_err(DbError::from)?;
        Ok(membership)
    }

    /// Freeze an active membership for [starts_at, ends_at). Applies the
    /// lazy yearly counter reset, checks the plan quota, flips the status to
    /// FROZEN and records the FreezeInterval — all in one transaction.
    pub async fn freeze(
        &mut self,
        membership_id: MembershipId,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<FreezeInterval> {
        if ends_at <= starts_at {
            return Err(Error::InvalidRange);
        }

        let mut tx = self.db.begin().await.map_err(DbError::from)?;

        let membership = lock_membership(&mut *tx, membership_id).await?;
        if membership.status != MembershipStatus::Active {
            return Err(Error::NotActive {
                status: membership.status,
            });
        }

        let plan = sqlx::query_as::<_, Plan>(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = $1"))
            .bind(membership.plan_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(DbError::from)?;

        let current_year = now.year();
        let used = roll_freeze_counter(membership.freezes_used_this_year, membership.freeze_reset_year, current_year);
        if used >= plan.max_freezes_per_year {
            return Err(Error::FreezeQuotaExceeded {
                used,
                max: plan.max_freezes_per_year,
                year: current_year,
            });
        }

        sqlx::query(
            "UPDATE memberships
             SET status = 'FROZEN', freezes_used_this_year = $1, freeze_reset_year = $2, updated_at = NOW()
             WHERE id = $3",
        )
        .bind(used + 1)
        .bind(current_year)
        .bind(membership_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        let interval = sqlx::query_as::<_, FreezeInterval>(&format!(
            "INSERT INTO freeze_intervals (tenant_id, membership_id, user_id, starts_at, ends_at, reason)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {FREEZE_COLUMNS}"
        ))
        .bind(membership.tenant_id)
        .bind(membership_id)
        .bind(membership.user_id)
        .bind(starts_at)
        .bind(ends_at)
        .bind(reason)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(interval)
    }

    /// Manual early unfreeze. Restores ACTIVE but does not give the quota
    /// counter back: the freeze was consumed when it was granted.
    pub async fn unfreeze(&mut self, membership_id: MembershipId) -> Result<Membership> {
        let mut tx = self.db.begin().await.map_err(DbError::from)?;

        let membership = lock_membership(&mut *tx, membership_id).await?;
        if membership.status != MembershipStatus::Frozen {
            return Err(Error::NotFrozen {
                status: membership.status,
            });
        }

        let membership = sqlx::query_as::<_, Membership>(&format!(
            "UPDATE memberships SET status = 'ACTIVE', updated_at = NOW() WHERE id = $1
             RETURNING {MEMBERSHIP_COLUMNS}"
        ))
        .bind(membership_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(membership)
    }

    /// Cancel from any non-CANCELLED status. A second cancel fails with
    /// `AlreadyCancelled` rather than silently succeeding.
    pub async fn cancel(&mut self, membership_id: MembershipId, reason: Option<String>, now: DateTime<Utc>) -> Result<Membership> {
        let mut tx = self.db.begin().await.map_err(DbError::from)?;

        let membership = lock_membership(&mut *tx, membership_id).await?;
        if membership.status == MembershipStatus::Cancelled {
            return Err(Error::AlreadyCancelled);
        }

        let membership = sqlx::query_as::<_, Membership>(&format!(
            "UPDATE memberships
             SET status = 'CANCELLED', ends_at = $1, auto_renew = FALSE, cancel_reason = $2, updated_at = NOW()
             WHERE id = $3
             RETURNING {MEMBERSHIP_COLUMNS}"
        ))
        .bind(now)
        .bind(reason)
        .bind(membership_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(membership)
    }

    /// Freeze intervals whose end date has passed while the owning
    /// membership is still FROZEN. Scheduler input.
    pub async fn expired_freezes(&mut self, now: DateTime<Utc>) -> Result<Vec<FreezeInterval>> {
        let intervals = sqlx::query_as::<_, FreezeInterval>(
            "SELECT fi.id, fi.tenant_id, fi.membership_id, fi.user_id, fi.starts_at, fi.ends_at, fi.reason, fi.created_at
             FROM freeze_intervals fi
             JOIN memberships m ON m.id = fi.membership_id
             WHERE fi.ends_at <= $1 AND m.status = 'FROZEN'
             ORDER BY fi.ends_at ASC",
        )
        .bind(now)
        .fetch_all(&mut *self.db)
        .await
        .map_err(DbError::from)?;
        Ok(intervals)
    }

    /// Conditional restore used by the scheduler: flips FROZEN back to
    /// ACTIVE in a single statement that re-checks the current status, so a
    /// membership cancelled in the interim is skipped silently. Returns
    /// whether a row was actually restored.
    pub async fn restore_if_frozen(&mut self, membership_id: MembershipId) -> Result<bool> {
        let result = sqlx::query("UPDATE memberships SET status = 'ACTIVE', updated_at = NOW() WHERE id = $1 AND status = 'FROZEN'")
            .bind(membership_id)
            .execute(&mut *self.db)
            .await
            .map_err(DbError::from)?;
        let restored = result.rows_affected() == 1;
        if restored {
            trace!("restored membership {membership_id} to ACTIVE");
        }
        Ok(restored)
    }
}

/// Row-lock a membership for the duration of the enclosing transaction.
async fn lock_membership(tx: &mut PgConnection, membership_id: MembershipId) -> Result<Membership> {
    sqlx::query_as::<_, Membership>(&format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE id = $1 FOR UPDATE"
    ))
    .bind(membership_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(DbError::from)?
    .ok_or_else(|| Error::NotFound {
        resource: "Membership".to_string(),
        id: membership_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_rolls_over_on_year_change() {
        assert_eq!(roll_freeze_counter(3, 2025, 2026), 0);
        assert_eq!(roll_freeze_counter(3, 2026, 2026), 3);
        assert_eq!(roll_freeze_counter(0, 2026, 2026), 0);
    }
}
