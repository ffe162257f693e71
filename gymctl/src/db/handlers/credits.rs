use crate::{
    db::{
        errors::DbError,
        models::credits::{CreditBatch, CreditGrantDBRequest, RefundOutcome},
    },
    errors::{Error, Result},
    types::{BatchId, TenantId, UserId},
};
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};
use tracing::trace;

const BATCH_COLUMNS: &str =
    "id, tenant_id, user_id, order_id, total_credits, consumed, purchased_at, expires_at, note, created_at";

/// Sum of remaining credits over all non-expired batches. Negative
/// adjustment batches subtract from the sum; an expired batch contributes
/// nothing even if it still has remaining balance.
pub(crate) fn available_total(batches: &[CreditBatch], now: DateTime<Utc>) -> i64 {
    batches.iter().filter(|b| !b.expired(now)).map(|b| b.remaining()).sum()
}

/// Allocate `count` credits oldest-batch-first (FIFO by purchase time) over
/// the given snapshot, which must be sorted ascending by `purchased_at`.
/// Returns the per-batch consumption plan, or the available total when the
/// full amount cannot be covered.
pub(crate) fn plan_consume(
    batches: &[CreditBatch],
    count: i64,
    now: DateTime<Utc>,
) -> std::result::Result<Vec<(BatchId, i64)>, i64> {
    let available = available_total(batches, now);
    if count > available {
        return Err(available);
    }

    let mut needed = count;
    let mut plan = Vec::new();
    for batch in batches.iter().filter(|b| !b.expired(now)) {
        if needed == 0 {
            break;
        }
        let take = batch.remaining().min(needed);
        if take <= 0 {
            continue;
        }
        plan.push((batch.id, take));
        needed -= take;
    }

    // count <= available implies the positive remainders cover it
    debug_assert_eq!(needed, 0);
    Ok(plan)
}

/// Allocate a refund newest-batch-first (LIFO by purchase time) over batches
/// that currently have consumed balance. The snapshot must be sorted
/// ascending by `purchased_at`; it is walked in reverse. May satisfy less
/// than `count`; an empty plan means there is nothing to refund.
pub(crate) fn plan_refund(batches: &[CreditBatch], count: i64) -> Vec<(BatchId, i64)> {
    let mut remaining = count;
    let mut plan = Vec::new();
    for batch in batches.iter().rev() {
        if remaining == 0 {
            break;
        }
        let give_back = batch.consumed.min(remaining);
        if give_back <= 0 {
            continue;
        }
        plan.push((batch.id, give_back));
        remaining -= give_back;
    }
    plan
}

/// Transaction-scoped advisory lock key derived from the owning user, so two
/// concurrent ledger mutations for the same user serialize at the store even
/// across server instances. First 8 bytes of the UUID, as elsewhere.
fn user_lock_key(user_id: UserId) -> i64 {
    let b = user_id.as_bytes();
    i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

async fn lock_user(tx: &mut PgConnection, user_id: UserId) -> Result<()> {
    sqlx::query_scalar::<_, i32>("SELECT 1 FROM (SELECT pg_advisory_xact_lock($1)) AS _")
        .bind(user_lock_key(user_id))
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::from)?;
    trace!("acquired ledger lock for user {user_id}");
    Ok(())
}

/// Locked snapshot of a user's ledger, ordered for FIFO/LIFO allocation.
/// Must run inside the same transaction as the writes so batch order cannot
/// change between read and write.
async fn batches_for_update(tx: &mut PgConnection, tenant_id: TenantId, user_id: UserId) -> Result<Vec<CreditBatch>> {
    let batches = sqlx::query_as::<_, CreditBatch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM credit_batches
         WHERE tenant_id = $1 AND user_id = $2
         ORDER BY purchased_at ASC, id ASC
         FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(user_id)
    .fetch_all(&mut *tx)
    .await
    .map_err(DbError::from)?;
    Ok(batches)
}

/// The PT credit ledger engine. All operations are scoped to a
/// (tenant, user) pair; every mutation runs in one store transaction behind
/// a per-user advisory lock, so no partial allocation can ever persist.
pub struct Credits<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Credits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Create a new credit batch. Zero-credit grants are rejected outright;
    /// a negative total (administrative deduction) is checked against the
    /// current available balance inside the same transaction so a deduction
    /// can never drive the account negative.
    pub async fn grant(&mut self, request: &CreditGrantDBRequest) -> Result<CreditBatch> {
        if request.total_credits == 0 {
            return Err(Error::BadRequest {
                message: "credit grant must be non-zero".to_string(),
            });
        }

        let mut tx = self.db.begin().await.map_err(DbError::from)?;
        lock_user(&mut *tx, request.user_id).await?;

        if request.total_credits < 0 {
            let batches = batches_for_update(&mut *tx, request.tenant_id, request.user_id).await?;
            let available = available_total(&batches, Utc::now());
            if available + request.total_credits < 0 {
                return Err(Error::InsufficientCredits {
                    available,
                    requested: -request.total_credits,
                });
            }
        }

        let batch = sqlx::query_as::<_, CreditBatch>(&format!(
            "INSERT INTO credit_batches (tenant_id, user_id, order_id, total_credits, purchased_at, expires_at, note)
             VALUES ($1, $2, $3, $4, COALESCE($5, NOW()), $6, $7)
             RETURNING {BATCH_COLUMNS}"
        ))
        .bind(request.tenant_id)
        .bind(request.user_id)
        .bind(request.order_id)
        .bind(request.total_credits)
        .bind(request.purchased_at)
        .bind(request.expires_at)
        .bind(request.note.clone())
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(batch)
    }

    /// Current available balance. Read-only, no locking.
    pub async fn available(&mut self, tenant_id: TenantId, user_id: UserId, now: DateTime<Utc>) -> Result<i64> {
        let batches = self.list_batches(tenant_id, user_id).await?;
        Ok(available_total(&batches, now))
    }

    /// Consume `count` credits FIFO. Fails with `InsufficientCredits` when
    /// the full amount cannot be allocated; the transaction rolls back and
    /// no partial mutation is visible to subsequent reads.
    pub async fn consume(&mut self, tenant_id: TenantId, user_id: UserId, count: i64, now: DateTime<Utc>) -> Result<()> {
        if count <= 0 {
            return Err(Error::BadRequest {
                message: "consume count must be positive".to_string(),
            });
        }

        let mut tx = self.db.begin().await.map_err(DbError::from)?;
        lock_user(&mut *tx, user_id).await?;

        let batches = batches_for_update(&mut *tx, tenant_id, user_id).await?;
        let plan = plan_consume(&batches, count, now).map_err(|available| Error::InsufficientCredits {
            available,
            requested: count,
        })?;

        for (batch_id, take) in &plan {
            sqlx::query("UPDATE credit_batches SET consumed = consumed + $1 WHERE id = $2")
                .bind(take)
                .bind(batch_id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::from)?;
        }

        tx.commit().await.map_err(DbError::from)?;
        trace!("consumed {count} credits across {} batches for user {user_id}", plan.len());
        Ok(())
    }

    /// Refund up to `count` credits LIFO, decrementing `consumed` on the
    /// most recently purchased batches first. When no consumed balance
    /// exists anywhere this is a no-op reported through the outcome, not an
    /// error (refunds after history was reset must be tolerated).
    pub async fn refund(&mut self, tenant_id: TenantId, user_id: UserId, count: i64) -> Result<RefundOutcome> {
        if count <= 0 {
            return Err(Error::BadRequest {
                message: "refund count must be positive".to_string(),
            });
        }

        let mut tx = self.db.begin().await.map_err(DbError::from)?;
        lock_user(&mut *tx, user_id).await?;

        let batches = batches_for_update(&mut *tx, tenant_id, user_id).await?;
        let plan = plan_refund(&batches, count);

        let mut restored = 0;
        for (batch_id, give_back) in &plan {
            sqlx::query("UPDATE credit_batches SET consumed = consumed - $1 WHERE id = $2")
                .bind(give_back)
                .bind(batch_id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::from)?;
            restored += give_back;
        }

        tx.commit().await.map_err(DbError::from)?;
        Ok(RefundOutcome {
            requested: count,
            restored,
        })
    }

    /// Audit view of a user's ledger, oldest purchase first.
    pub async fn list_batches(&mut self, tenant_id: TenantId, user_id: UserId) -> Result<Vec<CreditBatch>> {
        let batches = sqlx::query_as::<_, CreditBatch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM credit_batches
             WHERE tenant_id = $1 AND user_id = $2
             ORDER BY purchased_at ASC, id ASC"
        ))
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await
        .map_err(DbError::from)?;
        Ok(batches)
    }
}


#[cfg(test)]
mod db_tests {
    use super::*;
    use crate::test_utils::*;
    use sqlx::PgPool;
    use std::sync::Arc;
    use uuid::Uuid;

    #[sqlx::test]
    #[test_log::test]
    async fn test_grant_and_available(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let mut credits = Credits::new(&mut conn);

        credits
            .grant(&grant_request(tenant_id, user_id, 5))
            .await
            .expect("Failed to grant");

        let available = credits.available(tenant_id, user_id, Utc::now()).await.expect("available");
        assert_eq!(available, 5);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_grant_rejects_zero(pool: PgPool) {
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let mut credits = Credits::new(&mut conn);

        let result = credits.grant(&grant_request(Uuid::new_v4(), Uuid::new_v4(), 0)).await;
        assert!(matches!(result, Err(Error::BadRequest { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_negative_grant_cannot_drive_balance_negative(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let mut credits = Credits::new(&mut conn);

        credits.grant(&grant_request(tenant_id, user_id, 3)).await.expect("grant");

        let result = credits.grant(&grant_request(tenant_id, user_id, -5)).await;
        assert!(matches!(result, Err(Error::InsufficientCredits { available: 3, requested: 5 })));

        // A deduction within the balance is fine.
        credits.grant(&grant_request(tenant_id, user_id, -2)).await.expect("deduction");
        let available = credits.available(tenant_id, user_id, Utc::now()).await.expect("available");
        assert_eq!(available, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_consume_fifo_across_batches(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let mut credits = Credits::new(&mut conn);

        let mut old = grant_request(tenant_id, user_id, 3);
        old.purchased_at = Some(Utc::now() - chrono::Duration::days(10));
        let old = credits.grant(&old).await.expect("grant old");
        let new = credits.grant(&grant_request(tenant_id, user_id, 4)).await.expect("grant new");

        credits.consume(tenant_id, user_id, 4, Utc::now()).await.expect("consume");

        let batches = credits.list_batches(tenant_id, user_id).await.expect("list");
        let old_row = batches.iter().find(|b| b.id == old.id).unwrap();
        let new_row = batches.iter().find(|b| b.id == new.id).unwrap();
        assert_eq!(old_row.consumed, 3, "oldest batch drained first");
        assert_eq!(new_row.consumed, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_failed_consume_leaves_no_partial_mutation(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let mut credits = Credits::new(&mut conn);

        credits.grant(&grant_request(tenant_id, user_id, 2)).await.expect("grant");

        let result = credits.consume(tenant_id, user_id, 3, Utc::now()).await;
        assert!(matches!(result, Err(Error::InsufficientCredits { available: 2, requested: 3 })));

        let batches = credits.list_batches(tenant_id, user_id).await.expect("list");
        assert!(batches.iter().all(|b| b.consumed == 0), "rollback must be total");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_refund_lifo_and_nothing_to_refund(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let mut credits = Credits::new(&mut conn);

        // Nothing consumed yet: refund is a tolerated no-op.
        credits.grant(&grant_request(tenant_id, user_id, 2)).await.expect("grant");
        let outcome = credits.refund(tenant_id, user_id, 1).await.expect("refund");
        assert!(outcome.nothing_to_refund());

        let mut old = grant_request(tenant_id, user_id, 3);
        old.purchased_at = Some(Utc::now() - chrono::Duration::days(10));
        let old = credits.grant(&old).await.expect("grant old");

        credits.consume(tenant_id, user_id, 4, Utc::now()).await.expect("consume");
        // FIFO: old has consumed=3, new has consumed=1. LIFO refund of 2
        // empties the newer batch and gives 1 back to the older.
        let outcome = credits.refund(tenant_id, user_id, 2).await.expect("refund");
        assert_eq!(outcome.restored, 2);

        let batches = credits.list_batches(tenant_id, user_id).await.expect("list");
        let old_row = batches.iter().find(|b| b.id == old.id).unwrap();
        assert_eq!(old_row.consumed, 2);
        assert_eq!(batches.iter().map(|b| b.consumed).sum::<i64>(), 2);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_expired_balance_is_forfeited(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let mut credits = Credits::new(&mut conn);

        let mut expired = grant_request(tenant_id, user_id, 5);
        expired.expires_at = Some(Utc::now() - chrono::Duration::days(1));
        credits.grant(&expired).await.expect("grant");

        let available = credits.available(tenant_id, user_id, Utc::now()).await.expect("available");
        assert_eq!(available, 0);

        let result = credits.consume(tenant_id, user_id, 1, Utc::now()).await;
        assert!(matches!(result, Err(Error::InsufficientCredits { available: 0, requested: 1 })));
    }

    /// Two concurrent consumes against a balance of 1 must yield exactly one
    /// success and one InsufficientCredits, never two successes. The
    /// per-user advisory lock serializes them at the store.
    #[sqlx::test]
    #[test_log::test]
    async fn test_concurrent_consume_single_winner(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        {
            let mut conn = pool.acquire().await.expect("Failed to acquire connection");
            let mut credits = Credits::new(&mut conn);
            credits.grant(&grant_request(tenant_id, user_id, 1)).await.expect("grant");
        }

        let pool = Arc::new(pool);
        let mut handles = vec![];
        for _ in 0..2 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let mut conn = pool.acquire().await.expect("Failed to acquire connection");
                let mut credits = Credits::new(&mut conn);
                credits.consume(tenant_id, user_id, 1, Utc::now()).await
            }));
        }

        let mut successes = 0;
        let mut shortfalls = 0;
        for handle in handles {
            match handle.await.expect("task panicked") {
                Ok(()) => successes += 1,
                Err(Error::InsufficientCredits { .. }) => shortfalls += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((successes, shortfalls), (1, 1));

        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let mut credits = Credits::new(&mut conn);
        let available = credits.available(tenant_id, user_id, Utc::now()).await.expect("available");
        assert_eq!(available, 0);
    }
}
