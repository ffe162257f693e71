use crate::{
    db::{handlers::Memberships, models::memberships::FreezeInterval},
    types::MembershipId,
};
use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, instrument};

/// Background reconciliation for freeze expiry. Every tick it scans for
/// freeze intervals whose end date has passed while the membership is still
/// FROZEN and flips them back to ACTIVE. The restore re-checks the status in
/// the same statement, so a membership cancelled between scan and restore is
/// left alone.
///
/// The scan is idempotent: a tick that finds nothing does nothing, and a
/// missed tick is simply caught up by the next one.
#[derive(Clone)]
pub struct ReconciliationScheduler {
    pool: PgPool,
    interval: Duration,
}

impl ReconciliationScheduler {
    pub fn new(pool: PgPool, interval: Duration) -> Self {
        Self { pool, interval }
    }

    /// Spawn the reconciliation loop. The first tick fires immediately so a
    /// restart catches up on anything that expired while the process was
    /// down. Dropping the returned guard stops the loop.
    pub fn spawn(self) -> DropGuard {
        let token = CancellationToken::new();
        let child = token.child_token();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = child.cancelled() => {
                        info!("reconciliation scheduler stopping");
                        return;
                    }
                    _ = interval.tick() => {}
                }
                if let Err(e) = self.run_once().await {
                    error!("reconciliation pass failed: {e:#}");
                }
            }
        });
        token.drop_guard()
    }

    /// One reconciliation pass. Failures on one membership are logged and do
    /// not stop the rest of the batch. Returns how many memberships were
    /// restored.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let mut conn = self.pool.acquire().await?;
        let due = Memberships::new(&mut conn).expired_freezes(now).await?;
        Ok(restore_due(&due, &mut DbRestore { conn: &mut *conn }).await)
    }
}

/// Seam for the per-item restore, so the batch loop can be exercised with an
/// injected failure.
trait RestoreFrozen {
    async fn restore(&mut self, membership_id: MembershipId) -> crate::errors::Result<bool>;
}

struct DbRestore<'c> {
    conn: &'c mut PgConnection,
}

impl RestoreFrozen for DbRestore<'_> {
    async fn restore(&mut self, membership_id: MembershipId) -> crate::errors::Result<bool> {
        Memberships::new(&mut *self.conn).restore_if_frozen(membership_id).await
    }
}

/// Walk the due intervals, restoring each membership in turn. A failed
/// restore is logged and skipped; the rest of the batch still runs.
async fn restore_due<R: RestoreFrozen>(due: &[FreezeInterval], restorer: &mut R) -> usize {
    let mut restored = 0;
    for interval in due {
        match restorer.restore(interval.membership_id).await {
            Ok(true) => {
                info!(
                    membership_id = %interval.membership_id,
                    ends_at = %interval.ends_at,
                    "freeze expired, membership restored"
                );
                restored += 1;
            }
            // Status changed since the scan; nothing to do.
            Ok(false) => {}
            Err(e) => {
                error!(membership_id = %interval.membership_id, "failed to restore membership: {e}");
            }
        }
    }
    restored
}

#[cfg(test)]
mod db_tests {
    use super::*;
    use crate::{
        db::{handlers::Memberships, models::memberships::MembershipStatus},
        test_utils::*,
    };
    use chrono::Duration as ChronoDuration;

    #[sqlx::test]
    #[test_log::test]
    async fn test_run_once_restores_expired_freezes(pool: PgPool) {
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let membership = create_test_membership(&mut conn, 2).await;

        // A freeze that ended yesterday.
        let now = Utc::now();
        Memberships::new(&mut conn)
            .freeze(membership.id, now - ChronoDuration::days(10), now - ChronoDuration::days(1), None, now)
            .await
            .expect("freeze");
        drop(conn);

        let scheduler = ReconciliationScheduler::new(pool.clone(), Duration::from_secs(600));
        let restored = scheduler.run_once().await.expect("pass");
        assert_eq!(restored, 1);

        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let m = Memberships::new(&mut conn).get(membership.id).await.expect("get").expect("exists");
        assert_eq!(m.status, MembershipStatus::Active);
        drop(conn);

        // Second pass finds nothing.
        let restored = scheduler.run_once().await.expect("pass");
        assert_eq!(restored, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_run_once_ignores_active_freezes(pool: PgPool) {
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let membership = create_test_membership(&mut conn, 2).await;

        let now = Utc::now();
        Memberships::new(&mut conn)
            .freeze(membership.id, now, now + ChronoDuration::days(10), None, now)
            .await
            .expect("freeze");
        drop(conn);

        let scheduler = ReconciliationScheduler::new(pool.clone(), Duration::from_secs(600));
        assert_eq!(scheduler.run_once().await.expect("pass"), 0);

        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let m = Memberships::new(&mut conn).get(membership.id).await.expect("get").expect("exists");
        assert_eq!(m.status, MembershipStatus::Frozen);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_one_failing_restore_does_not_stop_the_batch(pool: PgPool) {
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let now = Utc::now();

        let first = create_test_membership(&mut conn, 2).await;
        let poisoned = create_test_membership(&mut conn, 2).await;
        let last = create_test_membership(&mut conn, 2).await;
        for membership in [&first, &poisoned, &last] {
            Memberships::new(&mut conn)
                .freeze(membership.id, now - ChronoDuration::days(10), now - ChronoDuration::days(1), None, now)
                .await
                .expect("freeze");
        }

        let due = Memberships::new(&mut conn).expired_freezes(now).await.expect("scan");
        assert_eq!(due.len(), 3);

        struct FlakyRestore<'c> {
            conn: &'c mut sqlx::PgConnection,
            poison: crate::types::MembershipId,
        }
        impl RestoreFrozen for FlakyRestore<'_> {
            async fn restore(&mut self, membership_id: crate::types::MembershipId) -> crate::errors::Result<bool> {
                if membership_id == self.poison {
                    return Err(anyhow::anyhow!("simulated restore failure").into());
                }
                Memberships::new(&mut *self.conn).restore_if_frozen(membership_id).await
            }
        }

        let mut restorer = FlakyRestore {
            conn: &mut *conn,
            poison: poisoned.id,
        };
        let restored = restore_due(&due, &mut restorer).await;
        assert_eq!(restored, 2);

        for id in [first.id, last.id] {
            let m = Memberships::new(&mut conn).get(id).await.expect("get").expect("exists");
            assert_eq!(m.status, MembershipStatus::Active);
        }
        let m = Memberships::new(&mut conn).get(poisoned.id).await.expect("get").expect("exists");
        assert_eq!(m.status, MembershipStatus::Frozen, "the failed item waits for the next pass");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_run_once_skips_memberships_cancelled_meanwhile(pool: PgPool) {
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let membership = create_test_membership(&mut conn, 2).await;

        let now = Utc::now();
        Memberships::new(&mut conn)
            .freeze(membership.id, now - ChronoDuration::days(10), now - ChronoDuration::days(1), None, now)
            .await
            .expect("freeze");
        Memberships::new(&mut conn)
            .cancel(membership.id, None, now)
            .await
            .expect("cancel");
        drop(conn);

        let scheduler = ReconciliationScheduler::new(pool.clone(), Duration::from_secs(600));
        assert_eq!(scheduler.run_once().await.expect("pass"), 0);

        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let m = Memberships::new(&mut conn).get(membership.id).await.expect("get").expect("exists");
        assert_eq!(m.status, MembershipStatus::Cancelled, "cancellation wins over restore");
    }
}
