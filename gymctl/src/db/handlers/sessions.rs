use crate::{
    db::{
        errors::DbError,
        handlers::Credits,
        models::{
            policies::BookingPolicy,
            sessions::{CancellationOutcome, PtSession, SessionBookDBRequest, SessionStatus},
        },
    },
    errors::{Error, Result},
    types::SessionId,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Connection, PgConnection};
use tracing::debug;

const SESSION_COLUMNS: &str =
    "id, tenant_id, trainer_id, customer_id, starts_at, ends_at, status, cancelled_by, note, created_at, updated_at";

/// Decide what a cancellation does to the booking credit. Staff
/// cancellations always refund; a customer refund requires the cancellation
/// to land at least `notice_hours` before the session starts. The comparison
/// is on the full duration, not truncated hours, so 23h59m notice against a
/// 24h policy is still late.
pub(crate) fn cancellation_refund(by_staff: bool, until_start: Duration, notice_hours: i64) -> CancellationOutcome {
    if by_staff || until_start >= Duration::hours(notice_hours) {
        CancellationOutcome {
            refunded: true,
            required_notice_hours: None,
        }
    } else {
        CancellationOutcome {
            refunded: false,
            required_notice_hours: Some(notice_hours),
        }
    }
}

/// The PT session lifecycle: booking (which spends a credit), trainer
/// approval, completion, cancellation and no-show marking. Every transition
/// that touches the ledger runs in one transaction with the session row
/// locked, so a refund can never be issued twice for the same session.
pub struct Sessions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Sessions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Book a session, consuming exactly one credit in the same transaction
    /// as the insert. A failed consume rolls the whole booking back.
    pub async fn book(&mut self, request: &SessionBookDBRequest) -> Result<PtSession> {
        if request.ends_at <= request.starts_at {
            return Err(Error::BadRequest {
                message: "session end must be after its start".to_string(),
            });
        }

        let mut tx = self.db.begin().await.map_err(DbError::from)?;

        Credits::new(&mut *tx)
            .consume(request.tenant_id, request.customer_id, 1, Utc::now())
            .await?;

        let status = if request.requires_approval {
            SessionStatus::PendingApproval
        } else {
            SessionStatus::Scheduled
        };
        let session = sqlx::query_as::<_, PtSession>(&format!(
            "INSERT INTO pt_sessions (tenant_id, trainer_id, customer_id, starts_at, ends_at, status, note)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(request.tenant_id)
        .bind(request.trainer_id)
        .bind(request.customer_id)
        .bind(request.starts_at)
        .bind(request.ends_at)
        .bind(status)
        .bind(request.note.clone())
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        debug!("booked session {} for customer {}", session.id, session.customer_id);
        Ok(session)
    }

    pub async fn get(&mut self, session_id: SessionId) -> Result<Option<PtSession>> {
        let session = sqlx::query_as::<_, PtSession>(&format!("SELECT {SESSION_COLUMNS} FROM pt_sessions WHERE id = $1"))
            .bind(session_id)
            .fetch_optional(&mut *self.db)
            .await
            .map_err(DbError::from)?;
        Ok(session)
    }

    /// PENDING_APPROVAL -> SCHEDULED. The credit stays spent.
    pub async fn approve(&mut self, session_id: SessionId) -> Result<PtSession> {
        let mut tx = self.db.begin().await.map_err(DbError::from)?;

        let session = lock_session(&mut *tx, session_id).await?;
        require_status(&session, SessionStatus::PendingApproval, "approve")?;

        let session = set_status(&mut *tx, session_id, SessionStatus::Scheduled, None).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(session)
    }

    /// PENDING_APPROVAL -> REJECTED. The booking credit goes back: the
    /// customer never got a session out of it.
    pub async fn reject(&mut self, session_id: SessionId) -> Result<PtSession> {
        let mut tx = self.db.begin().await.map_err(DbError::from)?;

        let session = lock_session(&mut *tx, session_id).await?;
        require_status(&session, SessionStatus::PendingApproval, "reject")?;

        Credits::new(&mut *tx)
            .refund(session.tenant_id, session.customer_id, 1)
            .await?;
        let session = set_status(&mut *tx, session_id, SessionStatus::Rejected, None).await?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(session)
    }

    /// SCHEDULED -> COMPLETED. No ledger movement.
    pub async fn complete(&mut self, session_id: SessionId) -> Result<PtSession> {
        let mut tx = self.db.begin().await.map_err(DbError::from)?;

        let session = lock_session(&mut *tx, session_id).await?;
        require_status(&session, SessionStatus::Scheduled, "complete")?;

        let session = set_status(&mut *tx, session_id, SessionStatus::Completed, None).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(session)
    }

    /// Cancel a scheduled session, refunding per `cancellation_refund` under
    /// the tenant's policy. A pending session is not cancellable; it leaves
    /// the pending state through `reject`.
    pub async fn cancel(
        &mut self,
        session_id: SessionId,
        cancelled_by: crate::types::UserId,
        by_staff: bool,
        policy: &BookingPolicy,
        now: DateTime<Utc>,
    ) -> Result<(PtSession, CancellationOutcome)> {
        let mut tx = self.db.begin().await.map_err(DbError::from)?;

        let session = lock_session(&mut *tx, session_id).await?;
        require_status(&session, SessionStatus::Scheduled, "cancel")?;
        let outcome = cancellation_refund(by_staff, session.starts_at - now, policy.cancel_notice_hours);

        if outcome.refunded {
            Credits::new(&mut *tx)
                .refund(session.tenant_id, session.customer_id, 1)
                .await?;
        }
        let session = set_status(&mut *tx, session_id, SessionStatus::Cancelled, Some(cancelled_by)).await?;

        tx.commit().await.map_err(DbError::from)?;
        debug!("cancelled session {session_id}, refunded: {}", outcome.refunded);
        Ok((session, outcome))
    }

    /// SCHEDULED -> NO_SHOW. Whether the credit comes back is a tenant
    /// policy decision; the default keeps it spent.
    pub async fn no_show(&mut self, session_id: SessionId, policy: &BookingPolicy) -> Result<(PtSession, bool)> {
        let mut tx = self.db.begin().await.map_err(DbError::from)?;

        let session = lock_session(&mut *tx, session_id).await?;
        require_status(&session, SessionStatus::Scheduled, "mark as no-show")?;

        if policy.refund_no_show {
            Credits::new(&mut *tx)
                .refund(session.tenant_id, session.customer_id, 1)
                .await?;
        }
        let session = set_status(&mut *tx, session_id, SessionStatus::NoShow, None).await?;

        tx.commit().await.map_err(DbError::from)?;
        Ok((session, policy.refund_no_show))
    }

    /// Sessions for one customer, upcoming first.
    pub async fn list_for_customer(
        &mut self,
        tenant_id: crate::types::TenantId,
        customer_id: crate::types::UserId,
    ) -> Result<Vec<PtSession>> {
        let sessions = sqlx::query_as::<_, PtSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM pt_sessions
             WHERE tenant_id = $1 AND customer_id = $2
             ORDER BY starts_at DESC"
        ))
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_all(&mut *self.db)
        .await
        .map_err(DbError::from)?;
        Ok(sessions)
    }
}

async fn lock_session(tx: &mut PgConnection, session_id: SessionId) -> Result<PtSession> {
    sqlx::query_as::<_, PtSession>(&format!("SELECT {SESSION_COLUMNS} FROM pt_sessions WHERE id = $1 FOR UPDATE"))
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| Error::NotFound {
            resource: "Session".to_string(),
            id: session_id.to_string(),
        })
}

fn require_status(session: &PtSession, expected: SessionStatus, action: &'static str) -> Result<()> {
    if session.status == expected {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: session.status,
            action,
        })
    }
}

async fn set_status(
    tx: &mut PgConnection,
    session_id: SessionId,
    status: SessionStatus,
    cancelled_by: Option<crate::types::UserId>,
) -> Result<PtSession> {
    let session = sqlx::query_as::<_, PtSession>(&format!(
        "UPDATE pt_sessions SET status = $1, cancelled_by = COALESCE($2, cancelled_by), updated_at = NOW()
         WHERE id = $3
         RETURNING {SESSION_COLUMNS}"
    ))
    .bind(status)
    .bind(cancelled_by)
    .bind(session_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(DbError::from)?;
    Ok(session)
}


#[cfg(test)]
mod db_tests {
    use super::*;
    use crate::test_utils::*;
    use sqlx::PgPool;
    use uuid::Uuid;

    #[sqlx::test]
    #[test_log::test]
    async fn test_book_consumes_one_credit(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");

        Credits::new(&mut conn)
            .grant(&grant_request(tenant_id, customer_id, 5))
            .await
            .expect("grant");

        let session = Sessions::new(&mut conn)
            .book(&book_request(tenant_id, customer_id, Duration::hours(48)))
            .await
            .expect("book");
        assert_eq!(session.status, SessionStatus::Scheduled);

        let available = Credits::new(&mut conn)
            .available(tenant_id, customer_id, Utc::now())
            .await
            .expect("available");
        assert_eq!(available, 4);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_book_without_credits_creates_nothing(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");

        let result = Sessions::new(&mut conn)
            .book(&book_request(tenant_id, customer_id, Duration::hours(48)))
            .await;
        assert!(matches!(result, Err(Error::InsufficientCredits { available: 0, requested: 1 })));

        let sessions = Sessions::new(&mut conn)
            .list_for_customer(tenant_id, customer_id)
            .await
            .expect("list");
        assert!(sessions.is_empty(), "failed booking must not leave a session row");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_book_rejects_inverted_range(pool: PgPool) {
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");
        let mut request = book_request(Uuid::new_v4(), Uuid::new_v4(), Duration::hours(48));
        request.ends_at = request.starts_at;

        let result = Sessions::new(&mut conn).book(&request).await;
        assert!(matches!(result, Err(Error::BadRequest { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_approval_flow(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");

        Credits::new(&mut conn)
            .grant(&grant_request(tenant_id, customer_id, 2))
            .await
            .expect("grant");

        let mut request = book_request(tenant_id, customer_id, Duration::hours(48));
        request.requires_approval = true;
        let session = Sessions::new(&mut conn).book(&request).await.expect("book");
        assert_eq!(session.status, SessionStatus::PendingApproval);

        // Completing an unapproved session is an illegal transition.
        let result = Sessions::new(&mut conn).complete(session.id).await;
        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                from: SessionStatus::PendingApproval,
                ..
            })
        ));

        let approved = Sessions::new(&mut conn).approve(session.id).await.expect("approve");
        assert_eq!(approved.status, SessionStatus::Scheduled);

        // Approve is not repeatable.
        let result = Sessions::new(&mut conn).approve(session.id).await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));

        let completed = Sessions::new(&mut conn).complete(session.id).await.expect("complete");
        assert_eq!(completed.status, SessionStatus::Completed);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reject_refunds_the_credit(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");

        Credits::new(&mut conn)
            .grant(&grant_request(tenant_id, customer_id, 1))
            .await
            .expect("grant");

        let mut request = book_request(tenant_id, customer_id, Duration::hours(48));
        request.requires_approval = true;
        let session = Sessions::new(&mut conn).book(&request).await.expect("book");

        let rejected = Sessions::new(&mut conn).reject(session.id).await.expect("reject");
        assert_eq!(rejected.status, SessionStatus::Rejected);

        let available = Credits::new(&mut conn)
            .available(tenant_id, customer_id, Utc::now())
            .await
            .expect("available");
        assert_eq!(available, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_pending_sessions_cannot_be_cancelled(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");

        Credits::new(&mut conn)
            .grant(&grant_request(tenant_id, customer_id, 1))
            .await
            .expect("grant");

        let mut request = book_request(tenant_id, customer_id, Duration::hours(48));
        request.requires_approval = true;
        let session = Sessions::new(&mut conn).book(&request).await.expect("book");

        let result = Sessions::new(&mut conn)
            .cancel(session.id, customer_id, false, &BookingPolicy::default(), Utc::now())
            .await;
        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                from: SessionStatus::PendingApproval,
                ..
            })
        ));

        // The credit stays spent until the session is rejected.
        let available = Credits::new(&mut conn)
            .available(tenant_id, customer_id, Utc::now())
            .await
            .expect("available");
        assert_eq!(available, 0);

        Sessions::new(&mut conn).reject(session.id).await.expect("reject");
        let available = Credits::new(&mut conn)
            .available(tenant_id, customer_id, Utc::now())
            .await
            .expect("available");
        assert_eq!(available, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_customer_cancel_with_notice_refunds(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");

        Credits::new(&mut conn)
            .grant(&grant_request(tenant_id, customer_id, 5))
            .await
            .expect("grant");

        let session = Sessions::new(&mut conn)
            .book(&book_request(tenant_id, customer_id, Duration::hours(48)))
            .await
            .expect("book");

        let policy = BookingPolicy::default();
        let (cancelled, outcome) = Sessions::new(&mut conn)
            .cancel(session.id, customer_id, false, &policy, Utc::now())
            .await
            .expect("cancel");
        assert_eq!(cancelled.status, SessionStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by, Some(customer_id));
        assert!(outcome.refunded);

        let available = Credits::new(&mut conn)
            .available(tenant_id, customer_id, Utc::now())
            .await
            .expect("available");
        assert_eq!(available, 5);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_customer_late_cancel_forfeits_the_credit(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");

        Credits::new(&mut conn)
            .grant(&grant_request(tenant_id, customer_id, 5))
            .await
            .expect("grant");

        // Session in two hours, 24h notice policy.
        let session = Sessions::new(&mut conn)
            .book(&book_request(tenant_id, customer_id, Duration::hours(2)))
            .await
            .expect("book");

        let policy = BookingPolicy::default();
        let (_, outcome) = Sessions::new(&mut conn)
            .cancel(session.id, customer_id, false, &policy, Utc::now())
            .await
            .expect("cancel");
        assert!(!outcome.refunded);
        assert_eq!(outcome.required_notice_hours, Some(24));

        let available = Credits::new(&mut conn)
            .available(tenant_id, customer_id, Utc::now())
            .await
            .expect("available");
        assert_eq!(available, 4);

        // Terminal: a second cancel fails and cannot refund anything.
        let result = Sessions::new(&mut conn)
            .cancel(session.id, customer_id, true, &policy, Utc::now())
            .await;
        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                from: SessionStatus::Cancelled,
                ..
            })
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_staff_cancel_inside_window_still_refunds(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let trainer_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");

        Credits::new(&mut conn)
            .grant(&grant_request(tenant_id, customer_id, 1))
            .await
            .expect("grant");

        let session = Sessions::new(&mut conn)
            .book(&book_request(tenant_id, customer_id, Duration::hours(1)))
            .await
            .expect("book");

        let (cancelled, outcome) = Sessions::new(&mut conn)
            .cancel(session.id, trainer_id, true, &BookingPolicy::default(), Utc::now())
            .await
            .expect("cancel");
        assert!(outcome.refunded);
        assert_eq!(cancelled.cancelled_by, Some(trainer_id));

        let available = Credits::new(&mut conn)
            .available(tenant_id, customer_id, Utc::now())
            .await
            .expect("available");
        assert_eq!(available, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_no_show_refund_follows_policy(pool: PgPool) {
        let tenant_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.expect("Failed to acquire connection");

        Credits::new(&mut conn)
            .grant(&grant_request(tenant_id, customer_id, 2))
            .await
            .expect("grant");

        let first = Sessions::new(&mut conn)
            .book(&book_request(tenant_id, customer_id, Duration::hours(48)))
            .await
            .expect("book");
        let second = Sessions::new(&mut conn)
            .book(&book_request(tenant_id, customer_id, Duration::hours(72)))
            .await
            .expect("book");

        let keep = BookingPolicy::default();
        let (marked, refunded) = Sessions::new(&mut conn).no_show(first.id, &keep).await.expect("no-show");
        assert_eq!(marked.status, SessionStatus::NoShow);
        assert!(!refunded);

        let lenient = BookingPolicy {
            refund_no_show: true,
            ..BookingPolicy::default()
        };
        let (_, refunded) = Sessions::new(&mut conn).no_show(second.id, &lenient).await.expect("no-show");
        assert!(refunded);

        let available = Credits::new(&mut conn)
            .available(tenant_id, customer_id, Utc::now())
            .await
            .expect("available");
        assert_eq!(available, 1);
    }
}
