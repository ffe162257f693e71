use crate::{
    api::models::sessions::{SessionBook, SessionCancelResponse, SessionNoShowResponse, SessionResponse},
    auth::{
        permissions::{self, operation, resource, RequiresPermission},
        CurrentActor,
    },
    db::{
        handlers::{Policies, Sessions},
        models::sessions::{PtSession, SessionBookDBRequest},
    },
    errors::{Error, Result},
    notifications::SessionEventKind,
    types::{Operation, Resource, SessionId, UserId},
    AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use sqlx::PgConnection;

/// Book a PT session
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    summary = "Book a session",
    description = "Book a PT session, spending one credit. The credit and the session row move in one transaction. Members book for themselves; staff may book on behalf of a customer.",
    request_body = SessionBook,
    responses(
        (status = 201, description = "Session booked", body = SessionResponse),
        (status = 400, description = "Bad request - invalid time range"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Insufficient credits"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn book_session(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(data): Json<SessionBook>,
) -> Result<(StatusCode, Json<SessionResponse>)> {
    let customer_id = match data.customer_id {
        Some(customer_id) if customer_id != actor.user_id => {
            if !permissions::has_permission(&actor, Resource::Sessions, Operation::CreateAll) {
                return Err(Error::InsufficientPermissions {
                    resource: Resource::Sessions,
                    operation: Operation::CreateAll,
                });
            }
            customer_id
        }
        _ => {
            if !permissions::has_permission(&actor, Resource::Sessions, Operation::CreateOwn) {
                return Err(Error::InsufficientPermissions {
                    resource: Resource::Sessions,
                    operation: Operation::CreateOwn,
                });
            }
            actor.user_id
        }
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let session = Sessions::new(&mut conn)
        .book(&SessionBookDBRequest {
            tenant_id: actor.tenant_id,
            trainer_id: data.trainer_id,
            customer_id,
            starts_at: data.starts_at,
            ends_at: data.ends_at,
            requires_approval: data.requires_approval,
            note: data.note,
        })
        .await?;

    state
        .notifier
        .dispatch_to_both(session.customer_id, session.trainer_id, session.id, SessionEventKind::Booked);

    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

/// Get a session
#[utoipa::path(
    get,
    path = "/sessions/{session_id}",
    tag = "sessions",
    summary = "Get a session",
    description = "Members can only read sessions they are a party to.",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Session details", body = SessionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Session not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    actor: CurrentActor,
) -> Result<Json<SessionResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let session = find_visible_session(&mut conn, &actor, session_id).await?;
    Ok(Json(SessionResponse::from(session)))
}

/// List a customer's sessions
#[utoipa::path(
    get,
    path = "/users/{user_id}/sessions",
    tag = "sessions",
    summary = "List a customer's sessions",
    params(
        ("user_id" = String, Path, description = "Customer user ID"),
    ),
    responses(
        (status = 200, description = "Sessions, most recent start first", body = [SessionResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    actor: CurrentActor,
) -> Result<Json<Vec<SessionResponse>>> {
    if !permissions::owns_or_can_read_all(&actor, Resource::Sessions, user_id) {
        return Err(Error::InsufficientPermissions {
            resource: Resource::Sessions,
            operation: Operation::ReadOwn,
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let sessions = Sessions::new(&mut conn).list_for_customer(actor.tenant_id, user_id).await?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

/// Approve a pending session
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/approve",
    tag = "sessions",
    summary = "Approve a pending session",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Session scheduled", body = SessionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - staff only"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session is not pending approval"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn approve_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    perm: RequiresPermission<resource::Sessions, operation::UpdateAll>,
) -> Result<Json<SessionResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    find_visible_session(&mut conn, &perm, session_id).await?;

    let session = Sessions::new(&mut conn).approve(session_id).await?;
    state
        .notifier
        .dispatch_to_both(session.customer_id, session.trainer_id, session.id, SessionEventKind::Approved);
    Ok(Json(SessionResponse::from(session)))
}

/// Reject a pending session
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/reject",
    tag = "sessions",
    summary = "Reject a pending session",
    description = "Reject a pending session and refund the booking credit.",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Session rejected", body = SessionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - staff only"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session is not pending approval"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn reject_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    perm: RequiresPermission<resource::Sessions, operation::UpdateAll>,
) -> Result<Json<SessionResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    find_visible_session(&mut conn, &perm, session_id).await?;

    let session = Sessions::new(&mut conn).reject(session_id).await?;
    state
        .notifier
        .dispatch_to_both(session.customer_id, session.trainer_id, session.id, SessionEventKind::Rejected);
    Ok(Json(SessionResponse::from(session)))
}

/// Complete a session
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/complete",
    tag = "sessions",
    summary = "Mark a session completed",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Session completed", body = SessionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - staff only"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session is not scheduled"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn complete_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    perm: RequiresPermission<resource::Sessions, operation::UpdateAll>,
) -> Result<Json<SessionResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    find_visible_session(&mut conn, &perm, session_id).await?;

    let session = Sessions::new(&mut conn).complete(session_id).await?;
    state
        .notifier
        .dispatch_to_both(session.customer_id, session.trainer_id, session.id, SessionEventKind::Completed);
    Ok(Json(SessionResponse::from(session)))
}

/// Cancel a session
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/cancel",
    tag = "sessions",
    summary = "Cancel a session",
    description = "Cancel a scheduled session. Staff cancellations always refund the credit; customer cancellations refund only when made before the tenant's notice window. Pending sessions are rejected, not cancelled.",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Session cancelled", body = SessionCancelResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session is not scheduled"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    actor: CurrentActor,
) -> Result<Json<SessionCancelResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    find_visible_session(&mut conn, &actor, session_id).await?;

    let policy = Policies::new(&mut conn)
        .effective(actor.tenant_id, state.config.booking)
        .await?;
    let (session, outcome) = Sessions::new(&mut conn)
        .cancel(session_id, actor.user_id, actor.is_staff(), &policy, Utc::now())
        .await?;

    state.notifier.dispatch_to_both(
        session.customer_id,
        session.trainer_id,
        session.id,
        SessionEventKind::Cancelled {
            refunded: outcome.refunded,
        },
    );

    Ok(Json(SessionCancelResponse {
        session: SessionResponse::from(session),
        refunded: outcome.refunded,
        required_notice_hours: outcome.required_notice_hours,
    }))
}

/// Mark a no-show
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/no-show",
    tag = "sessions",
    summary = "Mark a session as a no-show",
    description = "Record that the customer did not turn up. Whether the credit is refunded follows the tenant's policy. Only the session's own trainer, or a manager/admin, may mark it.",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "No-show recorded", body = SessionNoShowResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - not the owning trainer"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session is not scheduled"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn mark_no_show(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    actor: CurrentActor,
) -> Result<Json<SessionNoShowResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let session = find_visible_session(&mut conn, &actor, session_id).await?;
    if !permissions::can_mark_no_show(&actor, session.trainer_id) {
        return Err(Error::InsufficientPermissions {
            resource: Resource::Sessions,
            operation: Operation::UpdateAll,
        });
    }

    let policy = Policies::new(&mut conn)
        .effective(actor.tenant_id, state.config.booking)
        .await?;
    let (session, refunded) = Sessions::new(&mut conn).no_show(session_id, &policy).await?;

    state.notifier.dispatch_to_both(
        session.customer_id,
        session.trainer_id,
        session.id,
        SessionEventKind::NoShow { refunded },
    );

    Ok(Json(SessionNoShowResponse {
        session: SessionResponse::from(session),
        refunded,
    }))
}

/// Fetch a session the actor may see. Out-of-tenant rows come back as 404;
/// members must be a party to the session.
async fn find_visible_session(conn: &mut PgConnection, actor: &CurrentActor, session_id: SessionId) -> Result<PtSession> {
    let not_found = || Error::NotFound {
        resource: "Session".to_string(),
        id: session_id.to_string(),
    };

    let session = Sessions::new(conn)
        .get(session_id)
        .await?
        .filter(|s| s.tenant_id == actor.tenant_id)
        .ok_or_else(not_found)?;

    if permissions::has_permission(actor, Resource::Sessions, Operation::ReadAll) {
        return Ok(session);
    }
    if session.customer_id == actor.user_id || session.trainer_id == actor.user_id {
        Ok(session)
    } else {
        Err(not_found())
    }
}
