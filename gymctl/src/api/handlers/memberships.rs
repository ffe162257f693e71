use crate::{
    api::models::memberships::{
        FreezeCreate, FreezeIntervalResponse, MembershipCancel, MembershipCreate, MembershipResponse, PlanCreate,
        PlanResponse, PolicyResponse, PolicyUpdate,
    },
    auth::{
        permissions::{self, operation, resource, RequiresPermission},
        CurrentActor,
    },
    db::{
        handlers::{Memberships, Policies},
        models::memberships::{Membership, MembershipCreateDBRequest, PlanCreateDBRequest},
    },
    errors::{Error, Result},
    types::{MembershipId, Operation, PlanId, Resource},
    AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use sqlx::PgConnection;

/// Create a membership plan
#[utoipa::path(
    post,
    path = "/plans",
    tag = "memberships",
    summary = "Create a plan",
    description = "Create a membership plan with its yearly freeze quota. Manager role required.",
    request_body = PlanCreate,
    responses(
        (status = 201, description = "Plan created", body = PlanResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn create_plan(
    State(state): State<AppState>,
    perm: RequiresPermission<resource::Plans, operation::CreateAll>,
    Json(data): Json<PlanCreate>,
) -> Result<(StatusCode, Json<PlanResponse>)> {
    if data.max_freezes_per_year < 0 {
        return Err(Error::BadRequest {
            message: "freeze quota cannot be negative".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let plan = Memberships::new(&mut conn)
        .create_plan(&PlanCreateDBRequest {
            tenant_id: perm.tenant_id,
            name: data.name,
            max_freezes_per_year: data.max_freezes_per_year,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(PlanResponse::from(plan))))
}

/// Get a plan
#[utoipa::path(
    get,
    path = "/plans/{plan_id}",
    tag = "memberships",
    summary = "Get a plan",
    params(
        ("plan_id" = String, Path, description = "Plan ID"),
    ),
    responses(
        (status = 200, description = "Plan details", body = PlanResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Plan not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<PlanId>,
    perm: RequiresPermission<resource::Plans, operation::ReadAll>,
) -> Result<Json<PlanResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let plan = Memberships::new(&mut conn)
        .get_plan(plan_id)
        .await?
        .filter(|p| p.tenant_id == perm.tenant_id)
        .ok_or_else(|| Error::NotFound {
            resource: "Plan".to_string(),
            id: plan_id.to_string(),
        })?;

    Ok(Json(PlanResponse::from(plan)))
}

/// Create a membership
#[utoipa::path(
    post,
    path = "/memberships",
    tag = "memberships",
    summary = "Create a membership",
    description = "Enroll a customer on a plan. Staff only.",
    request_body = MembershipCreate,
    responses(
        (status = 201, description = "Membership created", body = MembershipResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Plan not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn create_membership(
    State(state): State<AppState>,
    perm: RequiresPermission<resource::Memberships, operation::CreateAll>,
    Json(data): Json<MembershipCreate>,
) -> Result<(StatusCode, Json<MembershipResponse>)> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    // The plan must exist in this tenant.
    Memberships::new(&mut conn)
        .get_plan(data.plan_id)
        .await?
        .filter(|p| p.tenant_id == perm.tenant_id)
        .ok_or_else(|| Error::NotFound {
            resource: "Plan".to_string(),
            id: data.plan_id.to_string(),
        })?;

    let membership = Memberships::new(&mut conn)
        .create(&MembershipCreateDBRequest {
            tenant_id: perm.tenant_id,
            user_id: data.user_id,
            plan_id: data.plan_id,
            starts_at: data.starts_at.unwrap_or_else(Utc::now),
            auto_renew: data.auto_renew,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(MembershipResponse::from(membership))))
}

/// Get a membership
#[utoipa::path(
    get,
    path = "/memberships/{membership_id}",
    tag = "memberships",
    summary = "Get a membership",
    description = "Members can only read their own membership.",
    params(
        ("membership_id" = String, Path, description = "Membership ID"),
    ),
    responses(
        (status = 200, description = "Membership details", body = MembershipResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Membership not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn get_membership(
    State(state): State<AppState>,
    Path(membership_id): Path<MembershipId>,
    actor: CurrentActor,
) -> Result<Json<MembershipResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let membership = find_visible_membership(&mut conn, &actor, membership_id, Operation::ReadAll).await?;
    Ok(Json(MembershipResponse::from(membership)))
}

/// Freeze a membership
#[utoipa::path(
    post,
    path = "/memberships/{membership_id}/freeze",
    tag = "memberships",
    summary = "Freeze a membership",
    description = "Freeze an active membership for a date range, consuming one freeze from the plan's yearly quota. Members can freeze their own membership.",
    params(
        ("membership_id" = String, Path, description = "Membership ID"),
    ),
    request_body = FreezeCreate,
    responses(
        (status = 201, description = "Freeze recorded", body = FreezeIntervalResponse),
        (status = 400, description = "Invalid date range"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Membership not found"),
        (status = 409, description = "Membership not active or quota exceeded"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn freeze_membership(
    State(state): State<AppState>,
    Path(membership_id): Path<MembershipId>,
    actor: CurrentActor,
    Json(data): Json<FreezeCreate>,
) -> Result<(StatusCode, Json<FreezeIntervalResponse>)> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    find_visible_membership(&mut conn, &actor, membership_id, Operation::UpdateAll).await?;

    let now = Utc::now();
    let interval = Memberships::new(&mut conn)
        .freeze(membership_id, data.starts_at.unwrap_or(now), data.ends_at, data.reason, now)
        .await?;

    Ok((StatusCode::CREATED, Json(FreezeIntervalResponse::from(interval))))
}

/// Unfreeze a membership early
#[utoipa::path(
    post,
    path = "/memberships/{membership_id}/unfreeze",
    tag = "memberships",
    summary = "Unfreeze a membership",
    description = "Restore a frozen membership to active before its freeze runs out. The consumed freeze quota is not given back.",
    params(
        ("membership_id" = String, Path, description = "Membership ID"),
    ),
    responses(
        (status = 200, description = "Membership restored", body = MembershipResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Membership not found"),
        (status = 409, description = "Membership is not frozen"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn unfreeze_membership(
    State(state): State<AppState>,
    Path(membership_id): Path<MembershipId>,
    actor: CurrentActor,
) -> Result<Json<MembershipResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    find_visible_membership(&mut conn, &actor, membership_id, Operation::UpdateAll).await?;

    let membership = Memberships::new(&mut conn).unfreeze(membership_id).await?;
    Ok(Json(MembershipResponse::from(membership)))
}

/// Cancel a membership
#[utoipa::path(
    post,
    path = "/memberships/{membership_id}/cancel",
    tag = "memberships",
    summary = "Cancel a membership",
    description = "Cancel from any non-cancelled status. Cancelling twice is an error.",
    params(
        ("membership_id" = String, Path, description = "Membership ID"),
    ),
    request_body = MembershipCancel,
    responses(
        (status = 200, description = "Membership cancelled", body = MembershipResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Membership not found"),
        (status = 409, description = "Already cancelled"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn cancel_membership(
    State(state): State<AppState>,
    Path(membership_id): Path<MembershipId>,
    actor: CurrentActor,
    Json(data): Json<MembershipCancel>,
) -> Result<Json<MembershipResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    find_visible_membership(&mut conn, &actor, membership_id, Operation::UpdateAll).await?;

    let membership = Memberships::new(&mut conn)
        .cancel(membership_id, data.reason, Utc::now())
        .await?;
    Ok(Json(MembershipResponse::from(membership)))
}

/// Get the tenant's booking policy
#[utoipa::path(
    get,
    path = "/policy",
    tag = "policy",
    summary = "Get the booking policy",
    description = "The policy currently applied to cancellations and no-shows. Staff only.",
    responses(
        (status = 200, description = "Effective policy", body = PolicyResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn get_policy(
    State(state): State<AppState>,
    perm: RequiresPermission<resource::Policies, operation::ReadAll>,
) -> Result<Json<PolicyResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let response = match Policies::new(&mut conn).get(perm.tenant_id).await? {
        Some(policy) => PolicyResponse::from(policy),
        None => PolicyResponse::from(state.config.booking),
    };
    Ok(Json(response))
}

/// Update the tenant's booking policy
#[utoipa::path(
    put,
    path = "/policy",
    tag = "policy",
    summary = "Update the booking policy",
    description = "Set the tenant's cancellation notice window and no-show refund behavior. Manager role required.",
    request_body = PolicyUpdate,
    responses(
        (status = 200, description = "Policy updated", body = PolicyResponse),
        (status = 400, description = "Invalid policy values"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn update_policy(
    State(state): State<AppState>,
    perm: RequiresPermission<resource::Policies, operation::UpdateAll>,
    Json(data): Json<PolicyUpdate>,
) -> Result<Json<PolicyResponse>> {
    if data.cancel_notice_hours < 0 {
        return Err(Error::BadRequest {
            message: "cancel notice hours cannot be negative".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let policy = Policies::new(&mut conn).upsert(perm.tenant_id, (&data).into()).await?;
    Ok(Json(PolicyResponse::from(policy)))
}

/// Fetch a membership the actor is allowed to see and act on. Out-of-tenant
/// rows come back as 404 so their existence never leaks; members must own
/// the membership and hold the Own variant of `all_operation`.
async fn find_visible_membership(
    conn: &mut PgConnection,
    actor: &CurrentActor,
    membership_id: MembershipId,
    all_operation: Operation,
) -> Result<Membership> {
    let not_found = || Error::NotFound {
        resource: "Membership".to_string(),
        id: membership_id.to_string(),
    };

    let membership = Memberships::new(conn)
        .get(membership_id)
        .await?
        .filter(|m| m.tenant_id == actor.tenant_id)
        .ok_or_else(not_found)?;

    if permissions::has_permission(actor, Resource::Memberships, all_operation) {
        return Ok(membership);
    }

    let own_operation = match all_operation {
        Operation::ReadAll => Operation::ReadOwn,
        Operation::UpdateAll => Operation::UpdateOwn,
        other => other,
    };
    if membership.user_id == actor.user_id && permissions::has_permission(actor, Resource::Memberships, own_operation) {
        Ok(membership)
    } else {
        // Same shape as a genuinely missing row.
        Err(not_found())
    }
}
