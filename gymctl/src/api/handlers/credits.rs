use crate::{
    api::models::credits::{BalanceResponse, CreditBatchResponse, CreditGrantCreate},
    auth::{
        permissions::{self, operation, resource, RequiresPermission},
        CurrentActor,
    },
    db::{handlers::Credits, models::credits::CreditGrantDBRequest},
    errors::{Error, Result},
    types::{Resource, UserId},
    AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;

/// Grant credits to a customer
#[utoipa::path(
    post,
    path = "/credits/grants",
    tag = "credits",
    summary = "Grant credits",
    description = "Create a new credit batch for a customer. Negative amounts are administrative deductions and must not drive the balance negative. Staff only.",
    request_body = CreditGrantCreate,
    responses(
        (status = 201, description = "Credit batch created", body = CreditBatchResponse),
        (status = 400, description = "Bad request - zero credits"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - staff only"),
        (status = 409, description = "Deduction exceeds available balance"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn grant_credits(
    State(state): State<AppState>,
    perm: RequiresPermission<resource::Credits, operation::CreateAll>,
    Json(data): Json<CreditGrantCreate>,
) -> Result<(StatusCode, Json<CreditBatchResponse>)> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut credits = Credits::new(&mut conn);

    let batch = credits
        .grant(&CreditGrantDBRequest {
            tenant_id: perm.tenant_id,
            user_id: data.user_id,
            order_id: data.order_id,
            total_credits: data.credits,
            purchased_at: None,
            expires_at: data.expires_at,
            note: data.note,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(CreditBatchResponse::from(batch))))
}

/// Get a customer's available balance
#[utoipa::path(
    get,
    path = "/users/{user_id}/credits/balance",
    tag = "credits",
    summary = "Get available balance",
    description = "Sum of remaining credits across non-expired batches. Members can only read their own.",
    params(
        ("user_id" = String, Path, description = "Customer user ID"),
    ),
    responses(
        (status = 200, description = "Available balance", body = BalanceResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    actor: CurrentActor,
) -> Result<Json<BalanceResponse>> {
    require_ledger_access(&actor, user_id)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let now = Utc::now();
    let available = Credits::new(&mut conn).available(actor.tenant_id, user_id, now).await?;

    Ok(Json(BalanceResponse {
        user_id,
        available,
        as_of: now,
    }))
}

/// List a customer's credit batches
#[utoipa::path(
    get,
    path = "/users/{user_id}/credits/batches",
    tag = "credits",
    summary = "List credit batches",
    description = "Audit view of a customer's ledger, oldest purchase first. Members can only read their own.",
    params(
        ("user_id" = String, Path, description = "Customer user ID"),
    ),
    responses(
        (status = 200, description = "Credit batches", body = [CreditBatchResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("x-gym-actor" = [])
    )
)]
pub async fn list_batches(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    actor: CurrentActor,
) -> Result<Json<Vec<CreditBatchResponse>>> {
    require_ledger_access(&actor, user_id)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let batches = Credits::new(&mut conn).list_batches(actor.tenant_id, user_id).await?;

    Ok(Json(batches.into_iter().map(CreditBatchResponse::from).collect()))
}

fn require_ledger_access(actor: &CurrentActor, owner: UserId) -> Result<()> {
    if permissions::owns_or_can_read_all(actor, Resource::Credits, owner) {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions {
            resource: Resource::Credits,
            operation: crate::types::Operation::ReadOwn,
        })
    }
}
