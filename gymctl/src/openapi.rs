use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

use crate::api;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "x-gym-actor".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-gym-actor"))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    servers(
        (url = "/api/v1", description = "Gym control API")
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::credits::grant_credits,
        api::handlers::credits::get_balance,
        api::handlers::credits::list_batches,
        api::handlers::memberships::create_plan,
        api::handlers::memberships::get_plan,
        api::handlers::memberships::create_membership,
        api::handlers::memberships::get_membership,
        api::handlers::memberships::freeze_membership,
        api::handlers::memberships::unfreeze_membership,
        api::handlers::memberships::cancel_membership,
        api::handlers::memberships::get_policy,
        api::handlers::memberships::update_policy,
        api::handlers::sessions::book_session,
        api::handlers::sessions::get_session,
        api::handlers::sessions::list_sessions,
        api::handlers::sessions::approve_session,
        api::handlers::sessions::reject_session,
        api::handlers::sessions::complete_session,
        api::handlers::sessions::cancel_session,
        api::handlers::sessions::mark_no_show,
    ),
    components(
        schemas(
            api::models::credits::CreditGrantCreate,
            api::models::credits::CreditBatchResponse,
            api::models::credits::BalanceResponse,
            api::models::memberships::PlanCreate,
            api::models::memberships::PlanResponse,
            api::models::memberships::MembershipCreate,
            api::models::memberships::MembershipResponse,
            api::models::memberships::FreezeCreate,
            api::models::memberships::FreezeIntervalResponse,
            api::models::memberships::MembershipCancel,
            api::models::memberships::PolicyUpdate,
            api::models::memberships::PolicyResponse,
            api::models::sessions::SessionBook,
            api::models::sessions::SessionResponse,
            api::models::sessions::SessionCancelResponse,
            api::models::sessions::SessionNoShowResponse,
            crate::db::models::memberships::MembershipStatus,
            crate::db::models::sessions::SessionStatus,
            crate::auth::Role,
        )
    ),
    tags(
        (name = "credits", description = "PT credit ledger"),
        (name = "memberships", description = "Plans, memberships and freezes"),
        (name = "sessions", description = "PT session lifecycle"),
        (name = "policy", description = "Tenant booking policy"),
    )
)]
pub struct ApiDoc;
