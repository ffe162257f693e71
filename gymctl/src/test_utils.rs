use crate::{
    db::{
        handlers::Memberships,
        models::{
            credits::CreditGrantDBRequest,
            memberships::{Membership, MembershipCreateDBRequest, PlanCreateDBRequest},
            sessions::SessionBookDBRequest,
        },
        models::policies::BookingPolicy,
    },
    types::{TenantId, UserId},
};
use axum_test::TestServer;
use chrono::{Duration, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

pub async fn create_test_server(pool: PgPool) -> TestServer {
    let config = create_test_config();
    let (router, _drop_guard) = crate::setup_app(pool, config).await.expect("Failed to setup test app");
    // The guard is dropped here on purpose: API tests drive reconciliation
    // through run_once, never through the background loop.
    TestServer::new(router).expect("Failed to create test server")
}

pub fn create_test_config() -> crate::config::Config {
    let database_url = std::env::var("TEST_DATABASE_URL").unwrap_or_else(|_| "postgres://postgres@localhost/test".to_string());

    crate::config::Config {
        database_url,
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_allowed_origins: vec![],
        booking: BookingPolicy::default(),
        reconcile_interval: std::time::Duration::from_secs(600),
    }
}

pub fn grant_request(tenant_id: TenantId, user_id: UserId, total_credits: i64) -> CreditGrantDBRequest {
    CreditGrantDBRequest {
        tenant_id,
        user_id,
        order_id: None,
        total_credits,
        purchased_at: None,
        expires_at: None,
        note: None,
    }
}

/// A confirmed booking starting `lead_time` from now, one hour long.
pub fn book_request(tenant_id: TenantId, customer_id: UserId, lead_time: Duration) -> SessionBookDBRequest {
    let starts_at = Utc::now() + lead_time;
    SessionBookDBRequest {
        tenant_id,
        trainer_id: Uuid::new_v4(),
        customer_id,
        starts_at,
        ends_at: starts_at + Duration::hours(1),
        requires_approval: false,
        note: None,
    }
}

/// A fresh active membership on a new plan with the given freeze quota.
pub async fn create_test_membership(conn: &mut PgConnection, max_freezes_per_year: i32) -> Membership {
    let tenant_id = Uuid::new_v4();
    let mut memberships = Memberships::new(conn);

    let plan = memberships
        .create_plan(&PlanCreateDBRequest {
            tenant_id,
            name: format!("plan_{}", Uuid::new_v4().simple()),
            max_freezes_per_year,
        })
        .await
        .expect("Failed to create test plan");

    memberships
        .create(&MembershipCreateDBRequest {
            tenant_id,
            user_id: Uuid::new_v4(),
            plan_id: plan.id,
            starts_at: Utc::now(),
            auto_renew: true,
        })
        .await
        .expect("Failed to create test membership")
}
