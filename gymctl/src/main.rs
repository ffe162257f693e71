mod api;
mod auth;
mod config;
mod db;
mod errors;
mod notifications;
mod openapi;
mod scheduler;
mod types;

#[cfg(test)]
mod test_utils;

use crate::{notifications::Notifier, openapi::ApiDoc, scheduler::ReconciliationScheduler};
use axum::{
    http::{HeaderValue, Request, Response},
    routing::{get, post},
    Router,
};
use bon::Builder;
use clap::Parser;
use config::{Args, Config};
use sqlx::PgPool;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::DropGuard;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, instrument, Span};
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

pub use types::{BatchId, MembershipId, PlanId, SessionId, TenantId, UserId};

#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    #[builder(default)]
    pub notifier: Notifier,
}

/// Setup the complete application. Returns the router and a guard that
/// stops the reconciliation scheduler when dropped.
#[instrument(skip(pool, config))]
pub async fn setup_app(pool: PgPool, config: Config) -> anyhow::Result<(Router, DropGuard)> {
    debug!("Setting up application");

    let scheduler = ReconciliationScheduler::new(pool.clone(), config.reconcile_interval);
    let drop_guard = scheduler.spawn();

    let state = AppState::builder().db(pool).config(config).build();
    let router = build_router(state)?;

    Ok((router, drop_guard))
}

#[instrument(skip(state))]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/credits/grants", post(api::handlers::credits::grant_credits))
        .route("/users/{user_id}/credits/balance", get(api::handlers::credits::get_balance))
        .route("/users/{user_id}/credits/batches", get(api::handlers::credits::list_batches))
        //
        .route("/plans", post(api::handlers::memberships::create_plan))
        .route("/plans/{plan_id}", get(api::handlers::memberships::get_plan))
        .route("/memberships", post(api::handlers::memberships::create_membership))
        .route("/memberships/{membership_id}", get(api::handlers::memberships::get_membership))
        .route(
            "/memberships/{membership_id}/freeze",
            post(api::handlers::memberships::freeze_membership),
        )
        .route(
            "/memberships/{membership_id}/unfreeze",
            post(api::handlers::memberships::unfreeze_membership),
        )
        .route(
            "/memberships/{membership_id}/cancel",
            post(api::handlers::memberships::cancel_membership),
        )
        .route(
            "/policy",
            get(api::handlers::memberships::get_policy).put(api::handlers::memberships::update_policy),
        )
        //
        .route("/sessions", post(api::handlers::sessions::book_session))
        .route("/sessions/{session_id}", get(api::handlers::sessions::get_session))
        .route("/users/{user_id}/sessions", get(api::handlers::sessions::list_sessions))
        .route("/sessions/{session_id}/approve", post(api::handlers::sessions::approve_session))
        .route("/sessions/{session_id}/reject", post(api::handlers::sessions::reject_session))
        .route("/sessions/{session_id}/complete", post(api::handlers::sessions::complete_session))
        .route("/sessions/{session_id}/cancel", post(api::handlers::sessions::cancel_session))
        .route("/sessions/{session_id}/no-show", post(api::handlers::sessions::mark_no_show))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(|response: &Response<_>, latency: Duration, _span: &Span| {
                    tracing::info!(
                        status = %response.status(),
                        latency = ?latency,
                        "request completed"
                    );
                }),
        )
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", api_routes)
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/docs"));

    let cors_layer = create_cors_layer(&state.config)?;
    Ok(router.layer(cors_layer))
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.cors_allowed_origins {
        origins.push(origin.parse::<HeaderValue>()?);
    }
    Ok(CorsLayer::new().allow_origin(origins))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    debug!("{:?}", args);

    let config = Config::load(&args)?;
    debug!("Starting with configuration: {:#?}", config);

    let pool = PgPool::connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let bind_addr = format!("{}:{}", config.host, config.port);
    let (router, _drop_guard) = setup_app(pool, config).await?;

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("gymctl listening on http://{bind_addr}");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}
