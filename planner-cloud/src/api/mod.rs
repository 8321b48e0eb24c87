//! API routes for planner-cloud

pub mod health;
pub mod limits;
pub mod plans;
pub mod subscriptions;

use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use shared::error::AppError;
use tower_http::trace::TraceLayer;

use crate::auth::caller_auth_middleware;
use crate::state::AppState;

pub type ApiResult<T> = Result<Json<T>, AppError>;

/// Create the combined router
pub fn create_router(state: AppState) -> Router {
    // Caller-authenticated subscription management
    let authenticated = Router::new()
        .route(
            "/api/subscriptions",
            post(subscriptions::create).get(subscriptions::list),
        )
        .route("/api/subscriptions/status", get(subscriptions::status))
        .route("/api/subscriptions/{id}", get(subscriptions::get))
        .route("/api/subscriptions/{id}/history", get(subscriptions::history))
        .route("/api/subscriptions/{id}/cancel", post(subscriptions::cancel))
        .route(
            "/api/subscriptions/{id}/reactivate",
            post(subscriptions::reactivate),
        )
        .route(
            "/api/subscriptions/{id}/plan",
            post(subscriptions::change_plan),
        )
        .route("/api/subscriptions/{id}/extend", post(subscriptions::extend))
        .route("/api/limits/teams", get(limits::team_limit))
        .route("/api/limits/members", get(limits::member_limit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            caller_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/plans", get(plans::list_plans))
        .route("/api/sports", get(plans::list_sports))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
