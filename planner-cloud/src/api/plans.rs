//! Catalog endpoints

use axum::{Json, extract::State};
use shared::subscription::{Sport, SubscriptionPlan};

use super::ApiResult;
use crate::state::AppState;

/// GET /api/plans
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Vec<SubscriptionPlan>> {
    let plans = state.engine.list_active_plans().await?;
    Ok(Json(plans))
}

/// GET /api/sports
pub async fn list_sports(State(state): State<AppState>) -> ApiResult<Vec<Sport>> {
    let sports = state.engine.list_active_sports().await?;
    Ok(Json(sports))
}
