//! Subscription lifecycle endpoints

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use shared::subscription::{
    ChangePlanRequest, CreateSubscriptionRequest, ExtendSubscriptionRequest, Owner,
    OwnerSubscriptionStatus, Subscription, SubscriptionHistory,
};

use super::ApiResult;
use crate::auth::Caller;
use crate::lifecycle::PlanChangeOutcome;
use crate::state::AppState;

/// POST /api/subscriptions
pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> ApiResult<Subscription> {
    let sub = state.engine.create(&caller.user_id, req).await?;
    Ok(Json(sub))
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub organization_id: Option<i64>,
}

impl OwnerQuery {
    /// The named organization, or the caller itself
    fn owner(&self, caller: &Caller) -> Owner {
        match self.organization_id {
            Some(organization_id) => Owner::Organization(organization_id),
            None => Owner::User(caller.user_id.clone()),
        }
    }
}

/// GET /api/subscriptions?organization_id=
///
/// Without `organization_id` the caller's own subscriptions are listed.
pub async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Vec<Subscription>> {
    let owner = query.owner(&caller);
    let subs = state.engine.list_for_owner(&caller.user_id, &owner).await?;
    Ok(Json(subs))
}

/// GET /api/subscriptions/status?organization_id=
///
/// Dashboard access check: `has_active_subscription` gates the client.
pub async fn status(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<OwnerSubscriptionStatus> {
    let owner = query.owner(&caller);
    Ok(Json(state.engine.owner_status(&caller.user_id, &owner).await?))
}

/// GET /api/subscriptions/{id}
pub async fn get(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<i64>,
) -> ApiResult<Subscription> {
    Ok(Json(state.engine.get(&caller.user_id, id).await?))
}

/// GET /api/subscriptions/{id}/history
pub async fn history(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<SubscriptionHistory>> {
    Ok(Json(state.engine.history(&caller.user_id, id).await?))
}

/// POST /api/subscriptions/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<i64>,
) -> ApiResult<Subscription> {
    Ok(Json(state.engine.cancel(&caller.user_id, id).await?))
}

/// POST /api/subscriptions/{id}/reactivate
pub async fn reactivate(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<i64>,
) -> ApiResult<Subscription> {
    Ok(Json(state.engine.reactivate(&caller.user_id, id).await?))
}

/// POST /api/subscriptions/{id}/plan
pub async fn change_plan(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<i64>,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<PlanChangeOutcome> {
    Ok(Json(state.engine.change_plan(&caller.user_id, id, req).await?))
}

/// POST /api/subscriptions/{id}/extend
pub async fn extend(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<i64>,
    Json(req): Json<ExtendSubscriptionRequest>,
) -> ApiResult<Subscription> {
    Ok(Json(state.engine.extend(&caller.user_id, id, req).await?))
}
