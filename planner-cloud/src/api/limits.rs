//! Plan-limit queries for resource-creation flows

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use shared::error::AppError;
use shared::subscription::{LimitQuery, Owner};

use super::ApiResult;
use crate::auth::Caller;
use crate::quota::LimitCheck;
use crate::state::AppState;

/// Owner named by the query (an organization) or the caller itself.
async fn resolve_owner(
    state: &AppState,
    caller: &Caller,
    query: &LimitQuery,
) -> Result<Owner, AppError> {
    let owner = match query.organization_id {
        Some(organization_id) => Owner::Organization(organization_id),
        None => Owner::User(caller.user_id.clone()),
    };
    state
        .engine
        .authorize_owner(&caller.user_id, &owner)
        .await?;
    Ok(owner)
}

/// GET /api/limits/teams?sport_id=&organization_id=
pub async fn team_limit(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<LimitCheck> {
    let owner = resolve_owner(&state, &caller, &query).await?;
    let check = state.limits.check_team_limit(&owner, query.sport_id).await?;
    Ok(Json(check))
}

/// GET /api/limits/members?sport_id=&team_id=&organization_id=
pub async fn member_limit(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<LimitCheck> {
    let team_id = query
        .team_id
        .ok_or_else(|| AppError::validation("team_id is required"))?;
    let owner = resolve_owner(&state, &caller, &query).await?;
    let check = state
        .limits
        .check_member_limit(&owner, query.sport_id, team_id)
        .await?;
    Ok(Json(check))
}
