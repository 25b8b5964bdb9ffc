use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use amora_core::model::{Match, SwipeDirection};
use amora_core::swipes::{self, SwipeOutcome};
use amora_shared::types::api::ApiResponse;
use amora_shared::types::auth::AuthUser;
use amora_shared::AppResult;

use super::{validate, RequestContext};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SwipeRequest {
    pub swiped_id: Uuid,
    pub direction: SwipeDirection,
}

#[derive(Debug, Deserialize)]
pub struct MatchesQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ModerateMatchRequest {
    #[validate(length(min = 1, max = 500, message = "reason must be 1-500 characters"))]
    pub reason: String,
}

pub async fn record_swipe(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SwipeRequest>,
) -> AppResult<Json<ApiResponse<SwipeOutcome>>> {
    let outcome = swipes::record_swipe(&state.core, &cx, auth_user.id, req.swiped_id, req.direction).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

pub async fn list_matches(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<MatchesQuery>,
) -> AppResult<Json<ApiResponse<Vec<Match>>>> {
    let matches = swipes::list_matches(&state.core, auth_user.id, query.active_only).await?;
    Ok(Json(ApiResponse::ok(matches)))
}

pub async fn get_match(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Match>>> {
    let m = swipes::get_match(&state.core, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(m)))
}

pub async fn unmatch(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Match>>> {
    let m = swipes::unmatch(&state.core, &cx, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(m)))
}

pub async fn request_rematch(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Match>>> {
    let m = swipes::request_rematch(&state.core, &cx, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(m)))
}

pub async fn deactivate_match(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ModerateMatchRequest>,
) -> AppResult<Json<ApiResponse<Match>>> {
    validate(&req)?;
    let m = swipes::deactivate_match(&state.core, &cx, auth_user.id, id, &req.reason).await?;
    Ok(Json(ApiResponse::ok(m)))
}

pub async fn reactivate_match(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ModerateMatchRequest>,
) -> AppResult<Json<ApiResponse<Match>>> {
    validate(&req)?;
    let m = swipes::reactivate_match(&state.core, &cx, auth_user.id, id, &req.reason).await?;
    Ok(Json(ApiResponse::ok(m)))
}
