use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use amora_core::blocks;
use amora_core::model::Block;
use amora_shared::types::api::ApiResponse;
use amora_shared::types::auth::AuthUser;
use amora_shared::AppResult;

use super::{validate, RequestContext};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct BlockRequest {
    pub blocked_id: Uuid,
    #[validate(length(max = 500, message = "reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FilterRequest {
    #[validate(length(max = 500, message = "at most 500 candidates per call"))]
    pub candidates: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct FilterResponse {
    pub candidates: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BlockStatus {
    pub blocking: bool,
    pub blocked_by: bool,
}

pub async fn block_user(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<BlockRequest>,
) -> AppResult<Json<ApiResponse<Block>>> {
    validate(&req)?;
    let block = blocks::block(&state.core, &cx, auth_user.id, req.blocked_id, req.reason).await?;
    Ok(Json(ApiResponse::ok(block)))
}

pub async fn unblock_user(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<()>>> {
    blocks::unblock(&state.core, &cx, auth_user.id, user_id).await?;
    Ok(Json(ApiResponse::ok(())))
}

pub async fn list_blocked(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<Block>>>> {
    let blocked = blocks::list_blocked(&state.core, auth_user.id).await?;
    Ok(Json(ApiResponse::ok(blocked)))
}

pub async fn block_status(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<BlockStatus>>> {
    let status = BlockStatus {
        blocking: blocks::is_blocked(&state.core, auth_user.id, user_id).await?,
        blocked_by: blocks::is_blocked(&state.core, user_id, auth_user.id).await?,
    };
    Ok(Json(ApiResponse::ok(status)))
}

/// Drops candidates hidden from the caller in either direction.
pub async fn filter_candidates(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<FilterRequest>,
) -> AppResult<Json<ApiResponse<FilterResponse>>> {
    validate(&req)?;
    let candidates = blocks::exclude_blocked(&state.core, auth_user.id, req.candidates).await?;
    Ok(Json(ApiResponse::ok(FilterResponse { candidates })))
}
