use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use amora_core::model::{Appeal, AppealStatus, AppliedSanction, Report, ReportStatus, ReviewedAppeal, Sanction};
use amora_core::moderation::appeals::{self, SubmitAppeal};
use amora_core::moderation::reports::{self, ReviewOutcome, ReviewReport, SubmitReport};
use amora_core::moderation::sanctions::{self, SanctionRequest};
use amora_shared::types::api::ApiResponse;
use amora_shared::types::auth::AuthUser;
use amora_shared::types::pagination::{Paginated, PaginationParams};
use amora_shared::AppResult;

use super::{validate, RequestContext};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReportFilter {
    pub status: Option<ReportStatus>,
}

#[derive(Debug, Deserialize)]
pub struct AppealFilter {
    pub status: Option<AppealStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LiftSanctionRequest {
    #[validate(length(min = 1, max = 500, message = "reason must be 1-500 characters"))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewAppealRequest {
    pub approved: bool,
    #[validate(length(max = 2000, message = "notes must be at most 2000 characters"))]
    pub notes: Option<String>,
}

// --- Reports ---

pub async fn submit_report(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitReport>,
) -> AppResult<Json<ApiResponse<Report>>> {
    let report = reports::submit_report(&state.core, &cx, auth_user.id, req).await?;
    Ok(Json(ApiResponse::ok(report)))
}

pub async fn list_reports(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ReportFilter>,
    Query(page): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<Report>>>> {
    let list = reports::list_reports(&state.core, auth_user.id, filter.status, &page).await?;
    Ok(Json(ApiResponse::ok(list)))
}

pub async fn get_report(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Report>>> {
    let report = reports::get_report(&state.core, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(report)))
}

pub async fn review_report(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewReport>,
) -> AppResult<Json<ApiResponse<ReviewOutcome>>> {
    let outcome = reports::review_report(&state.core, &cx, auth_user.id, id, req).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

// --- Sanctions ---

pub async fn apply_sanction(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<SanctionRequest>,
) -> AppResult<Json<ApiResponse<AppliedSanction>>> {
    let applied = sanctions::apply_sanction(&state.core, &cx, auth_user.id, user_id, req).await?;
    Ok(Json(ApiResponse::ok(applied)))
}

pub async fn lift_sanction(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<LiftSanctionRequest>,
) -> AppResult<Json<ApiResponse<Sanction>>> {
    validate(&req)?;
    let lifted = sanctions::lift_sanction(&state.core, &cx, auth_user.id, id, &req.reason).await?;
    Ok(Json(ApiResponse::ok(lifted)))
}

pub async fn get_sanction(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Sanction>>> {
    let sanction = sanctions::get_sanction(&state.core, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(sanction)))
}

pub async fn list_sanctions(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<Sanction>>>> {
    let list = sanctions::list_sanctions(&state.core, auth_user.id, user_id).await?;
    Ok(Json(ApiResponse::ok(list)))
}

// --- Appeals ---

pub async fn submit_appeal(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitAppeal>,
) -> AppResult<Json<ApiResponse<Appeal>>> {
    let appeal = appeals::submit_appeal(&state.core, &cx, auth_user.id, req).await?;
    Ok(Json(ApiResponse::ok(appeal)))
}

pub async fn get_appeal(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Appeal>>> {
    let appeal = appeals::get_appeal(&state.core, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(appeal)))
}

pub async fn list_appeals(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AppealFilter>,
    Query(page): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<Appeal>>>> {
    let list = appeals::list_appeals(&state.core, auth_user.id, filter.status, &page).await?;
    Ok(Json(ApiResponse::ok(list)))
}

pub async fn review_appeal(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewAppealRequest>,
) -> AppResult<Json<ApiResponse<ReviewedAppeal>>> {
    validate(&req)?;
    let reviewed =
        appeals::review_appeal(&state.core, &cx, auth_user.id, id, req.approved, req.notes.as_deref()).await?;
    Ok(Json(ApiResponse::ok(reviewed)))
}
