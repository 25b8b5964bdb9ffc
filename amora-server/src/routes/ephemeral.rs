use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use amora_core::ephemeral::{self, PhotoAccess, UploadPhoto, UploadedPhoto};
use amora_core::model::{EphemeralPhoto, PhotoView};
use amora_shared::types::api::ApiResponse;
use amora_shared::types::auth::AuthUser;
use amora_shared::AppResult;

use super::RequestContext;
use crate::AppState;

const MAX_USER_AGENT_LEN: usize = 512;

#[derive(Debug, Deserialize)]
pub struct CompleteViewRequest {
    pub duration_ms: i64,
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect())
}

pub async fn upload_photo(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadPhoto>,
) -> AppResult<Json<ApiResponse<UploadedPhoto>>> {
    let uploaded = ephemeral::upload_photo(&state.core, &cx, auth_user.id, req).await?;
    Ok(Json(ApiResponse::ok(uploaded)))
}

pub async fn view_photo(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(access_key): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<ApiResponse<PhotoAccess>>> {
    let access = ephemeral::view_photo(
        &state.core,
        &cx,
        &access_key,
        auth_user.id,
        client_ip(&headers),
        user_agent(&headers),
    )
    .await?;
    Ok(Json(ApiResponse::ok(access)))
}

pub async fn complete_view(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(view_id): Path<Uuid>,
    Json(req): Json<CompleteViewRequest>,
) -> AppResult<Json<ApiResponse<PhotoView>>> {
    let view = ephemeral::complete_view(&state.core, auth_user.id, view_id, req.duration_ms).await?;
    Ok(Json(ApiResponse::ok(view)))
}

pub async fn photo_status(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<EphemeralPhoto>>> {
    let photo = ephemeral::photo_status(&state.core, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(photo)))
}

pub async fn expire_photo(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<EphemeralPhoto>>> {
    let photo = ephemeral::expire_photo(&state.core, &cx, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(photo)))
}

pub async fn list_views(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<PhotoView>>>> {
    let views = ephemeral::list_photo_views(&state.core, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(views)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(client_ip(&headers).as_deref(), Some("198.51.100.4"));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn user_agent_is_truncated() {
        let mut headers = HeaderMap::new();
        let long = "a".repeat(MAX_USER_AGENT_LEN * 2);
        headers.insert(header::USER_AGENT, HeaderValue::from_str(&long).unwrap());
        assert_eq!(user_agent(&headers).map(|ua| ua.len()), Some(MAX_USER_AGENT_LEN));
    }
}
