use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use amora_core::identity;
use amora_core::model::{User, UserStanding};
use amora_shared::types::api::ApiResponse;
use amora_shared::types::auth::{AdminRole, AuthUser, Capabilities};
use amora_shared::{AppError, AppResult};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GrantRoleRequest {
    pub role: AdminRole,
    pub capabilities: Option<Capabilities>,
}

pub async fn get_standing(
    _auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<UserStanding>>> {
    let standing = identity::get_user(&state.core, id).await?;
    Ok(Json(ApiResponse::ok(standing)))
}

async fn require_super_admin(state: &AppState, caller: Uuid) -> AppResult<()> {
    let user = state.core.require_user(caller).await?;
    if user.is_banned || !user.is_super_admin() {
        return Err(AppError::forbidden("only super admins manage roles"));
    }
    Ok(())
}

pub async fn grant_role(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<GrantRoleRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    require_super_admin(&state, auth_user.id).await?;
    let user = identity::grant_admin_role(&state.core, id, req.role, req.capabilities).await?;
    tracing::info!(admin_id = %auth_user.id, user_id = %id, role = %req.role, "admin role granted");
    Ok(Json(ApiResponse::ok(user)))
}

pub async fn revoke_role(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<User>>> {
    require_super_admin(&state, auth_user.id).await?;
    let user = identity::revoke_admin_role(&state.core, id).await?;
    tracing::info!(admin_id = %auth_user.id, user_id = %id, "admin role revoked");
    Ok(Json(ApiResponse::ok(user)))
}
