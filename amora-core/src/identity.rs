//! Read-mostly projection of accounts and admin roles.
//!
//! Rows are created from auth events; moderation writes the ban, suspension
//! and reputation effects.

use uuid::Uuid;

use amora_shared::{AdminRole, AppError, AppResult, Capabilities, ErrorCode};

use crate::context::Core;
use crate::model::{User, UserStanding};
use crate::store::ReputationBounds;

pub fn reputation_bounds(core: &Core) -> ReputationBounds {
    let rules = &core.config.moderation.rules;
    ReputationBounds { min: rules.min_reputation, max: rules.max_reputation }
}

pub async fn get_user(core: &Core, id: Uuid) -> AppResult<UserStanding> {
    let user = core.require_user(id).await?;
    Ok(UserStanding {
        is_active: user.is_active,
        is_banned: user.is_banned,
        reputation: user.reputation,
    })
}

/// Create the projection row for a newly registered account. Replays are no-ops.
pub async fn upsert_user(core: &Core, id: Uuid) -> AppResult<User> {
    let initial = core.config.moderation.rules.initial_reputation;
    let user = core.store.upsert_user(User::new(id, initial, core.now())).await?;
    tracing::debug!(user_id = %id, "identity projection upserted");
    Ok(user)
}

/// Grant `role`. Capabilities default to the role's.
pub async fn grant_admin_role(
    core: &Core,
    id: Uuid,
    role: AdminRole,
    capabilities: Option<Capabilities>,
) -> AppResult<User> {
    set_admin_role(core, id, Some(role), capabilities).await
}

pub async fn revoke_admin_role(core: &Core, id: Uuid) -> AppResult<User> {
    set_admin_role(core, id, None, None).await
}

async fn set_admin_role(
    core: &Core,
    id: Uuid,
    role: Option<AdminRole>,
    capabilities: Option<Capabilities>,
) -> AppResult<User> {
    let caps = capabilities.unwrap_or_else(|| role.map(|r| r.default_capabilities()).unwrap_or_default());
    let user = core
        .store
        .set_admin_role(id, role, caps, core.now())
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, format!("user {id} not found")))?;
    tracing::info!(user_id = %id, role = ?role, "admin role updated");
    Ok(user)
}

pub async fn apply_ban(core: &Core, id: Uuid) -> AppResult<User> {
    core.store
        .apply_ban(id, core.now())
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, format!("user {id} not found")))
}

/// Clears the ban flag iff no other active ban sanction exists.
pub async fn lift_ban(core: &Core, id: Uuid) -> AppResult<User> {
    core.store
        .lift_ban(id, core.now())
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, format!("user {id} not found")))
}

pub async fn adjust_reputation(core: &Core, id: Uuid, delta: i32) -> AppResult<User> {
    core.store
        .adjust_reputation(id, delta, reputation_bounds(core), core.now())
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, format!("user {id} not found")))
}
