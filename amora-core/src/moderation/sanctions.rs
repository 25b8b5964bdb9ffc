use serde::Deserialize;
use uuid::Uuid;

use amora_shared::{AppError, AppResult, ErrorCode};

use crate::context::{Core, OpContext};
use crate::duration::SanctionDuration;
use crate::events;
use crate::identity::reputation_bounds;
use crate::model::{
    AdminAction, AppliedSanction, Capability, MatchDeactivation, NewSanction, Sanction, SanctionKind, SanctionSource,
};

use super::required_text;

#[derive(Debug, Clone, Deserialize)]
pub struct SanctionRequest {
    pub kind: SanctionKind,
    pub reason: String,
    /// One of the duration tokens; permanent when absent. Ignored for warnings.
    pub duration: Option<String>,
}

/// The capability a sanction kind demands of its issuer.
pub fn required_capability(kind: SanctionKind) -> Capability {
    match kind {
        SanctionKind::Warn => Capability::ManageReports,
        SanctionKind::Suspend | SanctionKind::Ban => Capability::BanUsers,
    }
}

pub(crate) fn build(
    core: &Core,
    target: Uuid,
    issuer: Uuid,
    req: &SanctionRequest,
    source: SanctionSource,
    report_id: Option<Uuid>,
) -> AppResult<NewSanction> {
    let reason = required_text("reason", &req.reason)?;
    let (duration_token, expires_at, reputation_delta) = match req.kind {
        SanctionKind::Warn => (None, None, core.config.moderation.rules.warn_reputation_delta),
        SanctionKind::Suspend | SanctionKind::Ban => {
            let duration = SanctionDuration::parse_opt(req.duration.as_deref())?;
            (Some(duration.token()), duration.expires_at(core.now()), 0)
        }
    };
    Ok(NewSanction {
        target_user_id: target,
        issuer_id: issuer,
        kind: req.kind,
        reason,
        duration_token,
        expires_at,
        source,
        report_id,
        reputation_delta,
    })
}

/// Post-commit fan-out for a freshly applied sanction.
pub(crate) async fn publish_applied(core: &Core, applied: &AppliedSanction) {
    let s = &applied.sanction;
    metrics::counter!(
        "amora_sanctions_applied_total",
        "kind" => s.kind.as_str(),
        "source" => s.source.as_str()
    )
    .increment(1);
    tracing::info!(
        sanction_id = %s.id,
        target_user_id = %s.target_user_id,
        kind = %s.kind,
        source = %s.source,
        expires_at = ?s.expires_at,
        deactivated_matches = applied.deactivated_matches.len(),
        "sanction applied"
    );

    core.emit(events::sanction_applied(s)).await;
    for m in &applied.deactivated_matches {
        core.emit(events::match_deactivated(m, MatchDeactivation::Sanction)).await;
    }
    core.notify(
        s.target_user_id,
        "sanction_applied",
        serde_json::json!({ "sanction_id": s.id, "kind": s.kind, "expires_at": s.expires_at }),
    )
    .await;
}

async fn publish_lifted(core: &Core, sanction: &Sanction) {
    tracing::info!(
        sanction_id = %sanction.id,
        target_user_id = %sanction.target_user_id,
        lifted_by = ?sanction.lifted_by,
        "sanction lifted"
    );
    core.emit(events::sanction_lifted(sanction)).await;
    core.notify(sanction.target_user_id, "sanction_lifted", serde_json::json!({ "sanction_id": sanction.id }))
        .await;
}

/// Direct sanction by an administrator, outside any report.
pub async fn apply_sanction(
    core: &Core,
    cx: &OpContext,
    issuer: Uuid,
    target: Uuid,
    req: SanctionRequest,
) -> AppResult<AppliedSanction> {
    if issuer == target {
        return Err(AppError::invalid_argument("cannot sanction yourself"));
    }
    core.require_capability(issuer, required_capability(req.kind)).await?;
    core.require_user(target).await?;

    let new = build(core, target, issuer, &req, SanctionSource::Manual, None)?;
    let audit = AdminAction::new(
        issuer,
        "apply_sanction",
        Some(target),
        serde_json::json!({ "kind": new.kind, "reason": new.reason, "duration": new.duration_token }),
        core.now(),
    );

    cx.checkpoint()?;
    let applied = core
        .store
        .apply_sanction_atomic(new, Some(audit), reputation_bounds(core), core.now())
        .await?;
    publish_applied(core, &applied).await;
    Ok(applied)
}

pub async fn lift_sanction(
    core: &Core,
    cx: &OpContext,
    admin: Uuid,
    sanction_id: Uuid,
    reason: &str,
) -> AppResult<Sanction> {
    core.require_capability(admin, Capability::BanUsers).await?;
    let reason = required_text("reason", reason)?;
    let sanction = core
        .store
        .get_sanction(sanction_id)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::SanctionNotFound, "sanction not found"))?;

    let audit = AdminAction::new(
        admin,
        "lift_sanction",
        Some(sanction.target_user_id),
        serde_json::json!({ "sanction_id": sanction.id, "kind": sanction.kind, "reason": reason }),
        core.now(),
    );
    cx.checkpoint()?;
    let lifted = core.store.lift_sanction_atomic(sanction.id, Some(admin), Some(audit), core.now()).await?;
    publish_lifted(core, &lifted).await;
    Ok(lifted)
}

pub async fn get_sanction(core: &Core, requester: Uuid, sanction_id: Uuid) -> AppResult<Sanction> {
    let sanction = core
        .store
        .get_sanction(sanction_id)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::SanctionNotFound, "sanction not found"))?;
    if sanction.target_user_id != requester {
        core.require_capability(requester, Capability::ManageReports)
            .await
            .map_err(|_| AppError::new(ErrorCode::SanctionNotFound, "sanction not found"))?;
    }
    Ok(sanction)
}

/// Sanction history of `user`, newest first. Users see their own.
pub async fn list_sanctions(core: &Core, requester: Uuid, user: Uuid) -> AppResult<Vec<Sanction>> {
    if requester != user {
        core.require_capability(requester, Capability::ManageReports).await?;
    }
    core.store.list_sanctions(user).await
}

/// Lift finite sanctions past their expiry. Returns how many were lifted.
pub async fn sweep_expired_sanctions(core: &Core, limit: i64) -> AppResult<usize> {
    let due = core.store.expired_sanctions(core.now(), limit).await?;
    let mut lifted = 0;
    for sanction in due {
        match core.store.lift_sanction_atomic(sanction.id, None, None, core.now()).await {
            Ok(s) => {
                lifted += 1;
                publish_lifted(core, &s).await;
            }
            Err(e) if e.code() == ErrorCode::SanctionNotActive => {}
            Err(e) => {
                tracing::warn!(error = %e, sanction_id = %sanction.id, "failed to lift expired sanction");
            }
        }
    }
    Ok(lifted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SwipeDirection;
    use crate::swipes;
    use crate::testing::harness;
    use amora_shared::types::event::routing_keys;
    use amora_shared::AdminRole;

    fn ban(duration: Option<&str>) -> SanctionRequest {
        SanctionRequest { kind: SanctionKind::Ban, reason: "harassment".into(), duration: duration.map(Into::into) }
    }

    #[tokio::test]
    async fn moderators_cannot_ban() {
        let h = harness();
        let target = h.user(1).await;
        let moderator = h.admin(50, AdminRole::Moderator).await;
        let err = apply_sanction(&h.core, &OpContext::new(), moderator, target, ban(None)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingCapability);

        let warn = SanctionRequest { kind: SanctionKind::Warn, reason: "tone".into(), duration: None };
        apply_sanction(&h.core, &OpContext::new(), moderator, target, warn).await.unwrap();
        let user = h.core.require_user(target).await.unwrap();
        assert_eq!(user.reputation, 90);
        assert!(user.is_active);
    }

    #[tokio::test]
    async fn unknown_duration_token_is_invalid() {
        let h = harness();
        let target = h.user(1).await;
        let senior = h.admin(50, AdminRole::SeniorModerator).await;
        let err = apply_sanction(&h.core, &OpContext::new(), senior, target, ban(Some("2w"))).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidDurationToken);
    }

    #[tokio::test]
    async fn ban_deactivates_matches_and_second_ban_conflicts() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let senior = h.admin(50, AdminRole::SeniorModerator).await;
        let cx = OpContext::new();
        swipes::record_swipe(&h.core, &cx, a, b, SwipeDirection::Like).await.unwrap();
        swipes::record_swipe(&h.core, &cx, b, a, SwipeDirection::Like).await.unwrap();

        let applied = apply_sanction(&h.core, &cx, senior, b, ban(Some("permanent"))).await.unwrap();
        assert_eq!(applied.sanction.expires_at, None);
        assert_eq!(applied.deactivated_matches.len(), 1);
        assert!(h.core.require_user(b).await.unwrap().is_banned);
        assert_eq!(h.events.count(routing_keys::MODERATION_SANCTION_APPLIED), 1);
        assert_eq!(h.events.count(routing_keys::MATCHING_MATCH_DEACTIVATED), 1);

        let err = apply_sanction(&h.core, &cx, senior, b, ban(None)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SanctionAlreadyActive);
        assert_eq!(h.core.store.list_admin_actions(b).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn permanent_sanctions_never_lift_by_time() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let senior = h.admin(50, AdminRole::SeniorModerator).await;
        apply_sanction(&h.core, &OpContext::new(), senior, a, ban(None)).await.unwrap();
        let suspend =
            SanctionRequest { kind: SanctionKind::Suspend, reason: "cool off".into(), duration: Some("24h".into()) };
        apply_sanction(&h.core, &OpContext::new(), senior, b, suspend).await.unwrap();

        h.advance(chrono::Duration::days(400));
        assert_eq!(sweep_expired_sanctions(&h.core, 100).await.unwrap(), 1);
        assert!(h.core.require_user(a).await.unwrap().is_banned);
        let b_user = h.core.require_user(b).await.unwrap();
        assert!(!b_user.is_suspended && b_user.is_active);
    }

    #[tokio::test]
    async fn lifting_requires_ban_capability_and_active_sanction() {
        let h = harness();
        let target = h.user(1).await;
        let senior = h.admin(50, AdminRole::SeniorModerator).await;
        let moderator = h.admin(51, AdminRole::Moderator).await;
        let applied = apply_sanction(&h.core, &OpContext::new(), senior, target, ban(Some("7d"))).await.unwrap();
        let id = applied.sanction.id;

        let err = lift_sanction(&h.core, &OpContext::new(), moderator, id, "mistake").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingCapability);

        let lifted = lift_sanction(&h.core, &OpContext::new(), senior, id, "mistake").await.unwrap();
        assert_eq!(lifted.lifted_by, Some(senior));
        assert!(!h.core.require_user(target).await.unwrap().is_banned);

        let err = lift_sanction(&h.core, &OpContext::new(), senior, id, "again").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SanctionNotActive);
    }

    #[tokio::test]
    async fn users_see_only_their_own_history() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let senior = h.admin(50, AdminRole::SeniorModerator).await;
        apply_sanction(&h.core, &OpContext::new(), senior, a, ban(Some("1h"))).await.unwrap();

        assert_eq!(list_sanctions(&h.core, a, a).await.unwrap().len(), 1);
        assert_eq!(list_sanctions(&h.core, b, a).await.unwrap_err().code(), ErrorCode::MissingCapability);
        assert_eq!(list_sanctions(&h.core, senior, a).await.unwrap().len(), 1);
    }
}
