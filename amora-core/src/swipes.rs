//! Swipe ingestion and match lifecycle.
//!
//! Match detection runs inside the store's atomic swipe unit. Only the unit
//! that inserts the match row reports `match_created`, so `MatchCreated` is
//! published at most once per pair however the two swipes interleave.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use amora_shared::{AppError, AppResult, ErrorCode};

use crate::blocks;
use crate::context::{Core, OpContext, DAY, HOUR, MINUTE};
use crate::events;
use crate::idempotency;
use crate::model::{AdminAction, Capability, Match, MatchDeactivation, Swipe, SwipeDirection};
use crate::store::RematchOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwipeOutcome {
    pub swipe_id: Uuid,
    #[serde(rename = "match")]
    pub matched: Option<Match>,
}

pub async fn record_swipe(
    core: &Core,
    cx: &OpContext,
    swiper: Uuid,
    swiped: Uuid,
    direction: SwipeDirection,
) -> AppResult<SwipeOutcome> {
    if swiper == swiped {
        return Err(AppError::new(ErrorCode::CannotSwipeSelf, "cannot swipe on yourself"));
    }
    core.require_actor(swiper).await?;
    let target = core.require_user(swiped).await?;
    if !target.is_available() {
        return Err(AppError::forbidden("target account is not available"));
    }
    if blocks::is_blocked_either(core, swiper, swiped).await? {
        return Err(AppError::new(ErrorCode::Blocked, "a block exists between these users"));
    }

    idempotency::run_once(core, cx, swiper, "record_swipe", async {
        // Duplicates are refused before they spend rate budget.
        if core.store.find_swipe(swiper, swiped).await?.is_some() {
            return Err(AppError::new(ErrorCode::AlreadySwiped, "already swiped on this user"));
        }
        let limits = &core.config.matching.rate_limit;
        core.enforce_rate_limit(
            "swipes",
            &swiper.to_string(),
            &[(limits.swipes_per_minute, MINUTE), (limits.swipes_per_hour, HOUR), (limits.swipes_per_day, DAY)],
        )
        .await?;

        let now = core.now();
        let swipe = Swipe {
            id: Uuid::now_v7(),
            swiper_id: swiper,
            swiped_id: swiped,
            direction,
            created_at: now,
        };

        cx.checkpoint()?;
        let record = core.store.record_swipe_atomic(swipe, now).await?;
        metrics::counter!("amora_swipes_total", "direction" => direction.as_str()).increment(1);

        match (&record.matched, record.match_created) {
            (Some(m), true) => {
                tracing::info!(match_id = %m.id, user1_id = %m.user1_id, user2_id = %m.user2_id, "match created");
                metrics::counter!("amora_matches_created_total").increment(1);
                core.emit(events::match_created(m)).await;
                for user in m.participants() {
                    core.notify(user, "match_created", serde_json::json!({ "match_id": m.id, "with": m.other(user) }))
                        .await;
                }
            }
            (Some(m), false) => {
                tracing::debug!(match_id = %m.id, "reciprocal like joined an existing match");
            }
            (None, _) if direction.is_like() => {
                core.emit(events::swipe_recorded(&record.swipe)).await;
            }
            (None, _) => {}
        }

        Ok(SwipeOutcome { swipe_id: record.swipe.id, matched: record.matched })
    })
    .await
}

async fn load_match(core: &Core, id: Uuid) -> AppResult<Match> {
    core.store
        .get_match(id)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::MatchNotFound, "match not found"))
}

pub async fn get_match(core: &Core, user: Uuid, match_id: Uuid) -> AppResult<Match> {
    let m = load_match(core, match_id).await?;
    m.ensure_participant(user)?;
    Ok(m)
}

/// Lookup by unordered pair; argument order is irrelevant.
pub async fn find_match(core: &Core, a: Uuid, b: Uuid) -> AppResult<Option<Match>> {
    core.store.find_match(a, b).await
}

pub async fn list_matches(core: &Core, user: Uuid, active_only: bool) -> AppResult<Vec<Match>> {
    core.store.list_matches(user, active_only).await
}

async fn deactivate(core: &Core, m: &Match, reason: MatchDeactivation) -> AppResult<Match> {
    let updated = core
        .store
        .deactivate_match(m.id, reason, core.now())
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::MatchInactive, "match is already inactive"))?;

    tracing::info!(match_id = %m.id, reason = %reason, "match deactivated");
    core.emit(events::match_deactivated(&updated, reason)).await;
    Ok(updated)
}

/// Participant-initiated deactivation.
pub async fn unmatch(core: &Core, cx: &OpContext, user: Uuid, match_id: Uuid) -> AppResult<Match> {
    let m = get_match(core, user, match_id).await?;
    cx.checkpoint()?;
    deactivate(core, &m, MatchDeactivation::Unmatched).await
}

pub async fn deactivate_match(
    core: &Core,
    cx: &OpContext,
    admin: Uuid,
    match_id: Uuid,
    reason: &str,
) -> AppResult<Match> {
    core.require_capability(admin, Capability::ManageReports).await?;
    let m = load_match(core, match_id).await?;
    cx.checkpoint()?;
    let updated = deactivate(core, &m, MatchDeactivation::Moderation).await?;
    record_admin_action(core, admin, "deactivate_match", &updated, reason).await;
    Ok(updated)
}

/// Moderator reactivation. Refused unless both parties are available and unblocked.
pub async fn reactivate_match(
    core: &Core,
    cx: &OpContext,
    admin: Uuid,
    match_id: Uuid,
    reason: &str,
) -> AppResult<Match> {
    core.require_capability(admin, Capability::ManageReports).await?;
    cx.checkpoint()?;
    let (m, reactivated) = core.store.reactivate_match_atomic(match_id, core.now()).await?;
    if !reactivated {
        return Err(AppError::forbidden("both participants must be active, unbanned and unblocked"));
    }

    tracing::info!(match_id = %m.id, admin_id = %admin, "match reactivated by moderation");
    record_admin_action(core, admin, "reactivate_match", &m, reason).await;
    core.emit(events::match_reactivated(&m)).await;
    Ok(m)
}

/// The re-match path for matches a sanction deactivated: the match comes
/// back once both participants asked and the pair is eligible.
pub async fn request_rematch(core: &Core, cx: &OpContext, user: Uuid, match_id: Uuid) -> AppResult<Match> {
    core.require_actor(user).await?;
    cx.checkpoint()?;
    match core.store.request_rematch_atomic(match_id, user, core.now()).await? {
        RematchOutcome::Recorded(m) => {
            tracing::debug!(match_id = %m.id, user_id = %user, "rematch requested");
            core.notify(m.other(user), "rematch_requested", serde_json::json!({ "match_id": m.id })).await;
            Ok(m)
        }
        RematchOutcome::Reactivated(m) => {
            tracing::info!(match_id = %m.id, "match reactivated by mutual rematch");
            core.emit(events::match_reactivated(&m)).await;
            Ok(m)
        }
    }
}

async fn record_admin_action(core: &Core, admin: Uuid, action: &str, m: &Match, reason: &str) {
    let audit = AdminAction::new(
        admin,
        action,
        Some(m.user1_id),
        serde_json::json!({ "match_id": m.id, "user2_id": m.user2_id, "reason": reason }),
        core.now(),
    );
    if let Err(e) = core.store.insert_admin_action(audit).await {
        tracing::error!(error = %e, match_id = %m.id, action, "failed to write admin audit row");
    }
}

/// Repair pairs whose reciprocal likes never produced a match row.
/// Repairs are logged and do not publish `MatchCreated`.
pub async fn reconcile_matches(core: &Core, limit: i64) -> AppResult<usize> {
    let orphans = core.store.find_orphan_reciprocal_likes(limit).await?;
    let mut repaired = 0;
    for (a, b) in orphans {
        let (m, created) = core.store.insert_match_if_absent(a, b, core.now()).await?;
        if created {
            repaired += 1;
            tracing::warn!(match_id = %m.id, user1_id = %m.user1_id, user2_id = %m.user2_id, "repaired missing match");
        }
    }
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::harness;
    use amora_shared::types::event::routing_keys;
    use amora_shared::AdminRole;

    #[tokio::test]
    async fn self_swipe_is_rejected() {
        let h = harness();
        let a = h.user(1).await;
        let err = record_swipe(&h.core, &OpContext::new(), a, a, SwipeDirection::Like).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CannotSwipeSelf);
    }

    #[tokio::test]
    async fn unknown_target_is_not_found() {
        let h = harness();
        let a = h.user(1).await;
        let err = record_swipe(&h.core, &OpContext::new(), a, Uuid::from_u128(77), SwipeDirection::Like)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), amora_shared::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn banned_swiper_is_forbidden() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        crate::identity::apply_ban(&h.core, a).await.unwrap();
        let err = record_swipe(&h.core, &OpContext::new(), a, b, SwipeDirection::Like).await.unwrap_err();
        assert_eq!(err.kind(), amora_shared::ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn reswipe_leaves_rate_budget_untouched() {
        let mut cfg = crate::config::CoreConfig::default();
        cfg.matching.rate_limit.swipes_per_minute = 2;
        let h = crate::testing::harness_with(cfg);
        let (a, b, c) = (h.user(1).await, h.user(2).await, h.user(3).await);

        record_swipe(&h.core, &OpContext::new(), a, b, SwipeDirection::Like).await.unwrap();
        let err = record_swipe(&h.core, &OpContext::new(), a, b, SwipeDirection::Like).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadySwiped);
        record_swipe(&h.core, &OpContext::new(), a, c, SwipeDirection::Pass).await.unwrap();
    }

    #[tokio::test]
    async fn reswipe_has_no_side_effects() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        record_swipe(&h.core, &OpContext::new(), a, b, SwipeDirection::Like).await.unwrap();
        let events_before = h.events.all().len();

        let err = record_swipe(&h.core, &OpContext::new(), a, b, SwipeDirection::Like).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadySwiped);
        assert_eq!(h.events.all().len(), events_before);
    }

    #[tokio::test]
    async fn super_like_reciprocates_like() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        record_swipe(&h.core, &OpContext::new(), a, b, SwipeDirection::SuperLike).await.unwrap();
        let out = record_swipe(&h.core, &OpContext::new(), b, a, SwipeDirection::Like).await.unwrap();
        assert!(out.matched.is_some());
        assert_eq!(h.events.count(routing_keys::MATCHING_MATCH_CREATED), 1);
        assert_eq!(h.notifier.sent_to(a).len(), 1);
    }

    #[tokio::test]
    async fn idempotent_replay_returns_first_result() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let cx = OpContext::new().idempotent("swipe-1");
        let first = record_swipe(&h.core, &cx, a, b, SwipeDirection::Like).await.unwrap();
        let replay = record_swipe(&h.core, &cx, a, b, SwipeDirection::Like).await.unwrap();
        assert_eq!(first.swipe_id, replay.swipe_id);
    }

    #[tokio::test]
    async fn cancelled_before_commit_writes_nothing() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let cx = OpContext::new();
        cx.cancel.cancel();
        let err = record_swipe(&h.core, &cx, a, b, SwipeDirection::Like).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RequestCancelled);
        assert!(crate::store::SwipeStore::find_swipe(&*h.store, a, b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn swipe_budget_is_enforced() {
        let mut cfg = crate::CoreConfig::default();
        cfg.matching.rate_limit.swipes_per_minute = 2;
        let h = crate::testing::harness_with(cfg);
        let a = h.user(1).await;
        for n in 2..4 {
            let b = h.user(n).await;
            record_swipe(&h.core, &OpContext::new(), a, b, SwipeDirection::Pass).await.unwrap();
        }
        let c = h.user(9).await;
        let err = record_swipe(&h.core, &OpContext::new(), a, c, SwipeDirection::Pass).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RateLimited);
        assert!(err.retry_after_secs().is_some());
    }

    #[tokio::test]
    async fn unmatch_by_participant_only() {
        let h = harness();
        let (a, b, c) = (h.user(1).await, h.user(2).await, h.user(3).await);
        record_swipe(&h.core, &OpContext::new(), a, b, SwipeDirection::Like).await.unwrap();
        let m = record_swipe(&h.core, &OpContext::new(), b, a, SwipeDirection::Like)
            .await
            .unwrap()
            .matched
            .unwrap();

        let err = unmatch(&h.core, &OpContext::new(), c, m.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotMatchParticipant);

        let m = unmatch(&h.core, &OpContext::new(), a, m.id).await.unwrap();
        assert!(!m.is_active);
        assert_eq!(m.deactivation_reason, Some(MatchDeactivation::Unmatched));

        let err = request_rematch(&h.core, &OpContext::new(), b, m.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MatchInactive);
    }

    #[tokio::test]
    async fn moderator_reactivation_requires_unblocked_pair() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let admin = h.admin(50, AdminRole::Moderator).await;
        let (m, _) = h.core.store.insert_match_if_absent(a, b, h.core.now()).await.unwrap();
        let cx = OpContext::new();

        deactivate_match(&h.core, &cx, admin, m.id, "investigation").await.unwrap();
        blocks::block(&h.core, &cx, a, b, None).await.unwrap();
        let err = reactivate_match(&h.core, &cx, admin, m.id, "cleared").await.unwrap_err();
        assert_eq!(err.kind(), amora_shared::ErrorKind::Forbidden);

        blocks::unblock(&h.core, &cx, a, b).await.unwrap();
        let m = reactivate_match(&h.core, &cx, admin, m.id, "cleared").await.unwrap();
        assert!(m.is_active);
        assert_eq!(h.events.count(routing_keys::MATCHING_MATCH_REACTIVATED), 1);
        assert_eq!(h.core.store.list_admin_actions(a).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reconciliation_repairs_silently() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        record_swipe(&h.core, &OpContext::new(), a, b, SwipeDirection::Like).await.unwrap();
        record_swipe(&h.core, &OpContext::new(), b, a, SwipeDirection::Like).await.unwrap();
        h.store.remove_match(a, b);
        h.events.clear();

        assert_eq!(reconcile_matches(&h.core, 10).await.unwrap(), 1);
        assert!(find_match(&h.core, b, a).await.unwrap().is_some());
        assert_eq!(h.events.count(routing_keys::MATCHING_MATCH_CREATED), 0);
        assert_eq!(reconcile_matches(&h.core, 10).await.unwrap(), 0);
    }
}
