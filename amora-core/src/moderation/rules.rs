//! Threshold rules run after a report is resolved.
//!
//! Counts distinct reporters whose reports against the target were resolved
//! inside the rolling window. A threshold of `0` disables its rule.

use uuid::Uuid;

use amora_shared::{AppResult, ErrorCode};

use crate::context::Core;
use crate::identity::reputation_bounds;
use crate::model::{AppliedSanction, SanctionKind, SanctionSource, SYSTEM_PRINCIPAL};

use super::sanctions::{self, SanctionRequest};

/// Sanction the rules call for given `reporters` distinct resolved reporters.
pub fn decide(core: &Core, reporters: u64) -> Option<SanctionRequest> {
    let rules = &core.config.moderation.rules;
    let reached = |threshold: u32| threshold > 0 && reporters >= u64::from(threshold);

    if reached(rules.auto_ban_threshold) {
        Some(SanctionRequest {
            kind: SanctionKind::Ban,
            reason: format!("{reporters} upheld reports"),
            duration: None,
        })
    } else if reached(rules.auto_suspend_threshold) {
        Some(SanctionRequest {
            kind: SanctionKind::Suspend,
            reason: format!("{reporters} upheld reports"),
            duration: Some(rules.auto_suspend_duration.clone()),
        })
    } else {
        None
    }
}

pub async fn evaluate(core: &Core, target: Uuid, report_id: Uuid) -> AppResult<Option<AppliedSanction>> {
    let window = chrono::Duration::seconds(core.config.moderation.rules.window as i64);
    let reporters = core.store.count_resolved_reporters(target, core.now() - window).await?;
    let Some(req) = decide(core, reporters) else {
        return Ok(None);
    };

    // One automatic sanction at a time: a later threshold waits for the
    // previous rule-issued sanction to end.
    let history = core.store.list_sanctions(target).await?;
    let latest_automatic = history
        .iter()
        .filter(|s| s.source == SanctionSource::Automatic)
        .max_by_key(|s| s.created_at);
    let banned = history.iter().any(|s| s.is_active && s.kind == SanctionKind::Ban);
    if banned || latest_automatic.is_some_and(|s| s.is_active) {
        tracing::debug!(target_user_id = %target, kind = %req.kind, "threshold reached but sanction already active");
        return Ok(None);
    }

    let new = sanctions::build(core, target, SYSTEM_PRINCIPAL, &req, SanctionSource::Automatic, Some(report_id))?;
    match core.store.apply_sanction_atomic(new, None, reputation_bounds(core), core.now()).await {
        Ok(applied) => {
            tracing::warn!(target_user_id = %target, reporters, kind = %req.kind, "automatic sanction applied");
            sanctions::publish_applied(core, &applied).await;
            Ok(Some(applied))
        }
        Err(e) if e.code() == ErrorCode::SanctionAlreadyActive => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::context::OpContext;
    use crate::moderation::reports::{self, ReviewReport, SubmitReport};
    use crate::model::{ReportReason, ReviewAction};
    use crate::testing::{harness, harness_with, Harness};
    use amora_shared::AdminRole;

    async fn upheld(h: &Harness, reporter: Uuid, target: Uuid, moderator: Uuid) -> reports::ReviewOutcome {
        let report = reports::submit_report(
            &h.core,
            &OpContext::new(),
            reporter,
            SubmitReport { reported_user_id: target, reason: ReportReason::Spam, description: None, content_ref: None },
        )
        .await
        .unwrap();
        reports::review_report(
            &h.core,
            &OpContext::new(),
            moderator,
            report.id,
            ReviewReport {
                action: ReviewAction::Resolve,
                reason: "spam confirmed".into(),
                notes: None,
                sanction: None,
            },
        )
        .await
        .unwrap()
    }

    #[test]
    fn ban_threshold_wins_over_suspension() {
        let h = harness();
        assert!(decide(&h.core, 2).is_none());
        assert_eq!(decide(&h.core, 3).map(|r| r.kind), Some(SanctionKind::Suspend));
        assert_eq!(decide(&h.core, 5).map(|r| r.kind), Some(SanctionKind::Ban));
    }

    #[test]
    fn zero_threshold_disables_rule() {
        let mut cfg = CoreConfig::default();
        cfg.moderation.rules.auto_suspend_threshold = 0;
        cfg.moderation.rules.auto_ban_threshold = 0;
        let h = harness_with(cfg);
        assert!(decide(&h.core, 100).is_none());
    }

    #[tokio::test]
    async fn third_distinct_reporter_suspends() {
        let h = harness();
        let target = h.user(1).await;
        let moderator = h.admin(50, AdminRole::Moderator).await;

        for n in 2..=3 {
            let reporter = h.user(n).await;
            assert!(upheld(&h, reporter, target, moderator).await.automatic_sanction.is_none());
        }
        let reporter = h.user(4).await;
        let out = upheld(&h, reporter, target, moderator).await;
        let applied = out.automatic_sanction.unwrap();
        assert_eq!(applied.sanction.kind, SanctionKind::Suspend);
        assert_eq!(applied.sanction.source, SanctionSource::Automatic);
        assert_eq!(applied.sanction.issuer_id, SYSTEM_PRINCIPAL);
        assert_eq!(applied.sanction.report_id, Some(out.report.id));
        assert!(h.core.require_user(target).await.unwrap().is_suspended);
    }

    #[tokio::test]
    async fn active_automatic_suspension_absorbs_later_thresholds() {
        let h = harness();
        let target = h.user(1).await;
        let moderator = h.admin(50, AdminRole::Moderator).await;

        let mut issued = Vec::new();
        for n in 2..=6 {
            let reporter = h.user(n).await;
            if let Some(applied) = upheld(&h, reporter, target, moderator).await.automatic_sanction {
                issued.push(applied.sanction);
            }
        }
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].kind, SanctionKind::Suspend);
        let active = h.core.store.active_sanctions(target).await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(!h.core.require_user(target).await.unwrap().is_banned);

        h.core.store.lift_sanction_atomic(issued[0].id, None, None, h.core.now()).await.unwrap();
        let reporter = h.user(7).await;
        let applied = upheld(&h, reporter, target, moderator).await.automatic_sanction.unwrap();
        assert_eq!(applied.sanction.kind, SanctionKind::Ban);
    }

    #[tokio::test]
    async fn reports_outside_window_do_not_count() {
        let mut cfg = CoreConfig::default();
        cfg.moderation.rules.auto_suspend_threshold = 2;
        let h = harness_with(cfg);
        let target = h.user(1).await;
        let moderator = h.admin(50, AdminRole::Moderator).await;

        let first = h.user(2).await;
        upheld(&h, first, target, moderator).await;
        h.advance(chrono::Duration::days(31));
        let second = h.user(3).await;
        assert!(upheld(&h, second, target, moderator).await.automatic_sanction.is_none());
    }
}
