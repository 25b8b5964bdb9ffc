use serde::{Deserialize, Serialize};
use uuid::Uuid;

use amora_shared::types::pagination::{Paginated, PaginationParams};
use amora_shared::{AppError, AppResult, ErrorCode};

use crate::context::{Core, OpContext, DAY, HOUR, MINUTE};
use crate::events;
use crate::idempotency;
use crate::identity::reputation_bounds;
use crate::model::{
    AdminAction, AppliedSanction, Capability, Report, ReportReason, ReportStatus, ReviewAction, SanctionSource,
    SYSTEM_PRINCIPAL,
};
use crate::store::ReportReview;

use super::sanctions::{self, SanctionRequest};
use super::{optional_text, required_text, rules};

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReport {
    pub reported_user_id: Uuid,
    pub reason: ReportReason,
    pub description: Option<String>,
    /// Opaque pointer to evidence: a message id, photo id or URL.
    pub content_ref: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewReport {
    pub action: ReviewAction,
    pub reason: String,
    pub notes: Option<String>,
    pub sanction: Option<SanctionRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub report: Report,
    pub sanction: Option<AppliedSanction>,
    /// Sanction the threshold rules applied after this resolution.
    pub automatic_sanction: Option<AppliedSanction>,
}

fn new_report(reporter: Uuid, req: SubmitReport, now: chrono::DateTime<chrono::Utc>) -> AppResult<Report> {
    Ok(Report {
        id: Uuid::now_v7(),
        reporter_id: reporter,
        reported_user_id: req.reported_user_id,
        reason: req.reason,
        description: optional_text("description", req.description.as_deref())?,
        content_ref: optional_text("content_ref", req.content_ref.as_deref())?,
        status: ReportStatus::Pending,
        reviewer_id: None,
        reviewed_at: None,
        resolution_notes: None,
        created_at: now,
        updated_at: now,
    })
}

pub async fn submit_report(core: &Core, cx: &OpContext, reporter: Uuid, req: SubmitReport) -> AppResult<Report> {
    if reporter == req.reported_user_id {
        return Err(AppError::new(ErrorCode::CannotReportSelf, "cannot report yourself"));
    }
    core.require_actor(reporter).await?;
    core.require_user(req.reported_user_id).await?;

    idempotency::run_once(core, cx, reporter, "submit_report", async {
        if core.store.has_open_report(reporter, req.reported_user_id).await? {
            return Err(AppError::new(ErrorCode::DuplicateReport, "an open report already exists for this user"));
        }
        let limits = &core.config.moderation.rate_limit;
        core.enforce_rate_limit(
            "reports",
            &reporter.to_string(),
            &[(limits.reports_per_minute, MINUTE), (limits.reports_per_hour, HOUR), (limits.reports_per_day, DAY)],
        )
        .await?;
        core.enforce_rate_limit(
            "reports_pair",
            &format!("{reporter}:{}", req.reported_user_id),
            &[(limits.reports_per_pair_per_day, DAY)],
        )
        .await?;

        let report = new_report(reporter, req, core.now())?;
        cx.checkpoint()?;
        let report = core.store.insert_report(report).await?;

        tracing::info!(
            report_id = %report.id,
            reporter_id = %reporter,
            reported_id = %report.reported_user_id,
            reason = %report.reason,
            "report submitted"
        );
        core.emit(events::report_submitted(&report)).await;
        Ok(report)
    })
    .await
}

/// Queue a report on behalf of the system principal, e.g. for content the
/// classifier flagged. An open system report on the same user absorbs it.
pub async fn file_automatic_report(
    core: &Core,
    reported: Uuid,
    reason: ReportReason,
    description: String,
    content_ref: Option<String>,
) -> AppResult<Option<Report>> {
    let req = SubmitReport { reported_user_id: reported, reason, description: Some(description), content_ref };
    let report = new_report(SYSTEM_PRINCIPAL, req, core.now())?;
    match core.store.insert_report(report).await {
        Ok(report) => {
            tracing::info!(report_id = %report.id, reported_id = %reported, "automatic report filed");
            core.emit(events::report_submitted(&report)).await;
            Ok(Some(report))
        }
        Err(e) if e.code() == ErrorCode::DuplicateReport => {
            tracing::debug!(reported_id = %reported, "open automatic report already queued");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Escalated reports are only visible to super admins.
pub async fn get_report(core: &Core, admin: Uuid, report_id: Uuid) -> AppResult<Report> {
    let reviewer = core.require_capability(admin, Capability::ManageReports).await?;
    core.store
        .get_report(report_id)
        .await?
        .filter(|r| r.status != ReportStatus::Escalated || reviewer.is_super_admin())
        .ok_or_else(|| AppError::new(ErrorCode::ReportNotFound, "report not found"))
}

pub async fn list_reports(
    core: &Core,
    admin: Uuid,
    status: Option<ReportStatus>,
    page: &PaginationParams,
) -> AppResult<Paginated<Report>> {
    let reviewer = core.require_capability(admin, Capability::ManageReports).await?;
    let (items, total) = core
        .store
        .list_reports(status, reviewer.is_super_admin(), page.offset() as i64, page.limit() as i64)
        .await?;
    Ok(Paginated::new(items, total, page))
}

pub async fn review_report(
    core: &Core,
    cx: &OpContext,
    reviewer_id: Uuid,
    report_id: Uuid,
    req: ReviewReport,
) -> AppResult<ReviewOutcome> {
    let reviewer = core.require_capability(reviewer_id, Capability::ManageReports).await?;
    if req.action == ReviewAction::Escalate {
        core.require_capability(reviewer_id, Capability::Escalate).await?;
    }
    if req.sanction.is_some() && req.action != ReviewAction::Resolve {
        return Err(AppError::invalid_argument("a sanction can only accompany a resolution"));
    }
    let reason = required_text("reason", &req.reason)?;
    let notes = optional_text("notes", req.notes.as_deref())?;

    let report = get_report(core, reviewer_id, report_id).await?;
    let target = report.reported_user_id;

    let sanction = match &req.sanction {
        Some(s) => {
            core.require_capability(reviewer_id, sanctions::required_capability(s.kind)).await?;
            Some(sanctions::build(core, target, reviewer_id, s, SanctionSource::Manual, Some(report.id))?)
        }
        None => None,
    };

    let (status, reputation_delta) = match req.action {
        ReviewAction::Resolve => (ReportStatus::Resolved, None),
        ReviewAction::Dismiss => (ReportStatus::Dismissed, Some(core.config.moderation.rules.dismiss_reputation_delta)),
        ReviewAction::Escalate => (ReportStatus::Escalated, None),
    };
    let annotation = match notes {
        Some(n) => format!("[{}] {reason}: {n}", req.action),
        None => format!("[{}] {reason}", req.action),
    };

    let now = core.now();
    let audit = AdminAction::new(
        reviewer_id,
        "review_report",
        Some(target),
        serde_json::json!({
            "report_id": report.id,
            "action": req.action,
            "reason": reason,
            "sanction": sanction.as_ref().map(|s| s.kind),
        }),
        now,
    );

    cx.checkpoint()?;
    let reviewed = core
        .store
        .review_report_atomic(ReportReview {
            report_id: report.id,
            reviewer_id,
            status,
            notes: Some(annotation),
            allow_escalated: reviewer.is_super_admin(),
            reputation_delta,
            sanction,
            audit,
            bounds: reputation_bounds(core),
            now,
        })
        .await?;

    tracing::info!(
        report_id = %report.id,
        reviewer_id = %reviewer_id,
        status = %reviewed.report.status,
        "report reviewed"
    );
    if req.action != ReviewAction::Escalate {
        core.emit(events::report_resolved(&reviewed.report)).await;
    }
    if let Some(applied) = &reviewed.applied {
        sanctions::publish_applied(core, applied).await;
    }

    let automatic_sanction = if req.action == ReviewAction::Resolve {
        rules::evaluate(core, target, report.id).await?
    } else {
        None
    };

    Ok(ReviewOutcome { report: reviewed.report, sanction: reviewed.applied, automatic_sanction })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::model::SanctionKind;
    use crate::testing::{harness, harness_with};
    use amora_shared::types::event::routing_keys;
    use amora_shared::{AdminRole, ErrorKind};

    fn harassment(reported: Uuid) -> SubmitReport {
        SubmitReport {
            reported_user_id: reported,
            reason: ReportReason::Harassment,
            description: Some("rude messages".into()),
            content_ref: None,
        }
    }

    fn review(action: ReviewAction) -> ReviewReport {
        ReviewReport { action, reason: "checked".into(), notes: None, sanction: None }
    }

    #[tokio::test]
    async fn self_reports_and_duplicates_are_refused() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let cx = OpContext::new();

        let err = submit_report(&h.core, &cx, a, harassment(a)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CannotReportSelf);

        submit_report(&h.core, &cx, a, harassment(b)).await.unwrap();
        h.advance(chrono::Duration::days(2));
        let err = submit_report(&h.core, &cx, a, harassment(b)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateReport);
    }

    #[tokio::test]
    async fn duplicate_report_leaves_rate_budget_untouched() {
        let mut cfg = CoreConfig::default();
        cfg.moderation.rate_limit.reports_per_minute = 2;
        let h = harness_with(cfg);
        let (a, b, c) = (h.user(1).await, h.user(2).await, h.user(3).await);
        let cx = OpContext::new();

        submit_report(&h.core, &cx, a, harassment(b)).await.unwrap();
        let err = submit_report(&h.core, &cx, a, harassment(b)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateReport);
        submit_report(&h.core, &cx, a, harassment(c)).await.unwrap();
    }

    #[tokio::test]
    async fn banned_reporters_are_forbidden() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        crate::identity::apply_ban(&h.core, a).await.unwrap();
        let err = submit_report(&h.core, &OpContext::new(), a, harassment(b)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn dismissal_restores_reputation() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let moderator = h.admin(50, AdminRole::Moderator).await;
        let report = submit_report(&h.core, &OpContext::new(), a, harassment(b)).await.unwrap();

        let out = review_report(&h.core, &OpContext::new(), moderator, report.id, review(ReviewAction::Dismiss))
            .await
            .unwrap();
        assert_eq!(out.report.status, ReportStatus::Dismissed);
        assert_eq!(h.core.require_user(b).await.unwrap().reputation, 105);
        assert_eq!(h.events.of(routing_keys::MODERATION_REPORT_RESOLVED)[0].event.recipients, vec![a]);

        let err = review_report(&h.core, &OpContext::new(), moderator, report.id, review(ReviewAction::Resolve))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReportAlreadyReviewed);
    }

    #[tokio::test]
    async fn escalation_is_for_super_admins_and_hides_the_report() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let moderator = h.admin(50, AdminRole::Moderator).await;
        let root = h.admin(51, AdminRole::SuperAdmin).await;
        let report = submit_report(&h.core, &OpContext::new(), a, harassment(b)).await.unwrap();

        let err = review_report(&h.core, &OpContext::new(), moderator, report.id, review(ReviewAction::Escalate))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingCapability);

        review_report(&h.core, &OpContext::new(), root, report.id, review(ReviewAction::Escalate)).await.unwrap();
        let page = PaginationParams::default();
        assert_eq!(list_reports(&h.core, moderator, None, &page).await.unwrap().total, 0);
        assert_eq!(list_reports(&h.core, root, None, &page).await.unwrap().total, 1);
        assert_eq!(get_report(&h.core, moderator, report.id).await.unwrap_err().code(), ErrorCode::ReportNotFound);

        let mut resolve = review(ReviewAction::Resolve);
        resolve.notes = Some("confirmed".into());
        let out = review_report(&h.core, &OpContext::new(), root, report.id, resolve).await.unwrap();
        let notes = out.report.resolution_notes.unwrap();
        assert!(notes.contains("[escalate]") && notes.contains("confirmed"));
    }

    #[tokio::test]
    async fn sanction_only_with_resolution() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let senior = h.admin(50, AdminRole::SeniorModerator).await;
        let report = submit_report(&h.core, &OpContext::new(), a, harassment(b)).await.unwrap();

        let mut req = review(ReviewAction::Dismiss);
        req.sanction = Some(SanctionRequest { kind: SanctionKind::Ban, reason: "x".into(), duration: None });
        let err = review_report(&h.core, &OpContext::new(), senior, report.id, req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn pair_budget_limits_repeat_reports() {
        let mut cfg = CoreConfig::default();
        cfg.moderation.rate_limit.reports_per_pair_per_day = 1;
        let h = harness_with(cfg);
        let (a, b) = (h.user(1).await, h.user(2).await);
        let moderator = h.admin(50, AdminRole::Moderator).await;

        let report = submit_report(&h.core, &OpContext::new(), a, harassment(b)).await.unwrap();
        review_report(&h.core, &OpContext::new(), moderator, report.id, review(ReviewAction::Dismiss))
            .await
            .unwrap();
        let err = submit_report(&h.core, &OpContext::new(), a, harassment(b)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RateLimited);
    }

    #[tokio::test]
    async fn idempotent_submit_replays() {
        let h = harness();
        let (a, b) = (h.user(1).await, h.user(2).await);
        let cx = OpContext::new().idempotent("r-1");
        let first = submit_report(&h.core, &cx, a, harassment(b)).await.unwrap();
        let again = submit_report(&h.core, &cx, a, harassment(b)).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(h.events.count(routing_keys::MODERATION_REPORT_SUBMITTED), 1);
    }
}
