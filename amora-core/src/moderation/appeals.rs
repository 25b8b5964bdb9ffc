use serde::Deserialize;
use uuid::Uuid;

use amora_shared::types::pagination::{Paginated, PaginationParams};
use amora_shared::{AppError, AppResult, ErrorCode};

use crate::context::{Core, OpContext, DAY, HOUR, MINUTE};
use crate::events;
use crate::idempotency;
use crate::model::{AdminAction, Appeal, AppealStatus, Capability, ReviewedAppeal};
use crate::store::AppealReview;

use super::{optional_text, required_text};

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAppeal {
    pub sanction_id: Uuid,
    pub reason: String,
    pub description: String,
}

/// Appeal a sanction targeting the caller. Banned and suspended accounts
/// may appeal; that is the point.
pub async fn submit_appeal(core: &Core, cx: &OpContext, appellant: Uuid, req: SubmitAppeal) -> AppResult<Appeal> {
    core.require_user(appellant).await?;
    let reason = required_text("reason", &req.reason)?;
    let description = required_text("description", &req.description)?;

    let sanction = core
        .store
        .get_sanction(req.sanction_id)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::SanctionNotFound, "sanction not found"))?;
    if sanction.target_user_id != appellant {
        return Err(AppError::forbidden("only the sanctioned user may appeal"));
    }
    if !sanction.is_active {
        return Err(AppError::new(ErrorCode::SanctionNotActive, "sanction is no longer active"));
    }

    idempotency::run_once(core, cx, appellant, "submit_appeal", async {
        let limits = &core.config.moderation.rate_limit;
        core.enforce_rate_limit(
            "appeals",
            &appellant.to_string(),
            &[(limits.appeals_per_minute, MINUTE), (limits.appeals_per_hour, HOUR), (limits.appeals_per_day, DAY)],
        )
        .await?;

        let appeal = Appeal {
            id: Uuid::now_v7(),
            appellant_id: appellant,
            sanction_id: sanction.id,
            reason,
            description,
            status: AppealStatus::Pending,
            reviewer_id: None,
            reviewed_at: None,
            review_notes: None,
            created_at: core.now(),
        };
        cx.checkpoint()?;
        let appeal = core.store.insert_appeal(appeal).await?;

        tracing::info!(
            appeal_id = %appeal.id,
            appellant_id = %appellant,
            sanction_id = %sanction.id,
            "appeal submitted"
        );
        core.emit(events::appeal_submitted(&appeal)).await;
        Ok(appeal)
    })
    .await
}

/// Approving lifts the sanction if it is still active. Matches deactivated
/// by the sanction stay inactive until rematched or reactivated.
pub async fn review_appeal(
    core: &Core,
    cx: &OpContext,
    reviewer: Uuid,
    appeal_id: Uuid,
    approved: bool,
    notes: Option<&str>,
) -> AppResult<ReviewedAppeal> {
    core.require_capability(reviewer, Capability::BanUsers).await?;
    let notes = optional_text("notes", notes)?;
    let appeal = core
        .store
        .get_appeal(appeal_id)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::AppealNotFound, "appeal not found"))?;

    let now = core.now();
    let audit = AdminAction::new(
        reviewer,
        "review_appeal",
        Some(appeal.appellant_id),
        serde_json::json!({ "appeal_id": appeal.id, "sanction_id": appeal.sanction_id, "approved": approved }),
        now,
    );

    cx.checkpoint()?;
    let reviewed = core
        .store
        .review_appeal_atomic(AppealReview { appeal_id: appeal.id, reviewer_id: reviewer, approved, notes, audit, now })
        .await?;

    tracing::info!(
        appeal_id = %appeal.id,
        reviewer_id = %reviewer,
        approved,
        lifted = reviewed.lifted.is_some(),
        "appeal reviewed"
    );
    core.emit(events::appeal_reviewed(&reviewed.appeal, approved)).await;
    if let Some(lifted) = &reviewed.lifted {
        core.emit(events::sanction_lifted(lifted)).await;
    }
    core.notify(
        reviewed.appeal.appellant_id,
        "appeal_reviewed",
        serde_json::json!({ "appeal_id": appeal.id, "approved": approved }),
    )
    .await;
    Ok(reviewed)
}

pub async fn get_appeal(core: &Core, requester: Uuid, appeal_id: Uuid) -> AppResult<Appeal> {
    let appeal = core
        .store
        .get_appeal(appeal_id)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::AppealNotFound, "appeal not found"))?;
    if appeal.appellant_id != requester {
        core.require_capability(requester, Capability::ManageReports)
            .await
            .map_err(|_| AppError::new(ErrorCode::AppealNotFound, "appeal not found"))?;
    }
    Ok(appeal)
}

pub async fn list_appeals(
    core: &Core,
    admin: Uuid,
    status: Option<AppealStatus>,
    page: &PaginationParams,
) -> AppResult<Paginated<Appeal>> {
    core.require_capability(admin, Capability::ManageReports).await?;
    let (items, total) = core.store.list_appeals(status, page.offset() as i64, page.limit() as i64).await?;
    Ok(Paginated::new(items, total, page))
}

/// Close pending appeals whose sanction expired or was lifted meanwhile.
pub async fn sweep_stale_appeals(core: &Core, limit: i64) -> AppResult<usize> {
    let closed = core.store.close_stale_appeals(core.now(), limit).await?;
    for appeal in &closed {
        tracing::info!(appeal_id = %appeal.id, sanction_id = %appeal.sanction_id, "stale appeal closed");
    }
    Ok(closed.len())
}
