//! Storage seams. Each component owns one trait; compound methods suffixed
//! `_atomic` run as a single transaction in every implementation.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use amora_shared::{AdminRole, AppResult, Capabilities};

use crate::model::*;
use crate::ports::PhotoCatalog;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReputationBounds {
    pub min: i32,
    pub max: i32,
}

impl ReputationBounds {
    pub fn clamp(&self, value: i64) -> i32 {
        value.clamp(self.min as i64, self.max as i64) as i32
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>>;
    /// Insert the projection row if absent; returns the stored row either way.
    async fn upsert_user(&self, user: User) -> AppResult<User>;
    async fn set_admin_role(
        &self,
        id: Uuid,
        role: Option<AdminRole>,
        capabilities: Capabilities,
        now: DateTime<Utc>,
    ) -> AppResult<Option<User>>;
    async fn apply_ban(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<User>>;
    /// Clears the ban flag iff no active ban sanction remains.
    async fn lift_ban(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<User>>;
    async fn adjust_reputation(
        &self,
        id: Uuid,
        delta: i32,
        bounds: ReputationBounds,
        now: DateTime<Utc>,
    ) -> AppResult<Option<User>>;
}

#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Fails `AlreadyBlocked` when the edge exists.
    async fn insert_block(&self, block: Block) -> AppResult<Block>;
    async fn delete_block(&self, blocker: Uuid, blocked: Uuid) -> AppResult<bool>;
    async fn find_block(&self, blocker: Uuid, blocked: Uuid) -> AppResult<Option<Block>>;
    async fn list_blocks_by(&self, blocker: Uuid) -> AppResult<Vec<Block>>;
    /// Ids `user` has blocked.
    async fn blocking_ids(&self, user: Uuid) -> AppResult<Vec<Uuid>>;
    /// Ids that have blocked `user`.
    async fn blocked_by_ids(&self, user: Uuid) -> AppResult<Vec<Uuid>>;
}

#[derive(Debug, Clone)]
pub enum RematchOutcome {
    Recorded(Match),
    Reactivated(Match),
}

#[async_trait]
pub trait SwipeStore: Send + Sync {
    /// Insert the swipe and, for likes, detect reciprocity and insert the
    /// match in the same unit. Re-checks availability and blocks for the
    /// pair, then fails `AlreadySwiped` on a duplicate swipe.
    async fn record_swipe_atomic(&self, swipe: Swipe, now: DateTime<Utc>) -> AppResult<SwipeRecord>;
    async fn find_swipe(&self, swiper: Uuid, swiped: Uuid) -> AppResult<Option<Swipe>>;
    async fn get_match(&self, id: Uuid) -> AppResult<Option<Match>>;
    async fn find_match(&self, a: Uuid, b: Uuid) -> AppResult<Option<Match>>;
    async fn list_matches(&self, user: Uuid, active_only: bool) -> AppResult<Vec<Match>>;
    /// `None` when the match is missing or already inactive.
    async fn deactivate_match(
        &self,
        id: Uuid,
        reason: MatchDeactivation,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Match>>;
    /// Reactivates iff both parties are available and unblocked.
    /// Returns the row unchanged when ineligible.
    async fn reactivate_match_atomic(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<(Match, bool)>;
    /// Record a participant's rematch request; reactivates when both asked
    /// and the pair is eligible.
    async fn request_rematch_atomic(&self, id: Uuid, user: Uuid, now: DateTime<Utc>) -> AppResult<RematchOutcome>;
    async fn insert_match_if_absent(&self, a: Uuid, b: Uuid, now: DateTime<Utc>) -> AppResult<(Match, bool)>;
    /// Canonical pairs with reciprocal likes but no match row.
    async fn find_orphan_reciprocal_likes(&self, limit: i64) -> AppResult<Vec<(Uuid, Uuid)>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewDeletion {
    Hidden,
    Purged,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Opens the conversation on first append, assigns a non-decreasing
    /// `created_at` and per-conversation `seq`, updates `last_message_id`,
    /// and re-opens soft-deleted views. Refuses inactive matches, and for
    /// user messages re-checks participant availability and blocks.
    async fn append_message_atomic(&self, message: NewMessage, now: DateTime<Utc>) -> AppResult<AppendedMessage>;
    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>>;
    async fn find_conversation_by_match(&self, match_id: Uuid) -> AppResult<Option<Conversation>>;
    async fn list_conversations(&self, user: Uuid) -> AppResult<Vec<ConversationSummary>>;
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        cursor: MessageCursor,
        search: Option<&str>,
    ) -> AppResult<Vec<Message>>;
    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>>;
    async fn mark_read(&self, conversation_id: Uuid, reader: Uuid) -> AppResult<u64>;
    async fn unread_count(&self, user: Uuid) -> AppResult<u64>;
    async fn unread_in_conversation(&self, conversation_id: Uuid, user: Uuid) -> AppResult<u64>;
    async fn delete_view(&self, conversation_id: Uuid, user: Uuid, now: DateTime<Utc>) -> AppResult<ViewDeletion>;
}

#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn insert_photo(&self, photo: EphemeralPhoto) -> AppResult<EphemeralPhoto>;
    async fn get_photo(&self, id: Uuid) -> AppResult<Option<EphemeralPhoto>>;
    async fn find_by_access_key(&self, access_key: &str) -> AppResult<Option<EphemeralPhoto>>;
    /// Idempotent. The flag tells whether this call performed the transition.
    async fn mark_expired(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<(EphemeralPhoto, bool)>>;
    /// Serialized per photo: increment, audit row and max-views transition.
    async fn record_view_atomic(
        &self,
        id: Uuid,
        viewer: Option<Uuid>,
        ip: Option<String>,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<ViewOutcome>;
    async fn complete_view(&self, view_id: Uuid, viewer: Uuid, duration_ms: i64) -> AppResult<Option<PhotoView>>;
    async fn list_views(&self, photo_id: Uuid) -> AppResult<Vec<PhotoView>>;
    async fn expire_due(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<EphemeralPhoto>>;
    async fn due_for_deletion(&self, expired_before: DateTime<Utc>, limit: i64) -> AppResult<Vec<EphemeralPhoto>>;
    async fn mark_deleted(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool>;
}

#[derive(Debug, Clone)]
pub struct ReportReview {
    pub report_id: Uuid,
    pub reviewer_id: Uuid,
    pub status: ReportStatus,
    pub notes: Option<String>,
    /// Super admins may act on escalated reports as well as pending ones.
    pub allow_escalated: bool,
    pub reputation_delta: Option<i32>,
    pub sanction: Option<NewSanction>,
    pub audit: AdminAction,
    pub bounds: ReputationBounds,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReviewedReport {
    pub report: Report,
    pub applied: Option<AppliedSanction>,
}

#[derive(Debug, Clone)]
pub struct AppealReview {
    pub appeal_id: Uuid,
    pub reviewer_id: Uuid,
    pub approved: bool,
    pub notes: Option<String>,
    pub audit: AdminAction,
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait ModerationStore: Send + Sync {
    /// Fails `DuplicateReport` when an open report exists for the pair.
    async fn insert_report(&self, report: Report) -> AppResult<Report>;
    async fn has_open_report(&self, reporter: Uuid, reported: Uuid) -> AppResult<bool>;
    async fn get_report(&self, id: Uuid) -> AppResult<Option<Report>>;
    async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        include_escalated: bool,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<Report>, u64)>;
    async fn review_report_atomic(&self, review: ReportReview) -> AppResult<ReviewedReport>;
    /// Sanction row, identity flip, match deactivation (or reputation delta
    /// for warnings) and optional audit row in one transaction.
    async fn apply_sanction_atomic(
        &self,
        sanction: NewSanction,
        audit: Option<AdminAction>,
        bounds: ReputationBounds,
        now: DateTime<Utc>,
    ) -> AppResult<AppliedSanction>;
    async fn lift_sanction_atomic(
        &self,
        id: Uuid,
        lifted_by: Option<Uuid>,
        audit: Option<AdminAction>,
        now: DateTime<Utc>,
    ) -> AppResult<Sanction>;
    async fn get_sanction(&self, id: Uuid) -> AppResult<Option<Sanction>>;
    async fn list_sanctions(&self, user: Uuid) -> AppResult<Vec<Sanction>>;
    async fn active_sanctions(&self, user: Uuid) -> AppResult<Vec<Sanction>>;
    async fn expired_sanctions(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Sanction>>;
    async fn count_resolved_reporters(&self, target: Uuid, since: DateTime<Utc>) -> AppResult<u64>;
    /// Fails `AppealAlreadyPending` when the appellant has a pending appeal.
    async fn insert_appeal(&self, appeal: Appeal) -> AppResult<Appeal>;
    async fn get_appeal(&self, id: Uuid) -> AppResult<Option<Appeal>>;
    async fn list_appeals(
        &self,
        status: Option<AppealStatus>,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<Appeal>, u64)>;
    async fn review_appeal_atomic(&self, review: AppealReview) -> AppResult<ReviewedAppeal>;
    /// Pending appeals whose sanction is no longer active become `reviewed`.
    async fn close_stale_appeals(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Appeal>>;
    async fn insert_admin_action(&self, action: AdminAction) -> AppResult<()>;
    async fn list_admin_actions(&self, target: Uuid) -> AppResult<Vec<AdminAction>>;
}

/// The full storage capability set handed to [`crate::Core`].
pub trait Store:
    IdentityStore + BlockStore + SwipeStore + ConversationStore + PhotoStore + ModerationStore + PhotoCatalog
{
}

impl<T> Store for T where
    T: IdentityStore + BlockStore + SwipeStore + ConversationStore + PhotoStore + ModerationStore + PhotoCatalog
{
}
