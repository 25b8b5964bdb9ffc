use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use amora_shared::{AdminRole, AppError, AppResult, Capabilities};

use super::schema::*;
use crate::model::*;

fn column<T>(name: &str, raw: &str) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| AppError::internal(format!("unreadable {name} column: {e}")))
}

// --- users ---

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserRow {
    pub id: Uuid,
    pub is_active: bool,
    pub is_banned: bool,
    pub is_suspended: bool,
    pub reputation: i32,
    pub admin_role: Option<String>,
    pub can_manage_reports: bool,
    pub can_ban_users: bool,
    pub can_escalate: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> AppResult<Self> {
        Ok(User {
            id: row.id,
            is_active: row.is_active,
            is_banned: row.is_banned,
            is_suspended: row.is_suspended,
            reputation: row.reputation,
            admin_role: row.admin_role.as_deref().map(|r| column::<AdminRole>("admin_role", r)).transpose()?,
            capabilities: Capabilities {
                can_manage_reports: row.can_manage_reports,
                can_ban_users: row.can_ban_users,
                can_escalate: row.can_escalate,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&User> for UserRow {
    fn from(u: &User) -> Self {
        UserRow {
            id: u.id,
            is_active: u.is_active,
            is_banned: u.is_banned,
            is_suspended: u.is_suspended,
            reputation: u.reputation,
            admin_role: u.admin_role.map(|r| r.as_str().to_string()),
            can_manage_reports: u.capabilities.can_manage_reports,
            can_ban_users: u.capabilities.can_ban_users,
            can_escalate: u.capabilities.can_escalate,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

// --- blocks ---

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = blocks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BlockRow {
    pub id: Uuid,
    pub blocker_id: Uuid,
    pub blocked_id: Uuid,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<BlockRow> for Block {
    fn from(row: BlockRow) -> Self {
        Block {
            id: row.id,
            blocker_id: row.blocker_id,
            blocked_id: row.blocked_id,
            reason: row.reason,
            created_at: row.created_at,
        }
    }
}

impl From<&Block> for BlockRow {
    fn from(b: &Block) -> Self {
        BlockRow {
            id: b.id,
            blocker_id: b.blocker_id,
            blocked_id: b.blocked_id,
            reason: b.reason.clone(),
            created_at: b.created_at,
        }
    }
}

// --- swipes and matches ---

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = swipes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SwipeRow {
    pub id: Uuid,
    pub swiper_id: Uuid,
    pub swiped_id: Uuid,
    pub direction: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SwipeRow> for Swipe {
    type Error = AppError;

    fn try_from(row: SwipeRow) -> AppResult<Self> {
        Ok(Swipe {
            id: row.id,
            swiper_id: row.swiper_id,
            swiped_id: row.swiped_id,
            direction: column("direction", &row.direction)?,
            created_at: row.created_at,
        })
    }
}

impl From<&Swipe> for SwipeRow {
    fn from(s: &Swipe) -> Self {
        SwipeRow {
            id: s.id,
            swiper_id: s.swiper_id,
            swiped_id: s.swiped_id,
            direction: s.direction.as_str().to_string(),
            created_at: s.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = matches)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MatchRow {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub is_active: bool,
    pub deactivation_reason: Option<String>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub user1_rematch: bool,
    pub user2_rematch: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MatchRow> for Match {
    type Error = AppError;

    fn try_from(row: MatchRow) -> AppResult<Self> {
        Ok(Match {
            id: row.id,
            user1_id: row.user1_id,
            user2_id: row.user2_id,
            is_active: row.is_active,
            deactivation_reason: row
                .deactivation_reason
                .as_deref()
                .map(|r| column("deactivation_reason", r))
                .transpose()?,
            deactivated_at: row.deactivated_at,
            user1_rematch: row.user1_rematch,
            user2_rematch: row.user2_rematch,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&Match> for MatchRow {
    fn from(m: &Match) -> Self {
        MatchRow {
            id: m.id,
            user1_id: m.user1_id,
            user2_id: m.user2_id,
            is_active: m.is_active,
            deactivation_reason: m.deactivation_reason.map(|r| r.as_str().to_string()),
            deactivated_at: m.deactivated_at,
            user1_rematch: m.user1_rematch,
            user2_rematch: m.user2_rematch,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

/// Full-row changeset written back after an in-transaction mutation.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = matches)]
#[diesel(treat_none_as_null = true)]
pub struct MatchState {
    pub is_active: bool,
    pub deactivation_reason: Option<String>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub user1_rematch: bool,
    pub user2_rematch: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&Match> for MatchState {
    fn from(m: &Match) -> Self {
        MatchState {
            is_active: m.is_active,
            deactivation_reason: m.deactivation_reason.map(|r| r.as_str().to_string()),
            deactivated_at: m.deactivated_at,
            user1_rematch: m.user1_rematch,
            user2_rematch: m.user2_rematch,
            updated_at: m.updated_at,
        }
    }
}

// --- conversations ---

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = conversations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ConversationRow {
    pub id: Uuid,
    pub match_id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub last_message_id: Option<Uuid>,
    pub user1_deleted_at: Option<DateTime<Utc>>,
    pub user2_deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            match_id: row.match_id,
            user1_id: row.user1_id,
            user2_id: row.user2_id,
            last_message_id: row.last_message_id,
            user1_deleted_at: row.user1_deleted_at,
            user2_deleted_at: row.user2_deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: String,
    pub content: String,
    pub attachment_ref: Option<Uuid>,
    pub is_read: bool,
    pub content_verified: bool,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> AppResult<Self> {
        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            message_type: column("message_type", &row.message_type)?,
            content: row.content,
            attachment_ref: row.attachment_ref,
            is_read: row.is_read,
            content_verified: row.content_verified,
            seq: row.seq,
            created_at: row.created_at,
        })
    }
}

// --- ephemeral photos ---

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = ephemeral_photos)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PhotoRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub file_key: String,
    pub thumbnail_key: Option<String>,
    pub access_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub expires_at: DateTime<Utc>,
    pub max_views: i32,
    pub view_count: i32,
    pub is_viewed: bool,
    pub is_expired: bool,
    pub viewed_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<PhotoRow> for EphemeralPhoto {
    fn from(row: PhotoRow) -> Self {
        EphemeralPhoto {
            id: row.id,
            owner_id: row.owner_id,
            file_key: row.file_key,
            thumbnail_key: row.thumbnail_key,
            access_key: row.access_key,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            expires_at: row.expires_at,
            max_views: row.max_views,
            view_count: row.view_count,
            is_viewed: row.is_viewed,
            is_expired: row.is_expired,
            viewed_at: row.viewed_at,
            expired_at: row.expired_at,
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
        }
    }
}

impl From<&EphemeralPhoto> for PhotoRow {
    fn from(p: &EphemeralPhoto) -> Self {
        PhotoRow {
            id: p.id,
            owner_id: p.owner_id,
            file_key: p.file_key.clone(),
            thumbnail_key: p.thumbnail_key.clone(),
            access_key: p.access_key.clone(),
            content_type: p.content_type.clone(),
            size_bytes: p.size_bytes,
            expires_at: p.expires_at,
            max_views: p.max_views,
            view_count: p.view_count,
            is_viewed: p.is_viewed,
            is_expired: p.is_expired,
            viewed_at: p.viewed_at,
            expired_at: p.expired_at,
            is_deleted: p.is_deleted,
            deleted_at: p.deleted_at,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = photo_views)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PhotoViewRow {
    pub id: Uuid,
    pub photo_id: Uuid,
    pub viewer_id: Option<Uuid>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub viewed_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
}

impl From<PhotoViewRow> for PhotoView {
    fn from(row: PhotoViewRow) -> Self {
        PhotoView {
            id: row.id,
            photo_id: row.photo_id,
            viewer_id: row.viewer_id,
            ip: row.ip,
            user_agent: row.user_agent,
            viewed_at: row.viewed_at,
            duration_ms: row.duration_ms,
        }
    }
}

// --- moderation ---

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = reports)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ReportRow {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub reported_user_id: Uuid,
    pub reason: String,
    pub description: Option<String>,
    pub content_ref: Option<String>,
    pub status: String,
    pub reviewer_id: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ReportRow> for Report {
    type Error = AppError;

    fn try_from(row: ReportRow) -> AppResult<Self> {
        Ok(Report {
            id: row.id,
            reporter_id: row.reporter_id,
            reported_user_id: row.reported_user_id,
            reason: column("reason", &row.reason)?,
            description: row.description,
            content_ref: row.content_ref,
            status: column("status", &row.status)?,
            reviewer_id: row.reviewer_id,
            reviewed_at: row.reviewed_at,
            resolution_notes: row.resolution_notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&Report> for ReportRow {
    fn from(r: &Report) -> Self {
        ReportRow {
            id: r.id,
            reporter_id: r.reporter_id,
            reported_user_id: r.reported_user_id,
            reason: r.reason.as_str().to_string(),
            description: r.description.clone(),
            content_ref: r.content_ref.clone(),
            status: r.status.as_str().to_string(),
            reviewer_id: r.reviewer_id,
            reviewed_at: r.reviewed_at,
            resolution_notes: r.resolution_notes.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = sanctions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SanctionRow {
    pub id: Uuid,
    pub target_user_id: Uuid,
    pub issuer_id: Uuid,
    pub kind: String,
    pub reason: String,
    pub duration_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub source: String,
    pub report_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub lifted_at: Option<DateTime<Utc>>,
    pub lifted_by: Option<Uuid>,
}

impl TryFrom<SanctionRow> for Sanction {
    type Error = AppError;

    fn try_from(row: SanctionRow) -> AppResult<Self> {
        Ok(Sanction {
            id: row.id,
            target_user_id: row.target_user_id,
            issuer_id: row.issuer_id,
            kind: column("kind", &row.kind)?,
            reason: row.reason,
            duration_token: row.duration_token,
            expires_at: row.expires_at,
            is_active: row.is_active,
            source: column("source", &row.source)?,
            report_id: row.report_id,
            created_at: row.created_at,
            lifted_at: row.lifted_at,
            lifted_by: row.lifted_by,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = appeals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AppealRow {
    pub id: Uuid,
    pub appellant_id: Uuid,
    pub sanction_id: Uuid,
    pub reason: String,
    pub description: String,
    pub status: String,
    pub reviewer_id: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AppealRow> for Appeal {
    type Error = AppError;

    fn try_from(row: AppealRow) -> AppResult<Self> {
        Ok(Appeal {
            id: row.id,
            appellant_id: row.appellant_id,
            sanction_id: row.sanction_id,
            reason: row.reason,
            description: row.description,
            status: column("status", &row.status)?,
            reviewer_id: row.reviewer_id,
            reviewed_at: row.reviewed_at,
            review_notes: row.review_notes,
            created_at: row.created_at,
        })
    }
}

impl From<&Appeal> for AppealRow {
    fn from(a: &Appeal) -> Self {
        AppealRow {
            id: a.id,
            appellant_id: a.appellant_id,
            sanction_id: a.sanction_id,
            reason: a.reason.clone(),
            description: a.description.clone(),
            status: a.status.as_str().to_string(),
            reviewer_id: a.reviewer_id,
            reviewed_at: a.reviewed_at,
            review_notes: a.review_notes.clone(),
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = admin_actions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AdminActionRow {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub action: String,
    pub target_user_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<AdminActionRow> for AdminAction {
    fn from(row: AdminActionRow) -> Self {
        AdminAction {
            id: row.id,
            admin_id: row.admin_id,
            action: row.action,
            target_user_id: row.target_user_id,
            details: row.details,
            created_at: row.created_at,
        }
    }
}

impl From<&AdminAction> for AdminActionRow {
    fn from(a: &AdminAction) -> Self {
        AdminActionRow {
            id: a.id,
            admin_id: a.admin_id,
            action: a.action.clone(),
            target_user_id: a.target_user_id,
            details: a.details.clone(),
            created_at: a.created_at,
        }
    }
}

/// Convert a batch of rows, failing on the first unreadable one.
pub fn convert_all<R, T>(rows: Vec<R>) -> AppResult<Vec<T>>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_enum_column_is_internal() {
        let row = SwipeRow {
            id: Uuid::now_v7(),
            swiper_id: Uuid::from_u128(1),
            swiped_id: Uuid::from_u128(2),
            direction: "maybe".into(),
            created_at: Utc::now(),
        };
        let err = Swipe::try_from(row).unwrap_err();
        assert_eq!(err.kind(), amora_shared::ErrorKind::Internal);
    }

    #[test]
    fn user_row_keeps_role_and_capabilities() {
        let mut user = User::new(Uuid::from_u128(1), 100, Utc::now());
        user.admin_role = Some(AdminRole::SeniorModerator);
        user.capabilities = AdminRole::SeniorModerator.default_capabilities();
        let back = User::try_from(UserRow::from(&user)).unwrap();
        assert_eq!(back.admin_role, Some(AdminRole::SeniorModerator));
        assert!(back.capabilities.can_ban_users);
    }
}
