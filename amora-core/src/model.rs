//! Domain records shared by the stores and the commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use amora_shared::{AdminRole, AppError, Capabilities, ErrorCode};

/// Author of system messages and automatic moderation actions.
pub const SYSTEM_PRINCIPAL: Uuid = Uuid::nil();

/// Canonical ordering of an unordered pair.
pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a < b { (a, b) } else { (b, a) }
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(AppError::invalid_argument(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

// --- Identity ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub is_active: bool,
    pub is_banned: bool,
    pub is_suspended: bool,
    pub reputation: i32,
    pub admin_role: Option<AdminRole>,
    pub capabilities: Capabilities,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: Uuid, reputation: i32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            is_active: true,
            is_banned: false,
            is_suspended: false,
            reputation,
            admin_role: None,
            capabilities: Capabilities::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Banned or inactive accounts may not perform writes.
    pub fn ensure_can_act(&self) -> Result<(), AppError> {
        if self.is_banned {
            return Err(AppError::new(ErrorCode::UserBanned, "account is banned"));
        }
        if !self.is_active {
            return Err(AppError::new(ErrorCode::UserInactive, "account is inactive"));
        }
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.is_active && !self.is_banned
    }

    pub fn is_super_admin(&self) -> bool {
        self.admin_role == Some(AdminRole::SuperAdmin)
    }
}

/// Projection returned by `identity::get_user`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserStanding {
    pub is_active: bool,
    pub is_banned: bool,
    pub reputation: i32,
}

string_enum!(
    /// Capability named in permission checks.
    Capability {
        ManageReports => "can_manage_reports",
        BanUsers => "can_ban_users",
        Escalate => "can_escalate",
    }
);

impl Capability {
    pub fn held_by(&self, caps: &Capabilities) -> bool {
        match self {
            Self::ManageReports => caps.can_manage_reports,
            Self::BanUsers => caps.can_ban_users,
            Self::Escalate => caps.can_escalate,
        }
    }
}

// --- Blocks ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: Uuid,
    pub blocker_id: Uuid,
    pub blocked_id: Uuid,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

// --- Swipes and matches ---

string_enum!(SwipeDirection {
    Like => "like",
    Pass => "pass",
    SuperLike => "super_like",
});

impl SwipeDirection {
    /// `like` and `super_like` are equivalent for reciprocity.
    pub fn is_like(&self) -> bool {
        matches!(self, Self::Like | Self::SuperLike)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swipe {
    pub id: Uuid,
    pub swiper_id: Uuid,
    pub swiped_id: Uuid,
    pub direction: SwipeDirection,
    pub created_at: DateTime<Utc>,
}

string_enum!(MatchDeactivation {
    Unmatched => "unmatched",
    Sanction => "sanction",
    Moderation => "moderation",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub is_active: bool,
    pub deactivation_reason: Option<MatchDeactivation>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub user1_rematch: bool,
    pub user2_rematch: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    pub fn new(a: Uuid, b: Uuid, now: DateTime<Utc>) -> Self {
        let (user1_id, user2_id) = canonical_pair(a, b);
        Self {
            id: Uuid::now_v7(),
            user1_id,
            user2_id,
            is_active: true,
            deactivation_reason: None,
            deactivated_at: None,
            user1_rematch: false,
            user2_rematch: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    pub fn other(&self, user_id: Uuid) -> Uuid {
        if self.user1_id == user_id { self.user2_id } else { self.user1_id }
    }

    pub fn participants(&self) -> [Uuid; 2] {
        [self.user1_id, self.user2_id]
    }

    pub fn ensure_participant(&self, user_id: Uuid) -> Result<(), AppError> {
        if self.involves(user_id) {
            Ok(())
        } else {
            Err(AppError::new(ErrorCode::NotMatchParticipant, "not a participant of this match"))
        }
    }

    pub(crate) fn deactivate(&mut self, reason: MatchDeactivation, now: DateTime<Utc>) {
        self.is_active = false;
        self.deactivation_reason = Some(reason);
        self.deactivated_at = Some(now);
        self.user1_rematch = false;
        self.user2_rematch = false;
        self.updated_at = now;
    }

    pub(crate) fn reactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = true;
        self.deactivation_reason = None;
        self.deactivated_at = None;
        self.user1_rematch = false;
        self.user2_rematch = false;
        self.updated_at = now;
    }
}

/// Result of the atomic swipe + match detection unit.
#[derive(Debug, Clone)]
pub struct SwipeRecord {
    pub swipe: Swipe,
    pub matched: Option<Match>,
    /// True only for the transaction that inserted the match row.
    pub match_created: bool,
}

// --- Conversations ---

string_enum!(MessageType {
    Text => "text",
    Photo => "photo",
    PhotoEphemeral => "photo_ephemeral",
    Location => "location",
    System => "system",
    Gift => "gift",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
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

impl Conversation {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    pub fn other(&self, user_id: Uuid) -> Uuid {
        if self.user1_id == user_id { self.user2_id } else { self.user1_id }
    }

    pub fn ensure_member(&self, user_id: Uuid) -> Result<(), AppError> {
        if self.involves(user_id) {
            Ok(())
        } else {
            Err(AppError::new(ErrorCode::NotConversationMember, "not a member of this conversation"))
        }
    }

    pub fn is_deleted_for(&self, user_id: Uuid) -> bool {
        if self.user1_id == user_id {
            self.user1_deleted_at.is_some()
        } else {
            self.user2_deleted_at.is_some()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: MessageType,
    pub content: String,
    pub attachment_ref: Option<Uuid>,
    pub is_read: bool,
    pub content_verified: bool,
    /// Insertion order within the conversation; breaks `created_at` ties.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

/// Message ready to be appended; timestamps and ordering are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub match_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: MessageType,
    pub content: String,
    pub attachment_ref: Option<Uuid>,
    pub content_verified: bool,
}

#[derive(Debug, Clone)]
pub struct AppendedMessage {
    pub conversation: Conversation,
    pub message: Message,
    pub conversation_created: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub other_user_id: Uuid,
    pub last_message: Option<Message>,
    pub unread_count: u64,
}

/// Direction and bounds of a message page.
#[derive(Debug, Clone, Copy)]
pub struct MessageCursor {
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
    pub limit: i64,
}

// --- Ephemeral photos ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralPhoto {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub file_key: String,
    pub thumbnail_key: Option<String>,
    #[serde(skip_serializing)]
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

impl EphemeralPhoto {
    /// True when the photo can no longer be viewed, whether or not the flag
    /// has been persisted yet.
    pub fn is_spent(&self, now: DateTime<Utc>) -> bool {
        self.is_expired || self.is_deleted || now >= self.expires_at || self.view_count >= self.max_views
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoView {
    pub id: Uuid,
    pub photo_id: Uuid,
    pub viewer_id: Option<Uuid>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub viewed_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum ViewOutcome {
    Viewed { photo: EphemeralPhoto, view: PhotoView },
    /// The photo was spent when the lock was taken; it is now marked expired.
    Expired { photo: EphemeralPhoto },
}

// --- Moderation ---

string_enum!(ReportReason {
    InappropriateBehavior => "inappropriate_behavior",
    FakeProfile => "fake_profile",
    Spam => "spam",
    Harassment => "harassment",
    Other => "other",
});

string_enum!(ReportStatus {
    Pending => "pending",
    Reviewed => "reviewed",
    Resolved => "resolved",
    Dismissed => "dismissed",
    Escalated => "escalated",
});

impl ReportStatus {
    /// Open reports block a second report for the same pair.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Escalated)
    }
}

string_enum!(ReviewAction {
    Resolve => "resolve",
    Dismiss => "dismiss",
    Escalate => "escalate",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub reported_user_id: Uuid,
    pub reason: ReportReason,
    pub description: Option<String>,
    pub content_ref: Option<String>,
    pub status: ReportStatus,
    pub reviewer_id: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

string_enum!(SanctionKind {
    Warn => "warn",
    Suspend => "suspend",
    Ban => "ban",
});

impl SanctionKind {
    /// Kinds limited to one active row per target.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Suspend | Self::Ban)
    }
}

string_enum!(SanctionSource {
    Manual => "manual",
    Automatic => "automatic",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sanction {
    pub id: Uuid,
    pub target_user_id: Uuid,
    pub issuer_id: Uuid,
    pub kind: SanctionKind,
    pub reason: String,
    pub duration_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub source: SanctionSource,
    pub report_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub lifted_at: Option<DateTime<Utc>>,
    pub lifted_by: Option<Uuid>,
}

/// Sanction ready to be applied. `reputation_delta` is used for warnings.
#[derive(Debug, Clone)]
pub struct NewSanction {
    pub target_user_id: Uuid,
    pub issuer_id: Uuid,
    pub kind: SanctionKind,
    pub reason: String,
    pub duration_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub source: SanctionSource,
    pub report_id: Option<Uuid>,
    pub reputation_delta: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedSanction {
    pub sanction: Sanction,
    pub deactivated_matches: Vec<Match>,
}

string_enum!(AppealStatus {
    Pending => "pending",
    Reviewed => "reviewed",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appeal {
    pub id: Uuid,
    pub appellant_id: Uuid,
    pub sanction_id: Uuid,
    pub reason: String,
    pub description: String,
    pub status: AppealStatus,
    pub reviewer_id: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewedAppeal {
    pub appeal: Appeal,
    pub lifted: Option<Sanction>,
}

/// Audit row written for every administrative decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAction {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub action: String,
    pub target_user_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AdminAction {
    pub fn new(
        admin_id: Uuid,
        action: &str,
        target_user_id: Option<Uuid>,
        details: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            admin_id,
            action: action.to_string(),
            target_user_id,
            details: Some(details),
            created_at: now,
        }
    }
}
