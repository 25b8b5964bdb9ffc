use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RabbitMQ Event envelope wrapping all domain events.
///
/// Routing key format: `amora.{domain}.{entity}.{action}`
/// Example: `amora.matching.match.created`
///
/// `id` is unique per event; push clients deduplicate on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T: Serialize> {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub recipients: Vec<Uuid>,
    pub data: T,
}

impl<T: Serialize> Event<T> {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            user_id: None,
            recipients: Vec::new(),
            data,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Users whose push channel should receive this event.
    pub fn with_recipients(mut self, recipients: Vec<Uuid>) -> Self {
        self.recipients = recipients;
        self
    }
}

/// RabbitMQ routing keys
pub mod routing_keys {
    // Auth events (consumed)
    pub const AUTH_USER_REGISTERED: &str = "amora.auth.user.registered";

    // Matching events
    pub const MATCHING_SWIPE_RECORDED: &str = "amora.matching.swipe.recorded";
    pub const MATCHING_MATCH_CREATED: &str = "amora.matching.match.created";
    pub const MATCHING_MATCH_DEACTIVATED: &str = "amora.matching.match.deactivated";
    pub const MATCHING_MATCH_REACTIVATED: &str = "amora.matching.match.reactivated";

    // Block events
    pub const BLOCKS_BLOCK_CREATED: &str = "amora.blocks.block.created";
    pub const BLOCKS_BLOCK_REMOVED: &str = "amora.blocks.block.removed";

    // Messaging events
    pub const MESSAGING_MESSAGE_APPENDED: &str = "amora.messaging.message.appended";
    pub const MESSAGING_MESSAGES_READ: &str = "amora.messaging.conversation.read";

    // Ephemeral photo events
    pub const EPHEMERAL_PHOTO_VIEWED: &str = "amora.ephemeral.photo.viewed";
    pub const EPHEMERAL_PHOTO_EXPIRED: &str = "amora.ephemeral.photo.expired";

    // Moderation events
    pub const MODERATION_REPORT_SUBMITTED: &str = "amora.moderation.report.submitted";
    pub const MODERATION_REPORT_RESOLVED: &str = "amora.moderation.report.resolved";
    pub const MODERATION_SANCTION_APPLIED: &str = "amora.moderation.sanction.applied";
    pub const MODERATION_SANCTION_LIFTED: &str = "amora.moderation.sanction.lifted";
    pub const MODERATION_APPEAL_SUBMITTED: &str = "amora.moderation.appeal.submitted";
    pub const MODERATION_APPEAL_REVIEWED: &str = "amora.moderation.appeal.reviewed";

    // Notification requests (consumed by the notification service)
    pub const NOTIFICATION_REQUESTED: &str = "amora.notification.requested";

    /// Binding that matches every event this backend emits.
    pub const ALL_DOMAIN_EVENTS: &str = "amora.#";
}

/// Common event data payloads
pub mod payloads {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct UserRegistered {
        pub user_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SwipeRecorded {
        pub swipe_id: Uuid,
        pub swiper_id: Uuid,
        pub swiped_id: Uuid,
        pub direction: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MatchCreated {
        pub match_id: Uuid,
        pub user1_id: Uuid,
        pub user2_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MatchDeactivated {
        pub match_id: Uuid,
        pub user1_id: Uuid,
        pub user2_id: Uuid,
        pub reason: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MatchReactivated {
        pub match_id: Uuid,
        pub user1_id: Uuid,
        pub user2_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct BlockChanged {
        pub blocker_id: Uuid,
        pub blocked_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MessageAppended {
        pub conversation_id: Uuid,
        pub message_id: Uuid,
        pub match_id: Uuid,
        pub sender_id: Uuid,
        pub message_type: String,
        pub content_preview: String,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct MessagesRead {
        pub conversation_id: Uuid,
        pub reader_id: Uuid,
        pub count: u64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct EphemeralPhotoViewed {
        pub photo_id: Uuid,
        pub owner_id: Uuid,
        pub viewer_id: Option<Uuid>,
        pub view_count: i32,
        pub max_views: i32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct EphemeralPhotoExpired {
        pub photo_id: Uuid,
        pub owner_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ReportSubmitted {
        pub report_id: Uuid,
        pub reporter_id: Uuid,
        pub reported_id: Uuid,
        pub reason: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ReportResolved {
        pub report_id: Uuid,
        pub reporter_id: Uuid,
        pub reported_id: Uuid,
        pub status: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SanctionApplied {
        pub sanction_id: Uuid,
        pub user_id: Uuid,
        pub kind: String,
        pub reason: String,
        pub expires_at: Option<DateTime<Utc>>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SanctionLifted {
        pub sanction_id: Uuid,
        pub user_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AppealSubmitted {
        pub appeal_id: Uuid,
        pub appellant_id: Uuid,
        pub sanction_id: Uuid,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AppealReviewed {
        pub appeal_id: Uuid,
        pub appellant_id: Uuid,
        pub sanction_id: Uuid,
        pub approved: bool,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct NotificationRequested {
        pub user_id: Uuid,
        pub kind: String,
        pub payload: serde_json::Value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_recipients() {
        let event = Event::new(
            "amora-core",
            routing_keys::MATCHING_MATCH_CREATED,
            payloads::MatchCreated {
                match_id: Uuid::now_v7(),
                user1_id: Uuid::from_u128(1),
                user2_id: Uuid::from_u128(2),
            },
        )
        .with_recipients(vec![Uuid::from_u128(1), Uuid::from_u128(2)]);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["recipients"].as_array().unwrap().len(), 2);
        assert_eq!(json["event_type"], "amora.matching.match.created");
    }

    #[test]
    fn envelope_without_recipients_deserializes() {
        let raw = serde_json::json!({
            "id": Uuid::now_v7(),
            "source": "amora-auth",
            "event_type": routing_keys::AUTH_USER_REGISTERED,
            "timestamp": Utc::now(),
            "correlation_id": null,
            "user_id": null,
            "data": { "user_id": Uuid::from_u128(7) }
        });
        let event: Event<payloads::UserRegistered> = serde_json::from_value(raw).unwrap();
        assert!(event.recipients.is_empty());
        assert_eq!(event.data.user_id, Uuid::from_u128(7));
    }
}
