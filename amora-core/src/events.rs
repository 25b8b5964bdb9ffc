use serde::Serialize;
use uuid::Uuid;

use amora_shared::types::event::{payloads, routing_keys};
use amora_shared::Event;

use crate::model::{Appeal, Match, MatchDeactivation, Message, Report, Sanction, Swipe};

pub const EVENT_SOURCE: &str = "amora-core";

/// A serialized domain event ready for the broker.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub routing_key: &'static str,
    pub event: Event<serde_json::Value>,
}

impl EventEnvelope {
    pub fn new<T: Serialize>(routing_key: &'static str, actor: Option<Uuid>, recipients: Vec<Uuid>, data: T) -> Self {
        let data = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
        let mut event = Event::new(EVENT_SOURCE, routing_key, data).with_recipients(recipients);
        if let Some(actor) = actor {
            event = event.with_user(actor);
        }
        Self { routing_key, event }
    }
}

pub fn swipe_recorded(swipe: &Swipe) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::MATCHING_SWIPE_RECORDED,
        Some(swipe.swiper_id),
        Vec::new(),
        payloads::SwipeRecorded {
            swipe_id: swipe.id,
            swiper_id: swipe.swiper_id,
            swiped_id: swipe.swiped_id,
            direction: swipe.direction.to_string(),
        },
    )
}

pub fn match_created(m: &Match) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::MATCHING_MATCH_CREATED,
        None,
        m.participants().to_vec(),
        payloads::MatchCreated {
            match_id: m.id,
            user1_id: m.user1_id,
            user2_id: m.user2_id,
        },
    )
}

pub fn match_deactivated(m: &Match, reason: MatchDeactivation) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::MATCHING_MATCH_DEACTIVATED,
        None,
        m.participants().to_vec(),
        payloads::MatchDeactivated {
            match_id: m.id,
            user1_id: m.user1_id,
            user2_id: m.user2_id,
            reason: reason.to_string(),
        },
    )
}

pub fn match_reactivated(m: &Match) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::MATCHING_MATCH_REACTIVATED,
        None,
        m.participants().to_vec(),
        payloads::MatchReactivated {
            match_id: m.id,
            user1_id: m.user1_id,
            user2_id: m.user2_id,
        },
    )
}

pub fn block_changed(routing_key: &'static str, blocker_id: Uuid, blocked_id: Uuid) -> EventEnvelope {
    EventEnvelope::new(
        routing_key,
        Some(blocker_id),
        vec![blocker_id],
        payloads::BlockChanged { blocker_id, blocked_id },
    )
}

/// Previews are capped so message bodies never travel whole through the broker.
const PREVIEW_CHARS: usize = 80;

pub fn message_appended(message: &Message, match_id: Uuid, recipients: [Uuid; 2]) -> EventEnvelope {
    let content_preview = match message.message_type {
        crate::model::MessageType::Text | crate::model::MessageType::System => {
            message.content.chars().take(PREVIEW_CHARS).collect()
        }
        other => format!("[{other}]"),
    };

    EventEnvelope::new(
        routing_keys::MESSAGING_MESSAGE_APPENDED,
        Some(message.sender_id),
        recipients.to_vec(),
        payloads::MessageAppended {
            conversation_id: message.conversation_id,
            message_id: message.id,
            match_id,
            sender_id: message.sender_id,
            message_type: message.message_type.to_string(),
            content_preview,
            created_at: message.created_at,
        },
    )
}

pub fn messages_read(conversation_id: Uuid, reader_id: Uuid, other: Uuid, count: u64) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::MESSAGING_MESSAGES_READ,
        Some(reader_id),
        vec![other],
        payloads::MessagesRead { conversation_id, reader_id, count },
    )
}

pub fn photo_viewed(
    photo_id: Uuid,
    owner_id: Uuid,
    viewer_id: Option<Uuid>,
    view_count: i32,
    max_views: i32,
) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::EPHEMERAL_PHOTO_VIEWED,
        viewer_id,
        vec![owner_id],
        payloads::EphemeralPhotoViewed { photo_id, owner_id, viewer_id, view_count, max_views },
    )
}

pub fn photo_expired(photo_id: Uuid, owner_id: Uuid) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::EPHEMERAL_PHOTO_EXPIRED,
        None,
        vec![owner_id],
        payloads::EphemeralPhotoExpired { photo_id, owner_id },
    )
}

pub fn report_submitted(report: &Report) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::MODERATION_REPORT_SUBMITTED,
        Some(report.reporter_id),
        Vec::new(),
        payloads::ReportSubmitted {
            report_id: report.id,
            reporter_id: report.reporter_id,
            reported_id: report.reported_user_id,
            reason: report.reason.to_string(),
        },
    )
}

pub fn report_resolved(report: &Report) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::MODERATION_REPORT_RESOLVED,
        report.reviewer_id,
        vec![report.reporter_id],
        payloads::ReportResolved {
            report_id: report.id,
            reporter_id: report.reporter_id,
            reported_id: report.reported_user_id,
            status: report.status.to_string(),
        },
    )
}

pub fn sanction_applied(sanction: &Sanction) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::MODERATION_SANCTION_APPLIED,
        Some(sanction.issuer_id),
        vec![sanction.target_user_id],
        payloads::SanctionApplied {
            sanction_id: sanction.id,
            user_id: sanction.target_user_id,
            kind: sanction.kind.to_string(),
            reason: sanction.reason.clone(),
            expires_at: sanction.expires_at,
        },
    )
}

pub fn sanction_lifted(sanction: &Sanction) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::MODERATION_SANCTION_LIFTED,
        sanction.lifted_by,
        vec![sanction.target_user_id],
        payloads::SanctionLifted {
            sanction_id: sanction.id,
            user_id: sanction.target_user_id,
        },
    )
}

pub fn appeal_submitted(appeal: &Appeal) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::MODERATION_APPEAL_SUBMITTED,
        Some(appeal.appellant_id),
        Vec::new(),
        payloads::AppealSubmitted {
            appeal_id: appeal.id,
            appellant_id: appeal.appellant_id,
            sanction_id: appeal.sanction_id,
        },
    )
}

pub fn appeal_reviewed(appeal: &Appeal, approved: bool) -> EventEnvelope {
    EventEnvelope::new(
        routing_keys::MODERATION_APPEAL_REVIEWED,
        appeal.reviewer_id,
        vec![appeal.appellant_id],
        payloads::AppealReviewed {
            appeal_id: appeal.id,
            appellant_id: appeal.appellant_id,
            sanction_id: appeal.sanction_id,
            approved,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn match_created_targets_both_participants() {
        let m = Match::new(Uuid::from_u128(2), Uuid::from_u128(1), Utc::now());
        let env = match_created(&m);
        assert_eq!(env.routing_key, routing_keys::MATCHING_MATCH_CREATED);
        assert_eq!(env.event.recipients, vec![Uuid::from_u128(1), Uuid::from_u128(2)]);
        assert_eq!(env.event.data["user1_id"], serde_json::json!(Uuid::from_u128(1)));
    }

    #[test]
    fn non_text_messages_are_not_previewed() {
        let message = Message {
            id: Uuid::now_v7(),
            conversation_id: Uuid::now_v7(),
            sender_id: Uuid::from_u128(1),
            message_type: crate::model::MessageType::Location,
            content: r#"{"lat":1.0,"lng":2.0,"accuracy_m":3.0}"#.into(),
            attachment_ref: None,
            is_read: false,
            content_verified: true,
            seq: 1,
            created_at: Utc::now(),
        };
        let env = message_appended(&message, Uuid::now_v7(), [Uuid::from_u128(1), Uuid::from_u128(2)]);
        assert_eq!(env.event.data["content_preview"], "[location]");
    }

    #[test]
    fn every_event_id_is_unique() {
        let m = Match::new(Uuid::from_u128(1), Uuid::from_u128(2), Utc::now());
        assert_ne!(match_created(&m).event.id, match_created(&m).event.id);
    }
}
