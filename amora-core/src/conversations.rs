//! Per-match message logs.
//!
//! A conversation is opened by the first message of a match. Reads and
//! writes are restricted to the two participants; a view hidden by one
//! participant reappears for both when the next message arrives.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use amora_shared::types::pagination::CursorParams;
use amora_shared::{AppError, AppResult, ErrorCode};

use crate::blocks;
use crate::context::{Core, OpContext, DAY, HOUR, MINUTE};
use crate::events;
use crate::idempotency;
use crate::model::{
    Conversation, ConversationSummary, Match, Message, MessageCursor, MessageType, NewMessage, ReportReason,
    SYSTEM_PRINCIPAL,
};
use crate::moderation;
use crate::ports::with_timeout;
use crate::store::ViewDeletion;

fn unread_key(user: Uuid) -> String {
    format!("unread:{user}")
}

/// Location payload of a `location` message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: f64,
}

impl Location {
    fn validate(&self) -> AppResult<()> {
        let in_range = self.lat.is_finite()
            && self.lng.is_finite()
            && self.accuracy_m.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
            && self.accuracy_m >= 0.0;
        if in_range {
            Ok(())
        } else {
            Err(AppError::with_details(
                ErrorCode::InvalidLocation,
                "location out of range",
                serde_json::json!({ "lat": self.lat, "lng": self.lng, "accuracy_m": self.accuracy_m }),
            ))
        }
    }
}

/// Validated body ready for the log.
struct Body {
    content: String,
    attachment_ref: Option<Uuid>,
    content_verified: bool,
    /// Classifier score when it crossed the report threshold.
    flagged: Option<f64>,
}

impl Body {
    fn plain(content: String, attachment_ref: Option<Uuid>) -> Self {
        Self { content, attachment_ref, content_verified: true, flagged: None }
    }
}

fn invalid_content(message: impl Into<String>) -> AppError {
    AppError::new(ErrorCode::InvalidContent, message)
}

fn required_attachment(attachment_ref: Option<Uuid>) -> AppResult<Uuid> {
    attachment_ref.ok_or_else(|| AppError::new(ErrorCode::InvalidAttachment, "attachment_ref is required"))
}

async fn validate_text(core: &Core, content: String) -> AppResult<Body> {
    let max = core.config.messages.max_text_length;
    let len = content.chars().count();
    if content.trim().is_empty() {
        return Err(invalid_content("message text is empty"));
    }
    if len > max {
        return Err(AppError::with_details(
            ErrorCode::InvalidContent,
            format!("message text exceeds {max} characters"),
            serde_json::json!({ "max_length": max, "length": len }),
        ));
    }

    let rules = &core.config.moderation.rules;
    let verdict = with_timeout(core.classifier_budget(), core.classifier.classify_text(&content)).await;
    let (score, verified) = match verdict {
        Ok(verdict) => (verdict.score, true),
        Err(e) => {
            tracing::warn!(error = %e, "classifier unavailable; storing message unverified");
            (core.config.classifier.fallback_threshold, false)
        }
    };

    if score >= rules.severity_threshold {
        return Err(invalid_content("message rejected by content filter"));
    }
    let flagged = (score >= rules.report_threshold).then_some(score);
    Ok(Body { content, attachment_ref: None, content_verified: verified, flagged })
}

async fn validate_body(
    core: &Core,
    sender: Uuid,
    message_type: MessageType,
    content: String,
    attachment_ref: Option<Uuid>,
) -> AppResult<Body> {
    match message_type {
        MessageType::Text => validate_text(core, content).await,
        MessageType::Photo => {
            let photo_id = required_attachment(attachment_ref)?;
            let approved = with_timeout(core.storage_budget(), core.store.is_owned_approved(sender, photo_id)).await?;
            if !approved {
                return Err(AppError::new(ErrorCode::InvalidAttachment, "photo is not an approved photo of the sender"));
            }
            Ok(Body::plain(content, Some(photo_id)))
        }
        MessageType::PhotoEphemeral => {
            let photo_id = required_attachment(attachment_ref)?;
            let photo = core
                .store
                .get_photo(photo_id)
                .await?
                .filter(|p| p.owner_id == sender)
                .ok_or_else(|| AppError::new(ErrorCode::InvalidAttachment, "ephemeral photo not found"))?;
            if photo.is_spent(core.now()) || photo.is_viewed {
                return Err(AppError::new(ErrorCode::PhotoExpired, "ephemeral photo is no longer viewable"));
            }
            Ok(Body::plain(content, Some(photo_id)))
        }
        MessageType::Location => {
            let location: Location = serde_json::from_str(&content)
                .map_err(|e| AppError::new(ErrorCode::InvalidLocation, format!("malformed location: {e}")))?;
            location.validate()?;
            let content = serde_json::to_string(&location).map_err(|e| AppError::Internal(e.into()))?;
            Ok(Body::plain(content, None))
        }
        MessageType::Gift => {
            let code = content.trim();
            let max = core.config.messages.max_gift_code_length;
            if code.is_empty() || code.chars().count() > max {
                return Err(invalid_content(format!("gift code must be 1 to {max} characters")));
            }
            Ok(Body::plain(code.to_string(), None))
        }
        MessageType::System => Err(AppError::new(
            ErrorCode::SystemMessageForbidden,
            "system messages cannot be sent by users",
        )),
    }
}

async fn load_match(core: &Core, match_id: Uuid) -> AppResult<Match> {
    core.store
        .get_match(match_id)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::MatchNotFound, "match not found"))
}

pub async fn send_message(
    core: &Core,
    cx: &OpContext,
    sender: Uuid,
    match_id: Uuid,
    message_type: MessageType,
    content: String,
    attachment_ref: Option<Uuid>,
) -> AppResult<Message> {
    if message_type == MessageType::System {
        return Err(AppError::new(ErrorCode::SystemMessageForbidden, "system messages cannot be sent by users"));
    }
    core.require_actor(sender).await?;
    let m = load_match(core, match_id).await?;
    m.ensure_participant(sender)?;
    if !m.is_active {
        return Err(AppError::new(ErrorCode::MatchInactive, "match is not active"));
    }
    let recipient = m.other(sender);
    if !core.require_user(recipient).await?.is_available() {
        return Err(AppError::forbidden("recipient account is not available"));
    }
    if blocks::is_blocked_either(core, sender, recipient).await? {
        return Err(AppError::new(ErrorCode::Blocked, "a block exists between these users"));
    }

    idempotency::run_once(core, cx, sender, "send_message", async {
        let limits = &core.config.chat.rate_limit;
        let subject = sender.to_string();
        core.enforce_rate_limit(
            "messages",
            &subject,
            &[(limits.messages_per_minute, MINUTE), (limits.messages_per_hour, HOUR), (limits.messages_per_day, DAY)],
        )
        .await?;
        if core.store.find_conversation_by_match(m.id).await?.is_none() {
            core.enforce_rate_limit("conversations", &subject, &[(limits.conversations_per_day, DAY)]).await?;
        }

        let body = cx.guard(validate_body(core, sender, message_type, content, attachment_ref)).await?;

        cx.checkpoint()?;
        let appended = core
            .store
            .append_message_atomic(
                NewMessage {
                    id: Uuid::now_v7(),
                    match_id: m.id,
                    sender_id: sender,
                    message_type,
                    content: body.content,
                    attachment_ref: body.attachment_ref,
                    content_verified: body.content_verified,
                },
                core.now(),
            )
            .await?;
        let message = appended.message;

        if appended.conversation_created {
            tracing::info!(conversation_id = %message.conversation_id, match_id = %m.id, "conversation opened");
        }
        metrics::counter!("amora_messages_sent_total", "type" => message_type.as_str()).increment(1);
        core.cache_delete(&unread_key(recipient)).await;
        core.emit(events::message_appended(&message, m.id, [sender, recipient])).await;
        core.notify(
            recipient,
            "new_message",
            serde_json::json!({ "conversation_id": message.conversation_id, "message_id": message.id, "from": sender }),
        )
        .await;

        if let Some(score) = body.flagged {
            let description = format!("message {} scored {score:.2} by the content classifier", message.id);
            if let Err(e) = moderation::reports::file_automatic_report(
                core,
                sender,
                ReportReason::InappropriateBehavior,
                description,
                Some(message.id.to_string()),
            )
            .await
            {
                tracing::error!(error = %e, message_id = %message.id, "failed to file automatic report");
            }
        }

        Ok(message)
    })
    .await
}

/// Append a message authored by the system principal.
pub async fn send_system_message(core: &Core, match_id: Uuid, content: String) -> AppResult<Message> {
    if content.trim().is_empty() {
        return Err(invalid_content("system message is empty"));
    }
    let m = load_match(core, match_id).await?;
    let appended = core
        .store
        .append_message_atomic(
            NewMessage {
                id: Uuid::now_v7(),
                match_id: m.id,
                sender_id: SYSTEM_PRINCIPAL,
                message_type: MessageType::System,
                content,
                attachment_ref: None,
                content_verified: true,
            },
            core.now(),
        )
        .await?;

    for user in m.participants() {
        core.cache_delete(&unread_key(user)).await;
    }
    core.emit(events::message_appended(&appended.message, m.id, m.participants())).await;
    Ok(appended.message)
}

/// Load a conversation visible to `user`. Views the user hid are not found.
async fn visible_conversation(core: &Core, user: Uuid, conversation_id: Uuid) -> AppResult<Conversation> {
    let conversation = core
        .store
        .get_conversation(conversation_id)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))?;
    conversation.ensure_member(user)?;
    if conversation.is_deleted_for(user) {
        return Err(AppError::new(ErrorCode::ConversationNotFound, "conversation not found"));
    }
    Ok(conversation)
}

pub async fn get_conversation(core: &Core, user: Uuid, conversation_id: Uuid) -> AppResult<Conversation> {
    visible_conversation(core, user, conversation_id).await
}

pub async fn list_conversations(core: &Core, user: Uuid) -> AppResult<Vec<ConversationSummary>> {
    core.store.list_conversations(user).await
}

/// Page through a log. `before` pages newest-first, `after` oldest-first;
/// with neither, the newest page. `search` matches text messages only.
pub async fn list_messages(
    core: &Core,
    user: Uuid,
    conversation_id: Uuid,
    cursor: &CursorParams,
    search: Option<&str>,
) -> AppResult<Vec<Message>> {
    let conversation = visible_conversation(core, user, conversation_id).await?;
    let search = search.map(str::trim).filter(|s| !s.is_empty());
    core.store
        .list_messages(
            conversation.id,
            MessageCursor {
                before: cursor.before,
                after: cursor.after,
                limit: cursor.capped_limit() as i64,
            },
            search,
        )
        .await
}

/// Flip every unread message from the other participant. Returns the count.
pub async fn mark_read(core: &Core, cx: &OpContext, reader: Uuid, conversation_id: Uuid) -> AppResult<u64> {
    let conversation = visible_conversation(core, reader, conversation_id).await?;
    cx.checkpoint()?;
    let count = core.store.mark_read(conversation.id, reader).await?;
    if count > 0 {
        core.cache_delete(&unread_key(reader)).await;
        core.emit(events::messages_read(conversation.id, reader, conversation.other(reader), count)).await;
        tracing::debug!(conversation_id = %conversation.id, reader_id = %reader, count, "messages marked read");
    }
    Ok(count)
}

pub async fn unread_count(core: &Core, user: Uuid) -> AppResult<u64> {
    let key = unread_key(user);
    if let Some(cached) = core.cache_get(&key).await.and_then(|raw| raw.parse::<u64>().ok()) {
        return Ok(cached);
    }
    let count = core.store.unread_count(user).await?;
    core.cache_set(&key, &count.to_string(), core.config.messages.unread_cache_ttl).await;
    Ok(count)
}

pub async fn unread_in_conversation(core: &Core, user: Uuid, conversation_id: Uuid) -> AppResult<u64> {
    let conversation = visible_conversation(core, user, conversation_id).await?;
    core.store.unread_in_conversation(conversation.id, user).await
}

/// Hide the conversation for `user`. Purges the log once both sides hid it.
pub async fn delete_conversation_view(
    core: &Core,
    cx: &OpContext,
    user: Uuid,
    conversation_id: Uuid,
) -> AppResult<ViewDeletion> {
    let conversation = visible_conversation(core, user, conversation_id).await?;
    cx.checkpoint()?;
    let outcome = core.store.delete_view(conversation.id, user, core.now()).await?;
    for member in [conversation.user1_id, conversation.user2_id] {
        core.cache_delete(&unread_key(member)).await;
    }
    match outcome {
        ViewDeletion::Purged => tracing::info!(conversation_id = %conversation.id, "conversation purged"),
        ViewDeletion::Hidden => {
            tracing::debug!(conversation_id = %conversation.id, user_id = %user, "conversation hidden")
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swipes;
    use crate::testing::{harness, Harness};
    use amora_shared::clients::classifier::ClassifierVerdict;
    use amora_shared::types::event::routing_keys;
    use amora_shared::ErrorKind;

    use crate::model::{NewSanction, SanctionKind, SanctionSource};
    use crate::ports::PortError;
    use crate::store::{ModerationStore, ReputationBounds};

    async fn matched(h: &Harness) -> (Uuid, Uuid, Match) {
        let (a, b) = (h.user(1).await, h.user(2).await);
        let (m, _) = h.core.store.insert_match_if_absent(a, b, h.core.now()).await.unwrap();
        (a, b, m)
    }

    async fn text(h: &Harness, sender: Uuid, m: &Match, body: &str) -> AppResult<Message> {
        send_message(&h.core, &OpContext::new(), sender, m.id, MessageType::Text, body.to_string(), None).await
    }

    #[tokio::test]
    async fn text_at_the_cap_passes_and_one_more_fails() {
        let h = harness();
        let (a, _, m) = matched(&h).await;
        let cap = h.core.config.messages.max_text_length;

        text(&h, a, &m, &"x".repeat(cap)).await.unwrap();
        let err = text(&h, a, &m, &"x".repeat(cap + 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidContent);
    }

    #[tokio::test]
    async fn first_message_opens_the_conversation_and_notifies() {
        let h = harness();
        let (a, b, m) = matched(&h).await;
        let msg = text(&h, a, &m, "hello").await.unwrap();

        let conv = get_conversation(&h.core, b, msg.conversation_id).await.unwrap();
        assert_eq!(conv.match_id, m.id);
        assert_eq!(conv.last_message_id, Some(msg.id));
        assert_eq!(h.events.count(routing_keys::MESSAGING_MESSAGE_APPENDED), 1);
        assert_eq!(h.notifier.sent_to(b).len(), 1);
    }

    #[tokio::test]
    async fn outsiders_are_forbidden() {
        let h = harness();
        let (a, _, m) = matched(&h).await;
        let c = h.user(3).await;
        let msg = text(&h, a, &m, "hi").await.unwrap();

        let err = text(&h, c, &m, "me too").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = list_messages(&h.core, c, msg.conversation_id, &CursorParams::latest(20), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn block_keeps_match_but_stops_messages() {
        let h = harness();
        let (a, b, m) = matched(&h).await;
        blocks::block(&h.core, &OpContext::new(), a, b, None).await.unwrap();

        let err = text(&h, b, &m, "hi").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(swipes::get_match(&h.core, a, m.id).await.unwrap().is_active);
    }

    /// Commits a ban on `target` while the sender's text is being classified.
    struct BansDuringClassify {
        store: std::sync::Arc<crate::store::MemoryStore>,
        target: Uuid,
    }

    #[async_trait::async_trait]
    impl crate::ports::ContentClassifier for BansDuringClassify {
        async fn classify_text(&self, _text: &str) -> Result<ClassifierVerdict, PortError> {
            let ban = NewSanction {
                target_user_id: self.target,
                issuer_id: Uuid::from_u128(99),
                kind: SanctionKind::Ban,
                reason: "concurrent moderation".into(),
                duration_token: None,
                expires_at: None,
                source: SanctionSource::Manual,
                report_id: None,
                reputation_delta: 0,
            };
            let bounds = ReputationBounds { min: 0, max: 200 };
            self.store
                .apply_sanction_atomic(ban, None, bounds, chrono::Utc::now())
                .await
                .map_err(|e| PortError::Unavailable(e.to_string()))?;
            Ok(ClassifierVerdict { score: 0.0, labels: Vec::new() })
        }

        async fn classify_image(&self, _object_key: &str) -> Result<ClassifierVerdict, PortError> {
            Ok(ClassifierVerdict { score: 0.0, labels: Vec::new() })
        }
    }

    #[tokio::test]
    async fn ban_landing_mid_send_refuses_the_append() {
        let mut h = harness();
        let (a, b, m) = matched(&h).await;
        h.core.classifier = std::sync::Arc::new(BansDuringClassify { store: h.store.clone(), target: b });

        let err = text(&h, a, &m, "hello").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(!h.core.store.get_match(m.id).await.unwrap().unwrap().is_active);
        assert!(h.core.store.find_conversation_by_match(m.id).await.unwrap().is_none());
        assert_eq!(h.events.count(routing_keys::MESSAGING_MESSAGE_APPENDED), 0);
    }

    #[tokio::test]
    async fn users_cannot_send_system_messages() {
        let h = harness();
        let (a, _, m) = matched(&h).await;
        let err = send_message(&h.core, &OpContext::new(), a, m.id, MessageType::System, "x".into(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SystemMessageForbidden);

        let msg = send_system_message(&h.core, m.id, "You matched!".into()).await.unwrap();
        assert_eq!(msg.sender_id, SYSTEM_PRINCIPAL);
    }

    #[tokio::test]
    async fn location_is_range_checked() {
        let h = harness();
        let (a, _, m) = matched(&h).await;
        let cx = OpContext::new();
        let send = |body: &str| {
            send_message(&h.core, &cx, a, m.id, MessageType::Location, body.to_string(), None)
        };

        send(r#"{"lat":48.85,"lng":2.35,"accuracy_m":12}"#).await.unwrap();
        let err = send(r#"{"lat":91,"lng":0,"accuracy_m":1}"#).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidLocation);
        let err = send(r#"{"lat":0,"lng":0,"accuracy_m":-1}"#).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidLocation);
        let err = send("not json").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidLocation);
    }

    #[tokio::test]
    async fn photo_must_be_owned_and_approved() {
        let h = harness();
        let (a, b, m) = matched(&h).await;
        let (mine, theirs, pending) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        h.store.put_profile_photo(a, mine, true);
        h.store.put_profile_photo(b, theirs, true);
        h.store.put_profile_photo(a, pending, false);
        let cx = OpContext::new();
        let send = |photo: Option<Uuid>| {
            send_message(&h.core, &cx, a, m.id, MessageType::Photo, String::new(), photo)
        };

        send(Some(mine)).await.unwrap();
        for bad in [Some(theirs), Some(pending), None] {
            assert_eq!(send(bad).await.unwrap_err().code(), ErrorCode::InvalidAttachment);
        }
    }

    #[tokio::test]
    async fn gift_code_length_is_bounded() {
        let h = harness();
        let (a, _, m) = matched(&h).await;
        let cx = OpContext::new();
        let send = |code: String| send_message(&h.core, &cx, a, m.id, MessageType::Gift, code, None);

        send("ROSE-01".into()).await.unwrap();
        assert_eq!(send("  ".into()).await.unwrap_err().kind(), ErrorKind::InvalidContent);
        assert_eq!(send("g".repeat(65)).await.unwrap_err().kind(), ErrorKind::InvalidContent);
    }

    #[tokio::test]
    async fn classifier_thresholds_reject_or_report() {
        let h = harness();
        let (a, _, m) = matched(&h).await;

        h.classifier.set_score(0.95);
        assert_eq!(text(&h, a, &m, "awful").await.unwrap_err().kind(), ErrorKind::InvalidContent);

        h.classifier.set_score(0.75);
        let msg = text(&h, a, &m, "borderline").await.unwrap();
        assert!(msg.content_verified);
        let (reports, _) = h.core.store.list_reports(None, true, 0, 10).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].reporter_id, SYSTEM_PRINCIPAL);
        assert_eq!(reports[0].reported_user_id, a);
    }

    #[tokio::test]
    async fn classifier_outage_stores_unverified() {
        let h = harness();
        let (a, _, m) = matched(&h).await;
        h.classifier.set_failing(true);
        let msg = text(&h, a, &m, "hello").await.unwrap();
        assert!(!msg.content_verified);
    }

    #[tokio::test]
    async fn mark_read_counts_only_the_other_side_and_is_idempotent() {
        let h = harness();
        let (a, b, m) = matched(&h).await;
        let first = text(&h, a, &m, "one").await.unwrap();
        text(&h, a, &m, "two").await.unwrap();
        text(&h, b, &m, "three").await.unwrap();

        assert_eq!(unread_count(&h.core, b).await.unwrap(), 2);
        assert_eq!(mark_read(&h.core, &OpContext::new(), b, first.conversation_id).await.unwrap(), 2);
        assert_eq!(mark_read(&h.core, &OpContext::new(), b, first.conversation_id).await.unwrap(), 0);
        assert_eq!(unread_count(&h.core, b).await.unwrap(), 0);
        assert_eq!(unread_in_conversation(&h.core, a, first.conversation_id).await.unwrap(), 1);
        assert_eq!(h.events.count(routing_keys::MESSAGING_MESSAGES_READ), 1);
    }

    #[tokio::test]
    async fn cached_unread_count_is_invalidated_on_send() {
        let h = harness();
        let (a, b, m) = matched(&h).await;
        assert_eq!(unread_count(&h.core, b).await.unwrap(), 0);
        text(&h, a, &m, "ping").await.unwrap();
        assert_eq!(unread_count(&h.core, b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cursors_page_backwards_and_forwards() {
        let h = harness();
        let (a, _, m) = matched(&h).await;
        let mut sent = Vec::new();
        for n in 0..5 {
            sent.push(text(&h, a, &m, &format!("m{n}")).await.unwrap());
            h.advance(chrono::Duration::seconds(1));
        }
        let cid = sent[0].conversation_id;

        let latest = list_messages(&h.core, a, cid, &CursorParams::latest(2), None).await.unwrap();
        assert_eq!(latest.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), ["m4", "m3"]);

        let older = list_messages(&h.core, a, cid, &CursorParams::before(sent[3].created_at, 10), None)
            .await
            .unwrap();
        assert_eq!(older.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), ["m2", "m1", "m0"]);

        let newer = list_messages(&h.core, a, cid, &CursorParams::after(sent[1].created_at, 10), None)
            .await
            .unwrap();
        assert_eq!(newer.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), ["m2", "m3", "m4"]);

        let found = list_messages(&h.core, a, cid, &CursorParams::latest(10), Some("M3")).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn new_message_reopens_a_hidden_view() {
        let h = harness();
        let (a, b, m) = matched(&h).await;
        let msg = text(&h, a, &m, "hi").await.unwrap();

        let outcome = delete_conversation_view(&h.core, &OpContext::new(), b, msg.conversation_id).await.unwrap();
        assert_eq!(outcome, ViewDeletion::Hidden);
        assert!(list_conversations(&h.core, b).await.unwrap().is_empty());
        assert_eq!(
            get_conversation(&h.core, b, msg.conversation_id).await.unwrap_err().code(),
            ErrorCode::ConversationNotFound
        );

        text(&h, a, &m, "still there?").await.unwrap();
        let convs = list_conversations(&h.core, b).await.unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].unread_count, 2);
    }

    #[tokio::test]
    async fn inactive_match_refuses_messages() {
        let h = harness();
        let (a, b, m) = matched(&h).await;
        swipes::unmatch(&h.core, &OpContext::new(), a, m.id).await.unwrap();
        let err = text(&h, b, &m, "wait").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MatchInactive);
    }
}
