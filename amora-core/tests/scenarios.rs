use std::collections::HashSet;

use uuid::Uuid;

use amora_core::conversations;
use amora_core::ephemeral::{self, UploadPhoto};
use amora_core::model::{MessageType, ReportReason, ReviewAction, SanctionKind, SwipeDirection};
use amora_core::moderation::appeals::{self, SubmitAppeal};
use amora_core::moderation::reports::{self, ReviewReport, SubmitReport};
use amora_core::moderation::sanctions::SanctionRequest;
use amora_core::testing::{harness, harness_with};
use amora_core::{blocks, swipes, CoreConfig, OpContext};
use amora_shared::types::event::routing_keys;
use amora_shared::{AdminRole, ErrorCode, ErrorKind};

fn single_view_photo() -> UploadPhoto {
    UploadPhoto {
        content_type: "image/jpeg".into(),
        size_bytes: 200_000,
        max_views: 1,
        duration_secs: Some(60),
        with_thumbnail: false,
    }
}

#[tokio::test]
async fn reciprocal_likes_create_one_match() {
    let h = harness();
    let (u1, u2) = (h.user(1).await, h.user(2).await);
    let cx = OpContext::new();

    let first = swipes::record_swipe(&h.core, &cx, u1, u2, SwipeDirection::Like).await.unwrap();
    assert!(first.matched.is_none());

    let second = swipes::record_swipe(&h.core, &cx, u2, u1, SwipeDirection::Like).await.unwrap();
    let m = second.matched.expect("reciprocal like matches");
    assert_eq!((m.user1_id, m.user2_id), (u1, u2));
    assert!(m.is_active);
    assert_eq!(h.events.count(routing_keys::MATCHING_MATCH_CREATED), 1);

    let err = swipes::record_swipe(&h.core, &cx, u1, u2, SwipeDirection::Like).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadySwiped);
    assert_eq!(h.events.count(routing_keys::MATCHING_MATCH_CREATED), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_likes_create_exactly_one_match() {
    for _ in 0..25 {
        let h = harness();
        let (u1, u2) = (h.user(1).await, h.user(2).await);

        let (core_a, core_b) = (h.core.clone(), h.core.clone());
        let a = tokio::spawn(async move {
            swipes::record_swipe(&core_a, &OpContext::new(), u1, u2, SwipeDirection::Like).await
        });
        let b = tokio::spawn(async move {
            swipes::record_swipe(&core_b, &OpContext::new(), u2, u1, SwipeDirection::SuperLike).await
        });
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

        let ids: HashSet<Uuid> = [a.matched, b.matched].into_iter().flatten().map(|m| m.id).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(swipes::list_matches(&h.core, u1, false).await.unwrap().len(), 1);
        assert_eq!(h.events.count(routing_keys::MATCHING_MATCH_CREATED), 1);
    }
}

#[tokio::test]
async fn single_view_photo_expires_after_first_viewer() {
    let h = harness();
    let (u1, u2, u3) = (h.user(1).await, h.user(2).await, h.user(3).await);
    let cx = OpContext::new();

    let uploaded = ephemeral::upload_photo(&h.core, &cx, u1, single_view_photo()).await.unwrap();

    let access = ephemeral::view_photo(&h.core, &cx, &uploaded.access_key, u2, None, None).await.unwrap();
    assert!(access.is_viewed);
    assert!(!access.url.is_empty());

    let err = ephemeral::view_photo(&h.core, &cx, &uploaded.access_key, u3, None, None).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PhotoExpired);
    assert_eq!(err.kind(), ErrorKind::Expired);

    let status = ephemeral::photo_status(&h.core, u1, uploaded.photo.id).await.unwrap();
    assert!(status.is_expired);
    assert_eq!(status.view_count, 1);
    assert_eq!(ephemeral::list_photo_views(&h.core, u1, uploaded.photo.id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_viewers_never_exceed_max_views() {
    let h = harness();
    let owner = h.user(1).await;
    let mut viewers = Vec::new();
    for n in 10..30 {
        viewers.push(h.user(n).await);
    }
    let req = UploadPhoto { max_views: 3, ..single_view_photo() };
    let uploaded = ephemeral::upload_photo(&h.core, &OpContext::new(), owner, req).await.unwrap();

    let mut tasks = Vec::new();
    for viewer in viewers {
        let core = h.core.clone();
        let key = uploaded.access_key.clone();
        tasks.push(tokio::spawn(async move {
            ephemeral::view_photo(&core, &OpContext::new(), &key, viewer, None, None).await
        }));
    }
    let mut granted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => granted += 1,
            Err(e) => assert_eq!(e.code(), ErrorCode::PhotoExpired),
        }
    }

    assert_eq!(granted, 3);
    let status = ephemeral::photo_status(&h.core, owner, uploaded.photo.id).await.unwrap();
    assert_eq!(status.view_count, 3);
    assert_eq!(ephemeral::list_photo_views(&h.core, owner, uploaded.photo.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn report_ban_and_approved_appeal() {
    let h = harness();
    let (u1, u2, u3) = (h.user(1).await, h.user(2).await, h.user(3).await);
    let moderator = h.admin(50, AdminRole::SeniorModerator).await;
    let senior = h.admin(51, AdminRole::SeniorModerator).await;
    let cx = OpContext::new();

    swipes::record_swipe(&h.core, &cx, u2, u3, SwipeDirection::Like).await.unwrap();
    let m = swipes::record_swipe(&h.core, &cx, u3, u2, SwipeDirection::Like).await.unwrap().matched.unwrap();

    let report = reports::submit_report(
        &h.core,
        &cx,
        u1,
        SubmitReport {
            reported_user_id: u2,
            reason: ReportReason::Harassment,
            description: Some("repeated insults".into()),
            content_ref: None,
        },
    )
    .await
    .unwrap();

    let review = ReviewReport {
        action: ReviewAction::Resolve,
        reason: "verified".into(),
        notes: None,
        sanction: Some(SanctionRequest {
            kind: SanctionKind::Ban,
            reason: "harassment".into(),
            duration: Some("7d".into()),
        }),
    };
    let outcome = reports::review_report(&h.core, &cx, moderator, report.id, review).await.unwrap();
    let applied = outcome.sanction.expect("ban applied");
    assert_eq!(applied.sanction.kind, SanctionKind::Ban);
    let expires = applied.sanction.expires_at.expect("finite ban");
    assert_eq!(expires - applied.sanction.created_at, chrono::Duration::days(7));
    assert!(h.core.require_user(u2).await.unwrap().is_banned);
    assert!(!swipes::get_match(&h.core, u3, m.id).await.unwrap().is_active);

    let appeal = appeals::submit_appeal(
        &h.core,
        &cx,
        u2,
        SubmitAppeal {
            sanction_id: applied.sanction.id,
            reason: "false accusation".into(),
            description: "those messages were quoted out of context".into(),
        },
    )
    .await
    .unwrap();

    let reviewed = appeals::review_appeal(&h.core, &cx, senior, appeal.id, true, Some("insufficient evidence"))
        .await
        .unwrap();
    assert!(reviewed.lifted.is_some());
    assert!(!h.core.require_user(u2).await.unwrap().is_banned);
    assert!(!swipes::get_match(&h.core, u3, m.id).await.unwrap().is_active);

    swipes::request_rematch(&h.core, &cx, u2, m.id).await.unwrap();
    let rematched = swipes::request_rematch(&h.core, &cx, u3, m.id).await.unwrap();
    assert!(rematched.is_active);
}

#[tokio::test]
async fn block_stops_swipes_and_messages_but_keeps_the_match() {
    let h = harness();
    let (u1, u2) = (h.user(1).await, h.user(2).await);
    let cx = OpContext::new();

    swipes::record_swipe(&h.core, &cx, u1, u2, SwipeDirection::Like).await.unwrap();
    let m = swipes::record_swipe(&h.core, &cx, u2, u1, SwipeDirection::Like).await.unwrap().matched.unwrap();
    conversations::send_message(&h.core, &cx, u1, m.id, MessageType::Text, "hey".into(), None).await.unwrap();

    blocks::block(&h.core, &cx, u1, u2, None).await.unwrap();

    let err = conversations::send_message(&h.core, &cx, u2, m.id, MessageType::Text, "hi".into(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(swipes::get_match(&h.core, u1, m.id).await.unwrap().is_active);

    let (u3, u4) = (h.user(3).await, h.user(4).await);
    blocks::block(&h.core, &cx, u3, u4, Some("spam".into())).await.unwrap();
    let err = swipes::record_swipe(&h.core, &cx, u3, u4, SwipeDirection::Like).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Blocked);
    let err = swipes::record_swipe(&h.core, &cx, u4, u3, SwipeDirection::Like).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Blocked);
}

#[tokio::test]
async fn unblock_then_block_again_restores_state() {
    let h = harness();
    let (u1, u2) = (h.user(1).await, h.user(2).await);
    let cx = OpContext::new();

    blocks::block(&h.core, &cx, u1, u2, None).await.unwrap();
    assert!(blocks::is_blocked(&h.core, u1, u2).await.unwrap());
    blocks::unblock(&h.core, &cx, u1, u2).await.unwrap();
    assert!(!blocks::is_blocked_either(&h.core, u1, u2).await.unwrap());

    blocks::block(&h.core, &cx, u1, u2, None).await.unwrap();
    assert!(blocks::is_blocked(&h.core, u1, u2).await.unwrap());
    assert!(!blocks::is_blocked(&h.core, u2, u1).await.unwrap());
    assert_eq!(blocks::list_blocked(&h.core, u1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sixth_report_in_a_day_is_rate_limited() {
    let mut config = CoreConfig::default();
    config.moderation.rate_limit.reports_per_day = 5;
    let h = harness_with(config);
    let reporter = h.user(1).await;
    let cx = OpContext::new();

    for n in 0..6u128 {
        let target = h.user(100 + n).await;
        let result = reports::submit_report(
            &h.core,
            &cx,
            reporter,
            SubmitReport { reported_user_id: target, reason: ReportReason::Spam, description: None, content_ref: None },
        )
        .await;

        if n < 5 {
            result.unwrap();
        } else {
            let err = result.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::RateLimited);
            assert!(err.retry_after_secs().is_some_and(|s| s > 0));
        }
        h.advance(chrono::Duration::hours(1));
    }
}

#[tokio::test]
async fn messages_keep_per_conversation_order() {
    let h = harness();
    let (u1, u2) = (h.user(1).await, h.user(2).await);
    let cx = OpContext::new();
    swipes::record_swipe(&h.core, &cx, u1, u2, SwipeDirection::Like).await.unwrap();
    let m = swipes::record_swipe(&h.core, &cx, u2, u1, SwipeDirection::Like).await.unwrap().matched.unwrap();

    for (sender, text) in [(u1, "one"), (u2, "two"), (u1, "three")] {
        conversations::send_message(&h.core, &cx, sender, m.id, MessageType::Text, text.into(), None).await.unwrap();
    }

    let summary = conversations::list_conversations(&h.core, u2).await.unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].unread_count, 2);

    let conversation_id = summary[0].conversation.id;
    assert_eq!(conversations::mark_read(&h.core, &cx, u2, conversation_id).await.unwrap(), 2);
    assert_eq!(conversations::mark_read(&h.core, &cx, u2, conversation_id).await.unwrap(), 0);
    assert_eq!(conversations::unread_count(&h.core, u2).await.unwrap(), 0);
    assert_eq!(conversations::unread_count(&h.core, u1).await.unwrap(), 1);
}
