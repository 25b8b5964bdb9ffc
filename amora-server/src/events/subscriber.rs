use std::sync::Arc;

use futures_lite::StreamExt;
use lapin::options::BasicAckOptions;
use lapin::Consumer;
use tokio_util::sync::CancellationToken;

use amora_core::identity;
use amora_shared::clients::rabbitmq::QueueMode;
use amora_shared::types::event::{payloads, routing_keys, Event};

use crate::socket::handlers::user_room;
use crate::AppState;

/// Socket.IO event name for each routing key delivered over the push channel.
pub fn push_event_name(routing_key: &str) -> Option<&'static str> {
    match routing_key {
        routing_keys::MESSAGING_MESSAGE_APPENDED => Some("message_appended"),
        routing_keys::MATCHING_MATCH_CREATED => Some("match_created"),
        routing_keys::EPHEMERAL_PHOTO_VIEWED => Some("ephemeral_photo_viewed"),
        routing_keys::MODERATION_REPORT_RESOLVED => Some("report_resolved"),
        routing_keys::MODERATION_SANCTION_APPLIED => Some("sanction_applied"),
        _ => None,
    }
}

async fn next_delivery(
    consumer: &mut Consumer,
    cancel: &CancellationToken,
) -> Option<Result<lapin::message::Delivery, lapin::Error>> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        delivery = consumer.next() => delivery,
    }
}

/// Keeps the identity projection in step with registrations.
pub async fn listen_user_registered(state: Arc<AppState>, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut consumer = state
        .rabbitmq
        .subscribe(
            "amora-interactions.auth.user.registered",
            &[routing_keys::AUTH_USER_REGISTERED],
            QueueMode::Durable,
        )
        .await?;

    tracing::info!("listening for user.registered events");

    while let Some(delivery) = next_delivery(&mut consumer, &cancel).await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::error!(error = %e, "consumer error");
                continue;
            }
        };

        match serde_json::from_slice::<Event<payloads::UserRegistered>>(&delivery.data) {
            Ok(event) => {
                if let Err(e) = identity::upsert_user(&state.core, event.data.user_id).await {
                    tracing::error!(error = %e, user_id = %event.data.user_id, "failed to project registered user");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to deserialize user.registered event");
            }
        }
        let _ = delivery.ack(BasicAckOptions::default()).await;
    }

    tracing::info!("user.registered subscriber stopped");
    Ok(())
}

/// Every replica consumes every domain event on its own queue and emits the
/// ones meant for the push channel to the recipients' rooms.
pub async fn listen_push_fanout(state: Arc<AppState>, cancel: CancellationToken) -> anyhow::Result<()> {
    let queue = format!("amora-interactions.push.{}", state.config.instance_id);
    let mut consumer = state
        .rabbitmq
        .subscribe(&queue, &[routing_keys::ALL_DOMAIN_EVENTS], QueueMode::Exclusive)
        .await?;

    tracing::info!(queue = %queue, "listening for push events");

    while let Some(delivery) = next_delivery(&mut consumer, &cancel).await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::error!(error = %e, "consumer error");
                continue;
            }
        };

        if let Some(name) = push_event_name(delivery.routing_key.as_str()) {
            match serde_json::from_slice::<Event<serde_json::Value>>(&delivery.data) {
                Ok(event) => {
                    for recipient in &event.recipients {
                        let result = state.io.to(user_room(*recipient)).emit(name, &event);
                        tracing::debug!(
                            event_id = %event.id,
                            recipient = %recipient,
                            event = name,
                            success = result.is_ok(),
                            "push event emitted"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        routing_key = %delivery.routing_key.as_str(),
                        "failed to deserialize push event"
                    );
                }
            }
        }
        let _ = delivery.ack(BasicAckOptions::default()).await;
    }

    tracing::info!("push fan-out subscriber stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_client_facing_events_are_pushed() {
        assert_eq!(push_event_name(routing_keys::MATCHING_MATCH_CREATED), Some("match_created"));
        assert_eq!(push_event_name(routing_keys::MESSAGING_MESSAGE_APPENDED), Some("message_appended"));
        assert_eq!(push_event_name(routing_keys::MODERATION_SANCTION_APPLIED), Some("sanction_applied"));
        assert_eq!(push_event_name(routing_keys::BLOCKS_BLOCK_CREATED), None);
        assert_eq!(push_event_name(routing_keys::NOTIFICATION_REQUESTED), None);
    }
}
