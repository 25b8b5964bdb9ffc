use async_trait::async_trait;
use uuid::Uuid;

use amora_shared::clients::rabbitmq::RabbitMQClient;
use amora_shared::types::event::{payloads, routing_keys};
use amora_shared::Event;

use crate::events::{EventEnvelope, EVENT_SOURCE};
use crate::ports::*;

#[derive(Clone)]
pub struct RabbitEventSink {
    rabbitmq: RabbitMQClient,
}

impl RabbitEventSink {
    pub fn new(rabbitmq: RabbitMQClient) -> Self {
        Self { rabbitmq }
    }
}

#[async_trait]
impl EventSink for RabbitEventSink {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PortError> {
        self.rabbitmq
            .publish(envelope.routing_key, &envelope.event)
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))
    }
}

/// Hands notification requests to the notification service over the broker.
#[derive(Clone)]
pub struct RabbitNotifier {
    rabbitmq: RabbitMQClient,
}

impl RabbitNotifier {
    pub fn new(rabbitmq: RabbitMQClient) -> Self {
        Self { rabbitmq }
    }
}

#[async_trait]
impl Notifier for RabbitNotifier {
    async fn notify(&self, user_id: Uuid, kind: &str, payload: serde_json::Value) -> Result<(), PortError> {
        let event = Event::new(
            EVENT_SOURCE,
            routing_keys::NOTIFICATION_REQUESTED,
            payloads::NotificationRequested {
                user_id,
                kind: kind.to_string(),
                payload,
            },
        )
        .with_user(user_id);

        self.rabbitmq
            .publish(routing_keys::NOTIFICATION_REQUESTED, &event)
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))
    }
}
