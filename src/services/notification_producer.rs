//! Notification hooks
//!
//! Offline delivery (push, email) is owned by a separate service. This side only
//! publishes notification events; the Kafka producer is used when brokers are
//! configured, otherwise events are logged.

use async_trait::async_trait;
use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationEventType {
    Message,
    ConversationInvite,
}

impl std::fmt::Display for NotificationEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationEventType::Message => write!(f, "message"),
            NotificationEventType::ConversationInvite => write!(f, "conversation_invite"),
        }
    }
}

/// One notification for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub recipient_id: Uuid,
    pub actor_id: Uuid,
    pub conversation_id: Uuid,
    pub message_id: Option<Uuid>,
    pub event_type: NotificationEventType,
    pub title: String,
    pub body: String,
}

impl NotificationRequest {
    pub fn new_message(
        recipient_id: Uuid,
        sender_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
        preview: &str,
    ) -> Self {
        Self {
            recipient_id,
            actor_id: sender_id,
            conversation_id,
            message_id: Some(message_id),
            event_type: NotificationEventType::Message,
            title: "New message".to_string(),
            body: preview.to_string(),
        }
    }

    pub fn added_to_conversation(
        recipient_id: Uuid,
        actor_id: Uuid,
        conversation_id: Uuid,
        title: Option<&str>,
    ) -> Self {
        Self {
            recipient_id,
            actor_id,
            conversation_id,
            message_id: None,
            event_type: NotificationEventType::ConversationInvite,
            title: "Added to conversation".to_string(),
            body: title.unwrap_or("You were added to a conversation").to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to serialize notification: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to publish to Kafka: {0}")]
    Publish(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), NotifyError>;
}

/// Wire format consumed by the notification service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaNotification {
    pub id: String,
    pub user_id: Uuid,
    pub event_type: NotificationEventType,
    pub title: String,
    pub body: String,
    pub data: Option<serde_json::Value>,
    pub timestamp: i64,
}

impl From<&NotificationRequest> for KafkaNotification {
    fn from(request: &NotificationRequest) -> Self {
        let mut data = serde_json::json!({
            "actor_id": request.actor_id.to_string(),
            "conversation_id": request.conversation_id.to_string(),
            "object_id": request.conversation_id.to_string(),
            "object_type": "conversation",
        });
        if let Some(message_id) = request.message_id {
            data["message_id"] = serde_json::Value::String(message_id.to_string());
        }
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: request.recipient_id,
            event_type: request.event_type,
            title: request.title.clone(),
            body: request.body.clone(),
            data: Some(data),
            timestamp: Utc::now().timestamp(),
        }
    }
}

#[derive(Clone)]
pub struct KafkaNotifier {
    producer: FutureProducer,
    topic: String,
}

impl KafkaNotifier {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, NotifyError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("retries", "3")
            .set("retry.backoff.ms", "100")
            .create()
            .map_err(|e| NotifyError::Publish(format!("failed to create producer: {e}")))?;

        tracing::info!(brokers = %brokers, topic = %topic, "KafkaNotifier initialized");

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
        let notification = KafkaNotification::from(request);
        let payload = serde_json::to_string(&notification)?;
        let key = notification.user_id.to_string();

        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok((partition, offset)) => {
                tracing::debug!(
                    user_id = %notification.user_id,
                    event_type = %notification.event_type,
                    partition = partition,
                    offset = offset,
                    "notification published"
                );
                Ok(())
            }
            Err((e, _)) => Err(NotifyError::Publish(e.to_string())),
        }
    }
}

/// Used when no broker is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
        tracing::info!(
            recipient_id = %request.recipient_id,
            conversation_id = %request.conversation_id,
            event_type = %request.event_type,
            "notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_payload_carries_conversation_and_message() {
        let request = NotificationRequest::new_message(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "hello",
        );
        let notification = KafkaNotification::from(&request);
        let data = notification.data.unwrap();

        assert_eq!(notification.user_id, request.recipient_id);
        assert_eq!(notification.body, "hello");
        assert_eq!(data["conversation_id"], request.conversation_id.to_string());
        assert_eq!(data["message_id"], request.message_id.unwrap().to_string());
    }

    #[test]
    fn invite_has_no_message_id() {
        let request = NotificationRequest::added_to_conversation(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Some("Team"),
        );
        let notification = KafkaNotification::from(&request);
        assert_eq!(notification.event_type.to_string(), "conversation_invite");
        assert!(notification.data.unwrap().get("message_id").is_none());
    }
}
