//! Shared harness: in-memory stores, a recording notifier and token minting.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use actix_middleware::Claims;
use async_trait::async_trait;
use chat_core::config::{
    Config, FanoutConfig, HubConfig, MessagingLimits, StorageDeadlines,
};
use chat_core::models::{ContentType, ConversationKind};
use chat_core::repository::{MemoryConversationRepository, MemoryMessageRepository};
use chat_core::services::{
    CreateConversation, DispatcherHandle, InMemoryUserDirectory, NotificationRequest, Notifier,
    NotifyError, SendMessage,
};
use chat_core::state::AppState;
use jsonwebtoken::{encode, EncodingKey, Header};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-test-secret-integration-test";

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<NotificationRequest>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
        self.sent.lock().await.push(request.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub dispatcher: Option<DispatcherHandle>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        jwt_secret: JWT_SECRET.to_string(),
        database_url: None,
        database_max_connections: 1,
        deadlines: StorageDeadlines::default(),
        limits: MessagingLimits::default(),
        hub: HubConfig {
            connection_buffer: 64,
            max_connections_per_user: 3,
        },
        fanout: FanoutConfig {
            workers: 2,
            queue_capacity: 256,
            ..FanoutConfig::default()
        },
        kafka: None,
        user_directory_url: None,
        log_json: false,
    }
}

impl TestApp {
    /// Must be called from inside a tokio runtime.
    pub fn new() -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let (state, dispatcher) = AppState::build(
            Arc::new(test_config()),
            Arc::new(MemoryConversationRepository::new()),
            Arc::new(MemoryMessageRepository::new()),
            Arc::new(InMemoryUserDirectory::open()),
            notifier.clone(),
        );
        Self {
            state,
            dispatcher: Some(dispatcher),
            notifier,
        }
    }

    /// Drains every queued fan-out job; the app accepts no more fan-out afterwards.
    pub async fn drain(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            self.state.fanout.shutdown(handle).await;
        }
    }
}

pub fn group_of(ids: &[Uuid], title: &str) -> CreateConversation {
    CreateConversation {
        kind: ConversationKind::Group,
        participant_ids: ids.to_vec(),
        title: Some(title.to_string()),
        description: None,
    }
}

pub fn direct_with(other: Uuid) -> CreateConversation {
    CreateConversation {
        kind: ConversationKind::Direct,
        participant_ids: vec![other],
        title: None,
        description: None,
    }
}

pub fn text(content: &str) -> SendMessage {
    SendMessage {
        content: content.to_string(),
        content_type: ContentType::Text,
        media: Vec::new(),
        reply_to_id: None,
    }
}

pub fn reply(content: &str, reply_to_id: Uuid) -> SendMessage {
    SendMessage {
        reply_to_id: Some(reply_to_id),
        ..text(content)
    }
}

pub fn token_for(user_id: Uuid) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + 600,
        iat: Some(now),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to sign test token")
}
