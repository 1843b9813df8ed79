pub mod conversation_service;
pub mod dispatcher;
pub mod message_service;
pub mod messaging;
pub mod notification_producer;
pub mod user_directory;

pub use conversation_service::{
    AddParticipantsReport, ConversationService, CreateConversation, ParticipantOutcome,
    RemovalOutcome,
};
pub use dispatcher::{DispatchError, DispatcherHandle, FanoutDispatcher};
pub use message_service::{EditMessage, MessageService, Mutation, SendMessage, SentMessage};
pub use messaging::MessagingFacade;
pub use notification_producer::{
    KafkaNotifier, LogNotifier, NotificationEventType, NotificationRequest, Notifier, NotifyError,
};
pub use user_directory::{HttpUserDirectory, InMemoryUserDirectory, UserDirectory};
