//! Messaging facade
//!
//! Every public operation runs the guarded store call, then hands the live
//! broadcast and notifications to the fan-out dispatcher and returns. A rejected
//! fan-out job is logged; it never fails the request.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::metrics;
use crate::models::{
    ConversationStats, ConversationView, MessageView, Page, ParticipantRole, ReactionAction,
    ReactionKind, ReadOutcome,
};
use crate::services::conversation_service::{
    AddParticipantsReport, ConversationService, CreateConversation, RemovalOutcome,
};
use crate::services::dispatcher::FanoutDispatcher;
use crate::services::message_service::{EditMessage, MessageService, SendMessage};
use crate::services::notification_producer::NotificationRequest;
use crate::websocket::{BroadcastHub, HubEvent};

#[derive(Clone)]
pub struct MessagingFacade {
    conversations: Arc<ConversationService>,
    messages: Arc<MessageService>,
    hub: BroadcastHub,
    fanout: FanoutDispatcher,
}

impl MessagingFacade {
    pub fn new(
        conversations: Arc<ConversationService>,
        messages: Arc<MessageService>,
        hub: BroadcastHub,
        fanout: FanoutDispatcher,
    ) -> Self {
        Self {
            conversations,
            messages,
            hub,
            fanout,
        }
    }

    pub fn conversations(&self) -> &ConversationService {
        &self.conversations
    }

    pub fn messages(&self) -> &MessageService {
        &self.messages
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    fn publish(&self, conversation_id: Uuid, event: HubEvent, exclude_user: Option<Uuid>) {
        let event_type = event.event_type();
        if let Err(e) = self.fanout.broadcast(conversation_id, event, exclude_user) {
            tracing::warn!(
                conversation_id = %conversation_id,
                event = event_type,
                error = %e,
                "live broadcast not queued"
            );
        }
    }

    fn notify(&self, request: NotificationRequest) {
        let recipient_id = request.recipient_id;
        if let Err(e) = self.fanout.notify(request) {
            tracing::warn!(recipient_id = %recipient_id, error = %e, "notification not queued");
        }
    }

    // ---- conversations ----

    /// Returns the view and whether a new conversation was stored.
    pub async fn create_conversation(
        &self,
        creator: Uuid,
        request: CreateConversation,
    ) -> AppResult<(ConversationView, bool)> {
        let (conversation, created) = self.conversations.create(creator, request).await?;
        if created {
            for participant in &conversation.participants {
                self.hub.subscribe_user(conversation.id, participant.user_id);
                if participant.user_id != creator {
                    self.notify(NotificationRequest::added_to_conversation(
                        participant.user_id,
                        creator,
                        conversation.id,
                        conversation.title.as_deref(),
                    ));
                }
            }
        }
        let view = self.conversations.view(&conversation, creator).await;
        Ok((view, created))
    }

    pub async fn list_conversations(&self, user_id: Uuid, page: Page) -> AppResult<Vec<ConversationView>> {
        let conversations = self.conversations.list(user_id, page).await?;
        Ok(self.conversations.views(&conversations, user_id).await)
    }

    pub async fn get_conversation(&self, id: Uuid, user_id: Uuid) -> AppResult<ConversationView> {
        let conversation = self.conversations.load_for(id, user_id).await?;
        Ok(self.conversations.view(&conversation, user_id).await)
    }

    pub async fn search_conversations(
        &self,
        user_id: Uuid,
        query: &str,
        page: Page,
    ) -> AppResult<Vec<ConversationView>> {
        let conversations = self.conversations.search(user_id, query, page).await?;
        Ok(self.conversations.views(&conversations, user_id).await)
    }

    pub async fn update_conversation(
        &self,
        id: Uuid,
        actor: Uuid,
        title: Option<String>,
        description: Option<String>,
    ) -> AppResult<ConversationView> {
        let conversation = self
            .conversations
            .update_details(id, actor, title, description)
            .await?;
        Ok(self.conversations.view(&conversation, actor).await)
    }

    pub async fn add_participants(
        &self,
        id: Uuid,
        actor: Uuid,
        user_ids: Vec<Uuid>,
    ) -> AppResult<AddParticipantsReport> {
        let report = self.conversations.add_participants(id, actor, user_ids).await?;
        for user_id in report.added() {
            self.hub.subscribe_user(id, user_id);
            self.notify(NotificationRequest::added_to_conversation(user_id, actor, id, None));
        }
        Ok(report)
    }

    pub async fn remove_participant(
        &self,
        id: Uuid,
        actor: Uuid,
        target: Uuid,
    ) -> AppResult<RemovalOutcome> {
        let outcome = self.conversations.remove_participant(id, actor, target).await?;
        self.hub.unsubscribe_user(id, target);
        Ok(outcome)
    }

    pub async fn leave_conversation(&self, id: Uuid, user_id: Uuid) -> AppResult<RemovalOutcome> {
        self.remove_participant(id, user_id, user_id).await
    }

    pub async fn update_role(
        &self,
        id: Uuid,
        actor: Uuid,
        target: Uuid,
        role: ParticipantRole,
    ) -> AppResult<ConversationView> {
        let conversation = self.conversations.update_role(id, actor, target, role).await?;
        Ok(self.conversations.view(&conversation, actor).await)
    }

    pub async fn set_muted(
        &self,
        id: Uuid,
        user_id: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<ConversationView> {
        let conversation = self.conversations.set_muted(id, user_id, muted, until).await?;
        Ok(self.conversations.view(&conversation, user_id).await)
    }

    pub async fn set_archived(&self, id: Uuid, user_id: Uuid, archived: bool) -> AppResult<ConversationView> {
        let conversation = self.conversations.set_archived(id, user_id, archived).await?;
        Ok(self.conversations.view(&conversation, user_id).await)
    }

    pub async fn unread_counts(&self, user_id: Uuid) -> AppResult<HashMap<Uuid, i64>> {
        self.conversations.unread_counts(user_id).await
    }

    pub async fn conversation_stats(&self, id: Uuid, user_id: Uuid) -> AppResult<ConversationStats> {
        self.messages.stats(id, user_id).await
    }

    // ---- messages ----

    pub async fn send_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        request: SendMessage,
    ) -> AppResult<MessageView> {
        let sent = self.messages.send(sender_id, conversation_id, request).await?;
        metrics::MESSAGES_SENT.inc();

        let preview = sent.view.message.preview();
        let message_id = sent.view.message.id;
        self.publish(
            conversation_id,
            HubEvent::MessageNew(sent.view.clone()),
            Some(sender_id),
        );
        for recipient_id in &sent.recipients {
            self.notify(NotificationRequest::new_message(
                *recipient_id,
                sender_id,
                conversation_id,
                message_id,
                &preview,
            ));
        }
        Ok(sent.view)
    }

    pub async fn edit_message(
        &self,
        message_id: Uuid,
        actor: Uuid,
        request: EditMessage,
    ) -> AppResult<MessageView> {
        let edited = self.messages.edit(message_id, actor, request).await?;
        if edited.changed {
            self.publish(
                edited.value.message.conversation_id,
                HubEvent::MessageUpdated(edited.value.clone()),
                Some(actor),
            );
        }
        Ok(edited.value)
    }

    pub async fn delete_message(&self, message_id: Uuid, actor: Uuid) -> AppResult<MessageView> {
        let deleted = self.messages.delete(message_id, actor).await?;
        if deleted.changed {
            self.publish(
                deleted.value.message.conversation_id,
                HubEvent::MessageDeleted(deleted.value.clone()),
                Some(actor),
            );
        }
        Ok(deleted.value)
    }

    pub async fn react(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
        action: ReactionAction,
    ) -> AppResult<MessageView> {
        let view = self.messages.react(message_id, user_id, kind, action).await?;
        self.publish(
            view.message.conversation_id,
            HubEvent::MessageUpdated(view.clone()),
            Some(user_id),
        );
        Ok(view)
    }

    pub async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        upto_message_id: Uuid,
    ) -> AppResult<ReadOutcome> {
        let outcome = self
            .messages
            .mark_read(conversation_id, user_id, upto_message_id)
            .await?;
        if !outcome.message_ids.is_empty() {
            self.publish(
                conversation_id,
                HubEvent::MessageRead(outcome.clone()),
                Some(user_id),
            );
        }
        Ok(outcome)
    }

    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        page: Page,
    ) -> AppResult<Vec<MessageView>> {
        self.messages.list(conversation_id, user_id, page).await
    }

    pub async fn get_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<MessageView> {
        self.messages.get(message_id, user_id).await
    }

    pub async fn search_messages(
        &self,
        user_id: Uuid,
        query: &str,
        conversation_id: Option<Uuid>,
        page: Page,
    ) -> AppResult<Vec<MessageView>> {
        self.messages
            .search(user_id, query, conversation_id, page)
            .await
    }
}
