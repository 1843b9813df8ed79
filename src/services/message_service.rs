use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::{MessagingLimits, StorageDeadlines};
use crate::error::{AppError, AppResult};
use crate::middleware::guards::ConversationMember;
use crate::models::{
    ContentType, Conversation, ConversationStats, MediaInfo, Message, MessageView, NewMessage, Page,
    ReactionAction, ReactionKind, ReadOutcome,
};
use crate::repository::{with_deadline, MessageRepository};
use crate::services::conversation_service::ConversationService;

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub content: String,
    pub content_type: ContentType,
    pub media: Vec<MediaInfo>,
    pub reply_to_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct EditMessage {
    pub content: Option<String>,
    pub media: Option<Vec<MediaInfo>>,
}

/// Result of a mutation that may turn out to be a no-op.
#[derive(Debug, Clone)]
pub struct Mutation<T> {
    pub value: T,
    pub changed: bool,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub view: MessageView,
    /// Participants whose unread counter was bumped.
    pub recipients: Vec<Uuid>,
    pub conversation: Conversation,
}

/// Message store operations with their authorization and validation.
pub struct MessageService {
    repo: Arc<dyn MessageRepository>,
    conversations: Arc<ConversationService>,
    deadlines: StorageDeadlines,
    limits: MessagingLimits,
}

impl MessageService {
    pub fn new(
        repo: Arc<dyn MessageRepository>,
        conversations: Arc<ConversationService>,
        deadlines: StorageDeadlines,
        limits: MessagingLimits,
    ) -> Self {
        Self {
            repo,
            conversations,
            deadlines,
            limits,
        }
    }

    fn validate_body(&self, content: &str, media: &[MediaInfo]) -> AppResult<()> {
        if content.trim().is_empty() && media.is_empty() {
            return Err(AppError::BadRequest(
                "message needs content or media".into(),
            ));
        }
        if content.chars().count() > self.limits.max_content_length {
            return Err(AppError::BadRequest(format!(
                "content exceeds {} characters",
                self.limits.max_content_length
            )));
        }
        if media.iter().any(|m| m.url.trim().is_empty()) {
            return Err(AppError::BadRequest("media url must not be empty".into()));
        }
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> AppResult<Option<Message>> {
        with_deadline(self.deadlines.lookup, "load message", self.repo.get(id)).await
    }

    /// Message plus its conversation, visible only to participants.
    async fn load_for(&self, message_id: Uuid, user_id: Uuid) -> AppResult<(Message, Conversation)> {
        let message = self.fetch(message_id).await?.ok_or(AppError::NotFound)?;
        let conversation = self
            .conversations
            .load_for(message.conversation_id, user_id)
            .await?;
        Ok((message, conversation))
    }

    pub async fn send(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        request: SendMessage,
    ) -> AppResult<SentMessage> {
        self.validate_body(&request.content, &request.media)?;
        let conversation = self.conversations.load_for(conversation_id, sender_id).await?;

        if let Some(reply_to_id) = request.reply_to_id {
            let parent = self.fetch(reply_to_id).await?;
            if !parent.is_some_and(|p| p.conversation_id == conversation_id) {
                return Err(AppError::BadRequest(
                    "reply_to must reference a message in the same conversation".into(),
                ));
            }
        }

        let message = with_deadline(
            self.deadlines.write,
            "insert message",
            self.repo.insert(NewMessage {
                id: Uuid::new_v4(),
                conversation_id,
                sender_id,
                content: request.content,
                content_type: request.content_type,
                media: request.media,
                reply_to_id: request.reply_to_id,
                sent_at: Utc::now(),
            }),
        )
        .await?;

        let recipients = self
            .conversations
            .record_message(&conversation, &message)
            .await?;

        tracing::debug!(
            message_id = %message.id,
            conversation_id = %conversation_id,
            sequence_number = message.sequence_number,
            "message stored"
        );

        let view = self.enrich(vec![message]).await?.pop().ok_or_else(|| {
            AppError::Internal("stored message vanished during enrichment".into())
        })?;
        Ok(SentMessage {
            view,
            recipients,
            conversation,
        })
    }

    /// Sender only. Editing a deleted message is a no-op.
    pub async fn edit(
        &self,
        message_id: Uuid,
        actor: Uuid,
        request: EditMessage,
    ) -> AppResult<Mutation<MessageView>> {
        let (message, _) = self.load_for(message_id, actor).await?;
        if message.sender_id != actor {
            return Err(AppError::PermissionDenied(
                "only the sender can edit a message".into(),
            ));
        }
        if message.is_deleted() {
            return Ok(Mutation {
                value: self.single_view(message).await?,
                changed: false,
            });
        }
        if request.content.is_none() && request.media.is_none() {
            return Err(AppError::BadRequest("nothing to update".into()));
        }

        let content = request.content.as_deref().unwrap_or(&message.content);
        let media = request.media.as_deref().unwrap_or(&message.media);
        self.validate_body(content, media)?;

        let updated = with_deadline(
            self.deadlines.write,
            "edit message",
            self.repo
                .update_content(message_id, request.content, request.media, Utc::now()),
        )
        .await?;

        match updated {
            Some(updated) => Ok(Mutation {
                value: self.single_view(updated).await?,
                changed: true,
            }),
            // Deleted between the read and the write.
            None => {
                let current = self.fetch(message_id).await?.ok_or(AppError::NotFound)?;
                Ok(Mutation {
                    value: self.single_view(current).await?,
                    changed: false,
                })
            }
        }
    }

    /// Sender, or an admin of a group. Deleting twice is a no-op.
    pub async fn delete(&self, message_id: Uuid, actor: Uuid) -> AppResult<Mutation<MessageView>> {
        let (message, conversation) = self.load_for(message_id, actor).await?;
        let member = ConversationMember::verify(&conversation, actor)?;
        // The creator of a direct conversation is stored as admin but gets no
        // moderation rights over the other party.
        let allowed =
            message.sender_id == actor || (conversation.is_group() && member.is_admin());
        if !allowed {
            return Err(AppError::PermissionDenied(
                "only the sender or a group admin can delete a message".into(),
            ));
        }

        if message.is_deleted() {
            return Ok(Mutation {
                value: MessageView::bare(message),
                changed: false,
            });
        }

        let deleted = with_deadline(
            self.deadlines.write,
            "delete message",
            self.repo.soft_delete(message_id, Utc::now()),
        )
        .await?;

        let (message, changed) = match deleted {
            Some(m) => (m, true),
            None => (
                self.fetch(message_id).await?.ok_or(AppError::NotFound)?,
                false,
            ),
        };
        if changed {
            tracing::info!(message_id = %message_id, actor = %actor, "message deleted");
        }
        Ok(Mutation {
            value: MessageView::bare(message),
            changed,
        })
    }

    pub async fn react(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        kind: ReactionKind,
        action: ReactionAction,
    ) -> AppResult<MessageView> {
        let (message, _) = self.load_for(message_id, user_id).await?;
        if message.is_deleted() {
            return Err(AppError::NotFound);
        }
        let updated = with_deadline(
            self.deadlines.write,
            "adjust reaction",
            self.repo.adjust_reaction(message_id, kind, action),
        )
        .await?
        .ok_or(AppError::NotFound)?;
        self.single_view(updated).await
    }

    /// Marks every message up to `upto_message_id` as read by `user_id` and
    /// zeroes the caller's unread counter.
    pub async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        upto_message_id: Uuid,
    ) -> AppResult<ReadOutcome> {
        self.conversations.load_for(conversation_id, user_id).await?;
        let upto = self
            .fetch(upto_message_id)
            .await?
            .filter(|m| m.conversation_id == conversation_id)
            .ok_or(AppError::NotFound)?;

        let read_at = Utc::now();
        let message_ids = with_deadline(
            self.deadlines.scan,
            "append read receipts",
            self.repo
                .append_read_receipts(conversation_id, user_id, upto.sequence_number, read_at),
        )
        .await?;
        self.conversations
            .reset_unread(conversation_id, user_id, upto_message_id, read_at)
            .await?;

        Ok(ReadOutcome {
            conversation_id,
            user_id,
            up_to_message_id: upto_message_id,
            message_ids,
            read_at,
        })
    }

    /// Newest first.
    pub async fn list(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        page: Page,
    ) -> AppResult<Vec<MessageView>> {
        self.conversations.load_for(conversation_id, user_id).await?;
        let messages = with_deadline(
            self.deadlines.write,
            "list messages",
            self.repo
                .list_by_conversation(conversation_id, page.normalized()),
        )
        .await?;
        self.enrich(messages).await
    }

    pub async fn get(&self, message_id: Uuid, user_id: Uuid) -> AppResult<MessageView> {
        let (message, _) = self.load_for(message_id, user_id).await?;
        self.single_view(message).await
    }

    /// Searches one conversation, or every conversation of the caller.
    pub async fn search(
        &self,
        user_id: Uuid,
        query: &str,
        conversation_id: Option<Uuid>,
        page: Page,
    ) -> AppResult<Vec<MessageView>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::BadRequest("search query must not be empty".into()));
        }
        let scope = match conversation_id {
            Some(id) => {
                self.conversations.load_for(id, user_id).await?;
                vec![id]
            }
            None => self.conversations.ids_for_user(user_id).await?,
        };
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let messages = with_deadline(
            self.deadlines.scan,
            "search messages",
            self.repo.search(&scope, query, page.normalized()),
        )
        .await?;
        self.enrich(messages).await
    }

    pub async fn stats(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<ConversationStats> {
        let conversation = self.conversations.load_for(conversation_id, user_id).await?;
        let content_types = with_deadline(
            self.deadlines.scan,
            "content type counts",
            self.repo.content_type_counts(conversation_id),
        )
        .await?;
        Ok(ConversationStats {
            conversation_id,
            participant_count: conversation.participants.len(),
            admin_count: conversation.admin_count(),
            message_count: conversation.message_count,
            unread_count: conversation
                .participant(user_id)
                .map_or(0, |p| p.unread_count),
            content_types,
        })
    }

    async fn single_view(&self, message: Message) -> AppResult<MessageView> {
        self.enrich(vec![message])
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal("message vanished during enrichment".into()))
    }

    /// Attaches reply summaries (active parents in the same conversation) and
    /// sender summaries. Directory failures only drop the sender summaries.
    async fn enrich(&self, messages: Vec<Message>) -> AppResult<Vec<MessageView>> {
        let reply_ids: Vec<Uuid> = messages
            .iter()
            .filter_map(|m| m.reply_to_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let parents: HashMap<Uuid, Message> = if reply_ids.is_empty() {
            HashMap::new()
        } else {
            with_deadline(
                self.deadlines.lookup,
                "load reply targets",
                self.repo.get_many(&reply_ids),
            )
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect()
        };

        let sender_ids: Vec<Uuid> = messages
            .iter()
            .map(|m| m.sender_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let senders = self.conversations.user_summaries(&sender_ids).await;

        Ok(messages
            .into_iter()
            .map(|message| {
                let reply_to = message
                    .reply_to_id
                    .and_then(|id| parents.get(&id))
                    .filter(|p| !p.is_deleted() && p.conversation_id == message.conversation_id)
                    .map(Message::summary);
                MessageView {
                    sender: senders.get(&message.sender_id).cloned(),
                    reply_to,
                    message,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversationKind;
    use crate::repository::{MemoryConversationRepository, MemoryMessageRepository};
    use crate::services::conversation_service::CreateConversation;
    use crate::services::user_directory::InMemoryUserDirectory;

    struct Fixture {
        messages: MessageService,
        conversation_id: Uuid,
        admin: Uuid,
        member: Uuid,
    }

    async fn fixture() -> Fixture {
        let conversations = Arc::new(ConversationService::new(
            Arc::new(MemoryConversationRepository::new()),
            Arc::new(InMemoryUserDirectory::open()),
            StorageDeadlines::default(),
            MessagingLimits::default(),
        ));
        let messages = MessageService::new(
            Arc::new(MemoryMessageRepository::new()),
            conversations.clone(),
            StorageDeadlines::default(),
            MessagingLimits::default(),
        );
        let (admin, member) = (Uuid::new_v4(), Uuid::new_v4());
        let (conv, _) = conversations
            .create(
                admin,
                CreateConversation {
                    kind: ConversationKind::Group,
                    participant_ids: vec![member],
                    title: Some("t".into()),
                    description: None,
                },
            )
            .await
            .unwrap();
        Fixture {
            messages,
            conversation_id: conv.id,
            admin,
            member,
        }
    }

    fn text(content: &str) -> SendMessage {
        SendMessage {
            content: content.into(),
            content_type: ContentType::Text,
            media: vec![],
            reply_to_id: None,
        }
    }

    #[tokio::test]
    async fn empty_and_oversized_content_is_rejected() {
        let f = fixture().await;
        let err = f
            .messages
            .send(f.member, f.conversation_id, text("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = f
            .messages
            .send(f.member, f.conversation_id, text(&"x".repeat(5001)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn reply_to_other_conversation_is_rejected() {
        let f = fixture().await;
        let mut req = text("hi");
        req.reply_to_id = Some(Uuid::new_v4());
        let err = f
            .messages
            .send(f.member, f.conversation_id, req)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn only_sender_edits_and_deleted_edit_is_noop() {
        let f = fixture().await;
        let sent = f
            .messages
            .send(f.member, f.conversation_id, text("draft"))
            .await
            .unwrap();
        let id = sent.view.message.id;

        let err = f
            .messages
            .edit(id, f.admin, EditMessage { content: Some("x".into()), media: None })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));

        // Group admin may delete someone else's message.
        let deleted = f.messages.delete(id, f.admin).await.unwrap();
        assert!(deleted.changed);

        let edit = f
            .messages
            .edit(id, f.member, EditMessage { content: Some("late".into()), media: None })
            .await
            .unwrap();
        assert!(!edit.changed);
        assert_eq!(edit.value.message.content, "draft");

        let again = f.messages.delete(id, f.member).await.unwrap();
        assert!(!again.changed);
    }

    #[tokio::test]
    async fn direct_creator_cannot_delete_peer_message() {
        let conversations = Arc::new(ConversationService::new(
            Arc::new(MemoryConversationRepository::new()),
            Arc::new(InMemoryUserDirectory::open()),
            StorageDeadlines::default(),
            MessagingLimits::default(),
        ));
        let messages = MessageService::new(
            Arc::new(MemoryMessageRepository::new()),
            conversations.clone(),
            StorageDeadlines::default(),
            MessagingLimits::default(),
        );
        let (creator, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let (conv, _) = conversations
            .create(
                creator,
                CreateConversation {
                    kind: ConversationKind::Direct,
                    participant_ids: vec![peer],
                    title: None,
                    description: None,
                },
            )
            .await
            .unwrap();

        let sent = messages.send(peer, conv.id, text("mine")).await.unwrap();
        let err = messages
            .delete(sent.view.message.id, creator)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn reacting_to_deleted_message_is_not_found() {
        let f = fixture().await;
        let sent = f
            .messages
            .send(f.member, f.conversation_id, text("hi"))
            .await
            .unwrap();
        let id = sent.view.message.id;

        let view = f
            .messages
            .react(id, f.admin, ReactionKind::Love, ReactionAction::Add)
            .await
            .unwrap();
        assert_eq!(view.message.reactions_count[&ReactionKind::Love], 1);

        f.messages.delete(id, f.member).await.unwrap();
        let err = f
            .messages
            .react(id, f.admin, ReactionKind::Love, ReactionAction::Add)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::NotFound);
    }

    #[tokio::test]
    async fn stats_count_content_types() {
        let f = fixture().await;
        f.messages
            .send(f.member, f.conversation_id, text("one"))
            .await
            .unwrap();
        f.messages
            .send(
                f.admin,
                f.conversation_id,
                SendMessage {
                    content: String::new(),
                    content_type: ContentType::Image,
                    media: vec![MediaInfo {
                        url: "https://cdn.example/p.png".into(),
                        media_type: "image/png".into(),
                        size: 10,
                    }],
                    reply_to_id: None,
                },
            )
            .await
            .unwrap();

        let stats = f.messages.stats(f.conversation_id, f.admin).await.unwrap();
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.unread_count, 1);
        assert_eq!(stats.content_types["text"], 1);
        assert_eq!(stats.content_types["image"], 1);
    }
}
