//! In-process storage backend.
//!
//! Each mutation runs under one write lock and touches only the fields it
//! changes, mirroring the targeted updates of the PostgreSQL backend.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AddStatus, ConversationRepository, MessageRepository, RosterWrite};
use crate::error::AppResult;
use crate::models::{
    Conversation, LastMessageRef, Lifecycle, MediaInfo, Message, MessageState, NewMessage, Page,
    Participant, ParticipantRole, ReactionAction, ReactionKind,
};

#[derive(Default)]
struct ConversationTable {
    by_id: HashMap<Uuid, Conversation>,
    direct: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct MemoryConversationRepository {
    inner: RwLock<ConversationTable>,
}

impl MemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn active_for(conversation: &Conversation, user_id: Uuid) -> bool {
    !conversation.is_deleted() && conversation.participant(user_id).is_some()
}

fn page_of<T>(items: Vec<T>, page: Page) -> Vec<T> {
    items.into_iter().skip(page.skip()).take(page.take()).collect()
}

fn recent_first(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl ConversationRepository for MemoryConversationRepository {
    async fn insert(&self, conversation: Conversation) -> AppResult<Conversation> {
        let mut table = self.inner.write().await;

        if let Some(key) = conversation.direct_key() {
            if let Some(existing) = table.direct.get(&key).and_then(|id| table.by_id.get(id)) {
                if !existing.is_deleted() {
                    return Ok(existing.clone());
                }
            }
            table.direct.insert(key, conversation.id);
        }

        table.by_id.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid, page: Page) -> AppResult<Vec<Conversation>> {
        let table = self.inner.read().await;
        let mut found: Vec<Conversation> = table
            .by_id
            .values()
            .filter(|c| active_for(c, user_id))
            .cloned()
            .collect();
        recent_first(&mut found);
        Ok(page_of(found, page))
    }

    async fn ids_for_user(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let table = self.inner.read().await;
        Ok(table
            .by_id
            .values()
            .filter(|c| active_for(c, user_id))
            .map(|c| c.id)
            .collect())
    }

    async fn search_for_user(
        &self,
        user_id: Uuid,
        query: &str,
        page: Page,
    ) -> AppResult<Vec<Conversation>> {
        let needle = query.to_lowercase();
        let matches = |text: &Option<String>| {
            text.as_deref()
                .map_or(false, |t| t.to_lowercase().contains(&needle))
        };

        let table = self.inner.read().await;
        let mut found: Vec<Conversation> = table
            .by_id
            .values()
            .filter(|c| active_for(c, user_id))
            .filter(|c| matches(&c.title) || matches(&c.description))
            .cloned()
            .collect();
        recent_first(&mut found);
        Ok(page_of(found, page))
    }

    async fn update_details(
        &self,
        id: Uuid,
        title: Option<String>,
        description: Option<String>,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut table = self.inner.write().await;
        if let Some(conversation) = table.by_id.get_mut(&id) {
            if let Some(title) = title {
                conversation.title = Some(title);
            }
            if let Some(description) = description {
                conversation.description = Some(description);
            }
            conversation.updated_at = at;
        }
        Ok(())
    }

    async fn add_participants(
        &self,
        id: Uuid,
        participants: Vec<Participant>,
        max_roster: usize,
    ) -> AppResult<Vec<(Uuid, AddStatus)>> {
        let mut table = self.inner.write().await;
        let Some(conversation) = table.by_id.get_mut(&id) else {
            return Ok(Vec::new());
        };

        let mut results = Vec::with_capacity(participants.len());
        let mut changed = false;
        for participant in participants {
            let user_id = participant.user_id;
            let status = if conversation.participant(user_id).is_some() {
                AddStatus::AlreadyParticipant
            } else if conversation.participants.len() >= max_roster {
                AddStatus::LimitExceeded
            } else {
                conversation.participants.push(participant);
                changed = true;
                AddStatus::Added
            };
            results.push((user_id, status));
        }

        if changed {
            conversation.roster_version += 1;
            conversation.updated_at = Utc::now();
        }
        Ok(results)
    }

    async fn remove_participant(
        &self,
        id: Uuid,
        user_id: Uuid,
        expected_version: i64,
    ) -> AppResult<RosterWrite> {
        let mut table = self.inner.write().await;
        let Some(conversation) = table.by_id.get_mut(&id) else {
            return Ok(RosterWrite::Missing);
        };
        if conversation.roster_version != expected_version {
            return Ok(RosterWrite::Stale);
        }

        let before = conversation.participants.len();
        conversation.participants.retain(|p| p.user_id != user_id);
        if conversation.participants.len() == before {
            return Ok(RosterWrite::Missing);
        }
        conversation.roster_version += 1;
        conversation.updated_at = Utc::now();
        Ok(RosterWrite::Applied)
    }

    async fn update_role(
        &self,
        id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
        expected_version: i64,
    ) -> AppResult<RosterWrite> {
        let mut table = self.inner.write().await;
        let Some(conversation) = table.by_id.get_mut(&id) else {
            return Ok(RosterWrite::Missing);
        };
        if conversation.roster_version != expected_version {
            return Ok(RosterWrite::Stale);
        }
        let Some(participant) = conversation.participant_mut(user_id) else {
            return Ok(RosterWrite::Missing);
        };

        participant.role = role;
        conversation.roster_version += 1;
        conversation.updated_at = Utc::now();
        Ok(RosterWrite::Applied)
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let mut table = self.inner.write().await;
        let direct_key = match table.by_id.get_mut(&id) {
            Some(conversation) if !conversation.is_deleted() => {
                conversation.lifecycle = Lifecycle::Deleted { at };
                conversation.updated_at = at;
                conversation.direct_key()
            }
            _ => None,
        };
        if let Some(key) = direct_key {
            table.direct.remove(&key);
        }
        Ok(())
    }

    async fn set_muted(
        &self,
        id: Uuid,
        user_id: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<bool> {
        let mut table = self.inner.write().await;
        let participant = table
            .by_id
            .get_mut(&id)
            .and_then(|c| c.participant_mut(user_id));
        Ok(match participant {
            Some(p) => {
                p.muted = muted;
                p.muted_until = if muted { until } else { None };
                true
            }
            None => false,
        })
    }

    async fn set_archived(&self, id: Uuid, user_id: Uuid, archived: bool) -> AppResult<bool> {
        let mut table = self.inner.write().await;
        let participant = table
            .by_id
            .get_mut(&id)
            .and_then(|c| c.participant_mut(user_id));
        Ok(match participant {
            Some(p) => {
                p.archived = archived;
                true
            }
            None => false,
        })
    }

    async fn record_message(
        &self,
        id: Uuid,
        last: &LastMessageRef,
        recipients: &[Uuid],
    ) -> AppResult<()> {
        let mut table = self.inner.write().await;
        let Some(conversation) = table.by_id.get_mut(&id) else {
            return Ok(());
        };

        conversation.message_count += 1;
        if conversation.apply_last_message(last.clone()) {
            conversation.updated_at = conversation.updated_at.max(last.sent_at);
        }
        for participant in conversation
            .participants
            .iter_mut()
            .filter(|p| recipients.contains(&p.user_id))
        {
            participant.unread_count += 1;
        }
        Ok(())
    }

    async fn reset_unread(
        &self,
        id: Uuid,
        user_id: Uuid,
        upto_message_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut table = self.inner.write().await;
        if let Some(p) = table
            .by_id
            .get_mut(&id)
            .and_then(|c| c.participant_mut(user_id))
        {
            p.unread_count = 0;
            p.last_read_message_id = Some(upto_message_id);
            p.last_read_at = Some(at);
        }
        Ok(())
    }

    async fn unread_counts(&self, user_id: Uuid) -> AppResult<HashMap<Uuid, i64>> {
        let table = self.inner.read().await;
        Ok(table
            .by_id
            .values()
            .filter(|c| !c.is_deleted())
            .filter_map(|c| c.participant(user_id).map(|p| (c.id, p.unread_count)))
            .collect())
    }
}

#[derive(Default)]
struct MessageTable {
    by_id: HashMap<Uuid, Message>,
    /// Message ids per conversation in sequence order.
    by_conversation: HashMap<Uuid, Vec<Uuid>>,
    next_sequence: HashMap<Uuid, i64>,
}

#[derive(Default)]
pub struct MemoryMessageRepository {
    inner: RwLock<MessageTable>,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(messages: &mut [Message]) {
    messages.sort_by(|a, b| {
        b.sent_at
            .cmp(&a.sent_at)
            .then(b.sequence_number.cmp(&a.sequence_number))
    });
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn insert(&self, message: NewMessage) -> AppResult<Message> {
        let mut table = self.inner.write().await;
        let conversation_id = message.conversation_id;

        let sequence = table.next_sequence.entry(conversation_id).or_insert(0);
        *sequence += 1;
        let message = message.into_message(*sequence);

        table
            .by_conversation
            .entry(conversation_id)
            .or_default()
            .push(message.id);
        table.by_id.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[Uuid]) -> AppResult<Vec<Message>> {
        let table = self.inner.read().await;
        Ok(ids.iter().filter_map(|id| table.by_id.get(id).cloned()).collect())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        page: Page,
    ) -> AppResult<Vec<Message>> {
        let table = self.inner.read().await;
        let Some(ids) = table.by_conversation.get(&conversation_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| table.by_id.get(id))
            .filter(|m| !m.is_deleted())
            .skip(page.skip())
            .take(page.take())
            .cloned()
            .collect())
    }

    async fn update_content(
        &self,
        id: Uuid,
        content: Option<String>,
        media: Option<Vec<MediaInfo>>,
        edited_at: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        let mut table = self.inner.write().await;
        let Some(message) = table.by_id.get_mut(&id).filter(|m| !m.is_deleted()) else {
            return Ok(None);
        };
        if let Some(content) = content {
            message.content = content;
        }
        if let Some(media) = media {
            message.media = media;
        }
        message.is_edited = true;
        message.edited_at = Some(edited_at);
        Ok(Some(message.clone()))
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Message>> {
        let mut table = self.inner.write().await;
        let Some(message) = table.by_id.get_mut(&id).filter(|m| !m.is_deleted()) else {
            return Ok(None);
        };
        message.state = MessageState::Deleted { deleted_at: at };
        Ok(Some(message.clone()))
    }

    async fn adjust_reaction(
        &self,
        id: Uuid,
        kind: ReactionKind,
        action: ReactionAction,
    ) -> AppResult<Option<Message>> {
        let mut table = self.inner.write().await;
        let Some(message) = table.by_id.get_mut(&id).filter(|m| !m.is_deleted()) else {
            return Ok(None);
        };
        message.apply_reaction(kind, action);
        Ok(Some(message.clone()))
    }

    async fn append_read_receipts(
        &self,
        conversation_id: Uuid,
        reader: Uuid,
        upto_sequence: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        let mut table = self.inner.write().await;
        let MessageTable {
            by_id,
            by_conversation,
            ..
        } = &mut *table;
        let Some(ids) = by_conversation.get(&conversation_id) else {
            return Ok(Vec::new());
        };

        let mut changed = Vec::new();
        for id in ids {
            let Some(message) = by_id.get_mut(id) else {
                continue;
            };
            if message.sequence_number > upto_sequence || message.is_deleted() {
                continue;
            }
            if message.append_receipt(reader, at) {
                changed.push(message.id);
            }
        }
        Ok(changed)
    }

    async fn search(
        &self,
        conversation_ids: &[Uuid],
        query: &str,
        page: Page,
    ) -> AppResult<Vec<Message>> {
        let needle = query.to_lowercase();
        let table = self.inner.read().await;
        let mut found: Vec<Message> = table
            .by_id
            .values()
            .filter(|m| conversation_ids.contains(&m.conversation_id))
            .filter(|m| !m.is_deleted() && m.content.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        newest_first(&mut found);
        Ok(page_of(found, page))
    }

    async fn content_type_counts(&self, conversation_id: Uuid) -> AppResult<BTreeMap<String, i64>> {
        let table = self.inner.read().await;
        let mut counts = BTreeMap::new();
        for message in table
            .by_id
            .values()
            .filter(|m| m.conversation_id == conversation_id && !m.is_deleted())
        {
            *counts
                .entry(message.content_type.to_db().to_string())
                .or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, ConversationKind};

    fn new_message(conversation_id: Uuid, sender_id: Uuid, content: &str) -> NewMessage {
        NewMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: content.to_string(),
            content_type: ContentType::Text,
            media: vec![],
            reply_to_id: None,
            sent_at: Utc::now(),
        }
    }

    fn direct(a: Uuid, b: Uuid) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: Uuid::new_v4(),
            kind: ConversationKind::Direct,
            title: None,
            description: None,
            participants: vec![
                Participant::new(a, ParticipantRole::Admin, now),
                Participant::new(b, ParticipantRole::Member, now),
            ],
            last_message: None,
            message_count: 0,
            created_by: a,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
            roster_version: 0,
        }
    }

    #[tokio::test]
    async fn direct_insert_is_deduplicated() {
        let repo = MemoryConversationRepository::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let first = repo.insert(direct(a, b)).await.unwrap();
        let second = repo.insert(direct(b, a)).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn stale_roster_write_is_rejected() {
        let repo = MemoryConversationRepository::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = repo.insert(direct(a, b)).await.unwrap();

        let first = repo
            .update_role(conv.id, b, ParticipantRole::Admin, 0)
            .await
            .unwrap();
        let second = repo.remove_participant(conv.id, a, 0).await.unwrap();
        assert_eq!(first, RosterWrite::Applied);
        assert_eq!(second, RosterWrite::Stale);
    }

    #[tokio::test]
    async fn sequence_numbers_are_per_conversation() {
        let repo = MemoryMessageRepository::new();
        let (c1, c2, user) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let m1 = repo.insert(new_message(c1, user, "a")).await.unwrap();
        let m2 = repo.insert(new_message(c1, user, "b")).await.unwrap();
        let m3 = repo.insert(new_message(c2, user, "c")).await.unwrap();
        assert_eq!((m1.sequence_number, m2.sequence_number), (1, 2));
        assert_eq!(m3.sequence_number, 1);

        let listed = repo.list_by_conversation(c1, Page::default()).await.unwrap();
        assert_eq!(listed[0].id, m2.id);
    }

    #[tokio::test]
    async fn receipts_stop_at_upto_and_skip_deleted() {
        let repo = MemoryMessageRepository::new();
        let (conv, sender, reader) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let m1 = repo.insert(new_message(conv, sender, "one")).await.unwrap();
        let m2 = repo.insert(new_message(conv, sender, "two")).await.unwrap();
        let m3 = repo.insert(new_message(conv, sender, "three")).await.unwrap();
        repo.soft_delete(m1.id, Utc::now()).await.unwrap();

        let changed = repo
            .append_read_receipts(conv, reader, m2.sequence_number, Utc::now())
            .await
            .unwrap();
        assert_eq!(changed, vec![m2.id]);

        let m3 = repo.get(m3.id).await.unwrap().unwrap();
        assert!(!m3.has_read(reader));
    }
}
