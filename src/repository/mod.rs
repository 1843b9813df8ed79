//! Storage seams. Services hold `Arc<dyn ...Repository>` and never see the backend.

pub mod memory;
pub mod postgres;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    Conversation, LastMessageRef, MediaInfo, Message, NewMessage, Page, Participant,
    ParticipantRole, ReactionAction, ReactionKind,
};

pub use memory::{MemoryConversationRepository, MemoryMessageRepository};
pub use postgres::{PgConversationRepository, PgMessageRepository};

/// Result of a roster write guarded by `roster_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterWrite {
    Applied,
    /// The roster changed since it was read.
    Stale,
    /// The target is not on the roster.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddStatus {
    Added,
    AlreadyParticipant,
    UnknownUser,
    LimitExceeded,
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Stores a new conversation. A direct conversation whose user pair already
    /// exists is not stored; the existing one is returned instead.
    async fn insert(&self, conversation: Conversation) -> AppResult<Conversation>;

    /// Returns soft-deleted conversations too.
    async fn get(&self, id: Uuid) -> AppResult<Option<Conversation>>;

    /// Active conversations of a user, most recently active first.
    async fn list_for_user(&self, user_id: Uuid, page: Page) -> AppResult<Vec<Conversation>>;

    async fn ids_for_user(&self, user_id: Uuid) -> AppResult<Vec<Uuid>>;

    /// Case-insensitive substring match on title or description.
    async fn search_for_user(
        &self,
        user_id: Uuid,
        query: &str,
        page: Page,
    ) -> AppResult<Vec<Conversation>>;

    /// `None` leaves a field unchanged.
    async fn update_details(
        &self,
        id: Uuid,
        title: Option<String>,
        description: Option<String>,
        at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Adds participants in order until the roster reaches `max_roster`.
    async fn add_participants(
        &self,
        id: Uuid,
        participants: Vec<Participant>,
        max_roster: usize,
    ) -> AppResult<Vec<(Uuid, AddStatus)>>;

    async fn remove_participant(
        &self,
        id: Uuid,
        user_id: Uuid,
        expected_version: i64,
    ) -> AppResult<RosterWrite>;

    async fn update_role(
        &self,
        id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
        expected_version: i64,
    ) -> AppResult<RosterWrite>;

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()>;

    /// Returns false when the user is not on the roster.
    async fn set_muted(
        &self,
        id: Uuid,
        user_id: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<bool>;

    async fn set_archived(&self, id: Uuid, user_id: Uuid, archived: bool) -> AppResult<bool>;

    /// Bumps the message counter, moves `last_message` forward if `last` is newer
    /// and increments unread counters of `recipients`.
    async fn record_message(
        &self,
        id: Uuid,
        last: &LastMessageRef,
        recipients: &[Uuid],
    ) -> AppResult<()>;

    async fn reset_unread(
        &self,
        id: Uuid,
        user_id: Uuid,
        upto_message_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<()>;

    async fn unread_counts(&self, user_id: Uuid) -> AppResult<HashMap<Uuid, i64>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Assigns the next sequence number of the conversation.
    async fn insert(&self, message: NewMessage) -> AppResult<Message>;

    async fn get(&self, id: Uuid) -> AppResult<Option<Message>>;

    async fn get_many(&self, ids: &[Uuid]) -> AppResult<Vec<Message>>;

    /// Newest first, deleted messages excluded.
    async fn list_by_conversation(&self, conversation_id: Uuid, page: Page)
        -> AppResult<Vec<Message>>;

    /// Applies the edit only while the message is active. `None` when missing or deleted.
    async fn update_content(
        &self,
        id: Uuid,
        content: Option<String>,
        media: Option<Vec<MediaInfo>>,
        edited_at: DateTime<Utc>,
    ) -> AppResult<Option<Message>>;

    /// `None` when missing or already deleted.
    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Message>>;

    /// `None` when missing or deleted.
    async fn adjust_reaction(
        &self,
        id: Uuid,
        kind: ReactionKind,
        action: ReactionAction,
    ) -> AppResult<Option<Message>>;

    /// Adds a receipt for `reader` to every active message up to `upto_sequence`
    /// that `reader` did not send and has not read. Returns the ids that changed.
    async fn append_read_receipts(
        &self,
        conversation_id: Uuid,
        reader: Uuid,
        upto_sequence: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>>;

    /// Case-insensitive substring search, newest first.
    async fn search(
        &self,
        conversation_ids: &[Uuid],
        query: &str,
        page: Page,
    ) -> AppResult<Vec<Message>>;

    async fn content_type_counts(&self, conversation_id: Uuid) -> AppResult<BTreeMap<String, i64>>;
}

/// Runs a storage future under a deadline.
pub async fn with_deadline<T, F>(limit: Duration, operation: &'static str, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            metrics::STORAGE_TIMEOUTS.with_label_values(&[operation]).inc();
            tracing::warn!(operation, limit_ms = limit.as_millis() as u64, "storage call timed out");
            Err(AppError::Timeout(operation))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_expiry_is_timeout() {
        let result: AppResult<()> = with_deadline(Duration::from_millis(10), "slow op", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(AppError::Timeout("slow op")));
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let result = with_deadline(Duration::from_secs(1), "fast op", async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
