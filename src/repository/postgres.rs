//! PostgreSQL backend.
//!
//! Every compound change runs in one transaction or one statement so that the
//! per-record atomicity the services rely on holds across instances.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::{Client, Row};
use uuid::Uuid;

use super::{AddStatus, ConversationRepository, MessageRepository, RosterWrite};
use crate::error::{AppError, AppResult};
use crate::models::{
    ContentType, Conversation, ConversationKind, LastMessageRef, Lifecycle, MediaInfo, Message,
    MessageState, NewMessage, Page, Participant, ParticipantRole, ReactionAction, ReactionKind,
    ReadReceipt,
};

const CONVERSATION_COLUMNS: &str = r#"
    c.id, c.kind, c.title, c.description, c.created_by, c.created_at, c.updated_at,
    c.deleted_at, c.roster_version, c.message_count, c.last_message_id,
    c.last_message_sender_id, c.last_message_preview, c.last_message_at, c.last_message_seq
"#;

const MESSAGE_COLUMNS: &str = r#"
    m.id, m.conversation_id, m.sender_id, m.content, m.content_type, m.media, m.reply_to_id,
    m.is_edited, m.edited_at, m.sent_at, m.sequence_number, m.deleted_at
"#;

fn db(context: &'static str) -> impl FnOnce(tokio_postgres::Error) -> AppError {
    move |e| AppError::Database(format!("{context}: {e}"))
}

/// Escapes LIKE wildcards so user input matches literally.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn participant_from_row(row: &Row) -> AppResult<Participant> {
    let role: String = row.get("role");
    Ok(Participant {
        user_id: row.get("user_id"),
        role: ParticipantRole::from_db(&role)
            .ok_or_else(|| AppError::Database(format!("unknown role {role}")))?,
        joined_at: row.get("joined_at"),
        muted: row.get("muted"),
        muted_until: row.get("muted_until"),
        archived: row.get("archived"),
        unread_count: row.get("unread_count"),
        last_read_message_id: row.get("last_read_message_id"),
        last_read_at: row.get("last_read_at"),
    })
}

fn conversation_from_row(row: &Row, participants: Vec<Participant>) -> AppResult<Conversation> {
    let kind: String = row.get("kind");
    let deleted_at: Option<DateTime<Utc>> = row.get("deleted_at");
    let last_message_id: Option<Uuid> = row.get("last_message_id");

    let last_message = match last_message_id {
        Some(message_id) => Some(LastMessageRef {
            message_id,
            sender_id: row.get("last_message_sender_id"),
            preview: row
                .get::<_, Option<String>>("last_message_preview")
                .unwrap_or_default(),
            sent_at: row.get("last_message_at"),
            sequence_number: row.get("last_message_seq"),
        }),
        None => None,
    };

    Ok(Conversation {
        id: row.get("id"),
        kind: ConversationKind::from_db(&kind)
            .ok_or_else(|| AppError::Database(format!("unknown conversation kind {kind}")))?,
        title: row.get("title"),
        description: row.get("description"),
        participants,
        last_message,
        message_count: row.get("message_count"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        lifecycle: match deleted_at {
            Some(at) => Lifecycle::Deleted { at },
            None => Lifecycle::Active,
        },
        roster_version: row.get("roster_version"),
    })
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: Pool,
}

impl PgConversationRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Attaches rosters to conversation rows, preserving row order.
    async fn hydrate(client: &Client, rows: Vec<Row>) -> AppResult<Vec<Conversation>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();
        let participant_rows = client
            .query(
                r#"
                SELECT conversation_id, user_id, role, joined_at, muted, muted_until, archived,
                       unread_count, last_read_message_id, last_read_at
                FROM conversation_participants
                WHERE conversation_id = ANY($1)
                ORDER BY joined_at, user_id
                "#,
                &[&ids],
            )
            .await
            .map_err(db("load participants"))?;

        let mut rosters: HashMap<Uuid, Vec<Participant>> = HashMap::new();
        for row in &participant_rows {
            let conversation_id: Uuid = row.get("conversation_id");
            rosters
                .entry(conversation_id)
                .or_default()
                .push(participant_from_row(row)?);
        }

        rows.iter()
            .map(|row| {
                let id: Uuid = row.get("id");
                conversation_from_row(row, rosters.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn find_by_direct_key(&self, key: &str) -> AppResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT id FROM conversations WHERE direct_key = $1", &[&key])
            .await
            .map_err(db("find direct conversation"))?;
        match row {
            Some(row) => self.get(row.get("id")).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn insert(&self, conversation: Conversation) -> AppResult<Conversation> {
        let direct_key = conversation.direct_key();
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await.map_err(db("begin"))?;

        let inserted = tx
            .execute(
                r#"
                INSERT INTO conversations
                    (id, kind, title, description, direct_key, created_by, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (direct_key) DO NOTHING
                "#,
                &[
                    &conversation.id,
                    &conversation.kind.to_db(),
                    &conversation.title,
                    &conversation.description,
                    &direct_key,
                    &conversation.created_by,
                    &conversation.created_at,
                    &conversation.updated_at,
                ],
            )
            .await
            .map_err(db("insert conversation"))?;

        if inserted == 0 {
            tx.rollback().await.map_err(db("rollback"))?;
            let key = direct_key.unwrap_or_default();
            return self
                .find_by_direct_key(&key)
                .await?
                .ok_or_else(|| AppError::Conflict("direct conversation changed concurrently".into()));
        }

        for p in &conversation.participants {
            tx.execute(
                r#"
                INSERT INTO conversation_participants (conversation_id, user_id, role, joined_at)
                VALUES ($1, $2, $3, $4)
                "#,
                &[&conversation.id, &p.user_id, &p.role.to_db(), &p.joined_at],
            )
            .await
            .map_err(db("insert participant"))?;
        }

        tx.commit().await.map_err(db("commit"))?;
        Ok(conversation)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &*format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = $1"),
                &[&id],
            )
            .await
            .map_err(db("get conversation"))?;
        match row {
            Some(row) => Ok(Self::hydrate(&**client, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_for_user(&self, user_id: Uuid, page: Page) -> AppResult<Vec<Conversation>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &*format!(
                    r#"
                    SELECT {CONVERSATION_COLUMNS}
                    FROM conversations c
                    JOIN conversation_participants p ON p.conversation_id = c.id
                    WHERE p.user_id = $1 AND c.deleted_at IS NULL
                    ORDER BY c.updated_at DESC, c.id DESC
                    LIMIT $2 OFFSET $3
                    "#
                ),
                &[&user_id, &page.limit, &page.offset],
            )
            .await
            .map_err(db("list conversations"))?;
        Self::hydrate(&**client, rows).await
    }

    async fn ids_for_user(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT c.id
                FROM conversations c
                JOIN conversation_participants p ON p.conversation_id = c.id
                WHERE p.user_id = $1 AND c.deleted_at IS NULL
                "#,
                &[&user_id],
            )
            .await
            .map_err(db("conversation ids"))?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn search_for_user(
        &self,
        user_id: Uuid,
        query: &str,
        page: Page,
    ) -> AppResult<Vec<Conversation>> {
        let client = self.pool.get().await?;
        let pattern = like_pattern(query);
        let rows = client
            .query(
                &*format!(
                    r#"
                    SELECT {CONVERSATION_COLUMNS}
                    FROM conversations c
                    JOIN conversation_participants p ON p.conversation_id = c.id
                    WHERE p.user_id = $1
                      AND c.deleted_at IS NULL
                      AND (c.title ILIKE $2 OR c.description ILIKE $2)
                    ORDER BY c.updated_at DESC, c.id DESC
                    LIMIT $3 OFFSET $4
                    "#
                ),
                &[&user_id, &pattern, &page.limit, &page.offset],
            )
            .await
            .map_err(db("search conversations"))?;
        Self::hydrate(&**client, rows).await
    }

    async fn update_details(
        &self,
        id: Uuid,
        title: Option<String>,
        description: Option<String>,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                UPDATE conversations
                SET title = COALESCE($2, title),
                    description = COALESCE($3, description),
                    updated_at = $4
                WHERE id = $1 AND deleted_at IS NULL
                "#,
                &[&id, &title, &description, &at],
            )
            .await
            .map_err(db("update conversation"))?;
        Ok(())
    }

    async fn add_participants(
        &self,
        id: Uuid,
        participants: Vec<Participant>,
        max_roster: usize,
    ) -> AppResult<Vec<(Uuid, AddStatus)>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await.map_err(db("begin"))?;

        // Row lock serializes concurrent adds against the roster cap.
        let locked = tx
            .query_opt(
                "SELECT id FROM conversations WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
                &[&id],
            )
            .await
            .map_err(db("lock conversation"))?;
        if locked.is_none() {
            tx.rollback().await.map_err(db("rollback"))?;
            return Err(AppError::NotFound);
        }

        let count: i64 = tx
            .query_one(
                "SELECT COUNT(*) FROM conversation_participants WHERE conversation_id = $1",
                &[&id],
            )
            .await
            .map_err(db("count participants"))?
            .get(0);
        let mut roster_size = count as usize;

        let mut results = Vec::with_capacity(participants.len());
        for p in participants {
            if roster_size >= max_roster {
                results.push((p.user_id, AddStatus::LimitExceeded));
                continue;
            }
            let inserted = tx
                .execute(
                    r#"
                    INSERT INTO conversation_participants (conversation_id, user_id, role, joined_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (conversation_id, user_id) DO NOTHING
                    "#,
                    &[&id, &p.user_id, &p.role.to_db(), &p.joined_at],
                )
                .await
                .map_err(db("add participant"))?;
            if inserted == 1 {
                roster_size += 1;
                results.push((p.user_id, AddStatus::Added));
            } else {
                results.push((p.user_id, AddStatus::AlreadyParticipant));
            }
        }

        if results.iter().any(|(_, s)| *s == AddStatus::Added) {
            tx.execute(
                r#"
                UPDATE conversations
                SET roster_version = roster_version + 1, updated_at = NOW()
                WHERE id = $1
                "#,
                &[&id],
            )
            .await
            .map_err(db("bump roster version"))?;
        }

        tx.commit().await.map_err(db("commit"))?;
        Ok(results)
    }

    async fn remove_participant(
        &self,
        id: Uuid,
        user_id: Uuid,
        expected_version: i64,
    ) -> AppResult<RosterWrite> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await.map_err(db("begin"))?;

        let bumped = tx
            .execute(
                r#"
                UPDATE conversations
                SET roster_version = roster_version + 1, updated_at = NOW()
                WHERE id = $1 AND roster_version = $2 AND deleted_at IS NULL
                "#,
                &[&id, &expected_version],
            )
            .await
            .map_err(db("bump roster version"))?;
        if bumped == 0 {
            tx.rollback().await.map_err(db("rollback"))?;
            return Ok(RosterWrite::Stale);
        }

        let removed = tx
            .execute(
                "DELETE FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
                &[&id, &user_id],
            )
            .await
            .map_err(db("remove participant"))?;
        if removed == 0 {
            tx.rollback().await.map_err(db("rollback"))?;
            return Ok(RosterWrite::Missing);
        }

        tx.commit().await.map_err(db("commit"))?;
        Ok(RosterWrite::Applied)
    }

    async fn update_role(
        &self,
        id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
        expected_version: i64,
    ) -> AppResult<RosterWrite> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await.map_err(db("begin"))?;

        let bumped = tx
            .execute(
                r#"
                UPDATE conversations
                SET roster_version = roster_version + 1, updated_at = NOW()
                WHERE id = $1 AND roster_version = $2 AND deleted_at IS NULL
                "#,
                &[&id, &expected_version],
            )
            .await
            .map_err(db("bump roster version"))?;
        if bumped == 0 {
            tx.rollback().await.map_err(db("rollback"))?;
            return Ok(RosterWrite::Stale);
        }

        let updated = tx
            .execute(
                r#"
                UPDATE conversation_participants SET role = $3
                WHERE conversation_id = $1 AND user_id = $2
                "#,
                &[&id, &user_id, &role.to_db()],
            )
            .await
            .map_err(db("update role"))?;
        if updated == 0 {
            tx.rollback().await.map_err(db("rollback"))?;
            return Ok(RosterWrite::Missing);
        }

        tx.commit().await.map_err(db("commit"))?;
        Ok(RosterWrite::Applied)
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                UPDATE conversations
                SET deleted_at = $2, updated_at = $2, direct_key = NULL
                WHERE id = $1 AND deleted_at IS NULL
                "#,
                &[&id, &at],
            )
            .await
            .map_err(db("delete conversation"))?;
        Ok(())
    }

    async fn set_muted(
        &self,
        id: Uuid,
        user_id: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE conversation_participants SET muted = $3, muted_until = $4
                WHERE conversation_id = $1 AND user_id = $2
                "#,
                &[&id, &user_id, &muted, &until],
            )
            .await
            .map_err(db("set muted"))?;
        Ok(updated > 0)
    }

    async fn set_archived(&self, id: Uuid, user_id: Uuid, archived: bool) -> AppResult<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE conversation_participants SET archived = $3
                WHERE conversation_id = $1 AND user_id = $2
                "#,
                &[&id, &user_id, &archived],
            )
            .await
            .map_err(db("set archived"))?;
        Ok(updated > 0)
    }

    async fn record_message(
        &self,
        id: Uuid,
        last: &LastMessageRef,
        recipients: &[Uuid],
    ) -> AppResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await.map_err(db("begin"))?;

        tx.execute(
            r#"
            UPDATE conversations
            SET message_count = message_count + 1,
                updated_at = GREATEST(updated_at, $2)
            WHERE id = $1
            "#,
            &[&id, &last.sent_at],
        )
        .await
        .map_err(db("count message"))?;

        tx.execute(
            r#"
            UPDATE conversations
            SET last_message_id = $2,
                last_message_sender_id = $3,
                last_message_preview = $4,
                last_message_at = $5,
                last_message_seq = $6
            WHERE id = $1 AND (last_message_seq IS NULL OR last_message_seq < $6)
            "#,
            &[
                &id,
                &last.message_id,
                &last.sender_id,
                &last.preview,
                &last.sent_at,
                &last.sequence_number,
            ],
        )
        .await
        .map_err(db("update last message"))?;

        if !recipients.is_empty() {
            tx.execute(
                r#"
                UPDATE conversation_participants SET unread_count = unread_count + 1
                WHERE conversation_id = $1 AND user_id = ANY($2)
                "#,
                &[&id, &recipients],
            )
            .await
            .map_err(db("increment unread"))?;
        }

        tx.commit().await.map_err(db("commit"))?;
        Ok(())
    }

    async fn reset_unread(
        &self,
        id: Uuid,
        user_id: Uuid,
        upto_message_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                UPDATE conversation_participants
                SET unread_count = 0, last_read_message_id = $3, last_read_at = $4
                WHERE conversation_id = $1 AND user_id = $2
                "#,
                &[&id, &user_id, &upto_message_id, &at],
            )
            .await
            .map_err(db("reset unread"))?;
        Ok(())
    }

    async fn unread_counts(&self, user_id: Uuid) -> AppResult<HashMap<Uuid, i64>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT p.conversation_id, p.unread_count
                FROM conversation_participants p
                JOIN conversations c ON c.id = p.conversation_id
                WHERE p.user_id = $1 AND c.deleted_at IS NULL
                "#,
                &[&user_id],
            )
            .await
            .map_err(db("unread counts"))?;
        Ok(rows
            .iter()
            .map(|r| (r.get("conversation_id"), r.get("unread_count")))
            .collect())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: Pool,
}

impl PgMessageRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Loads messages with their reactions and receipts, preserving row order.
    async fn hydrate(client: &Client, rows: Vec<Row>) -> AppResult<Vec<Message>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();

        let reaction_rows = client
            .query(
                r#"
                SELECT message_id, kind, count FROM message_reactions
                WHERE message_id = ANY($1) AND count > 0
                "#,
                &[&ids],
            )
            .await
            .map_err(db("load reactions"))?;
        let mut reactions: HashMap<Uuid, BTreeMap<ReactionKind, i64>> = HashMap::new();
        for row in &reaction_rows {
            let kind: String = row.get("kind");
            let Some(kind) = ReactionKind::from_db(&kind) else {
                tracing::warn!(kind = %kind, "skipping unknown reaction kind");
                continue;
            };
            reactions
                .entry(row.get("message_id"))
                .or_default()
                .insert(kind, row.get("count"));
        }

        let receipt_rows = client
            .query(
                r#"
                SELECT message_id, user_id, read_at FROM message_read_receipts
                WHERE message_id = ANY($1)
                ORDER BY read_at, user_id
                "#,
                &[&ids],
            )
            .await
            .map_err(db("load receipts"))?;
        let mut receipts: HashMap<Uuid, Vec<ReadReceipt>> = HashMap::new();
        for row in &receipt_rows {
            receipts
                .entry(row.get("message_id"))
                .or_default()
                .push(ReadReceipt {
                    user_id: row.get("user_id"),
                    read_at: row.get("read_at"),
                });
        }

        rows.iter()
            .map(|row| {
                let id: Uuid = row.get("id");
                let content_type: String = row.get("content_type");
                let media: serde_json::Value = row.get("media");
                let deleted_at: Option<DateTime<Utc>> = row.get("deleted_at");
                Ok(Message {
                    id,
                    conversation_id: row.get("conversation_id"),
                    sender_id: row.get("sender_id"),
                    content: row.get("content"),
                    content_type: ContentType::from_db(&content_type).ok_or_else(|| {
                        AppError::Database(format!("unknown content type {content_type}"))
                    })?,
                    media: serde_json::from_value::<Vec<MediaInfo>>(media)?,
                    reply_to_id: row.get("reply_to_id"),
                    reactions_count: reactions.remove(&id).unwrap_or_default(),
                    read_by: receipts.remove(&id).unwrap_or_default(),
                    is_edited: row.get("is_edited"),
                    edited_at: row.get("edited_at"),
                    sent_at: row.get("sent_at"),
                    sequence_number: row.get("sequence_number"),
                    state: match deleted_at {
                        Some(deleted_at) => MessageState::Deleted { deleted_at },
                        None => MessageState::Active,
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert(&self, message: NewMessage) -> AppResult<Message> {
        let client = self.pool.get().await?;
        let media = serde_json::to_value(&message.media)?;
        let row = client
            .query_opt(
                r#"
                WITH seq AS (
                    UPDATE conversations SET next_seq = next_seq + 1
                    WHERE id = $2 AND deleted_at IS NULL
                    RETURNING next_seq
                )
                INSERT INTO messages
                    (id, conversation_id, sender_id, content, content_type, media, reply_to_id,
                     sent_at, sequence_number)
                SELECT $1::uuid, $2::uuid, $3::uuid, $4::text, $5::text, $6::jsonb, $7::uuid,
                       $8::timestamptz, seq.next_seq
                FROM seq
                RETURNING sequence_number
                "#,
                &[
                    &message.id,
                    &message.conversation_id,
                    &message.sender_id,
                    &message.content,
                    &message.content_type.to_db(),
                    &media,
                    &message.reply_to_id,
                    &message.sent_at,
                ],
            )
            .await
            .map_err(db("insert message"))?
            .ok_or(AppError::NotFound)?;

        let sequence_number: i64 = row.get("sequence_number");
        Ok(message.into_message(sequence_number))
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Message>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &*format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = $1"),
                &[&id],
            )
            .await
            .map_err(db("get message"))?;
        match row {
            Some(row) => Ok(Self::hydrate(&**client, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn get_many(&self, ids: &[Uuid]) -> AppResult<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &*format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ANY($1)"),
                &[&ids],
            )
            .await
            .map_err(db("get messages"))?;
        Self::hydrate(&**client, rows).await
    }

    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        page: Page,
    ) -> AppResult<Vec<Message>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &*format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages m
                    WHERE m.conversation_id = $1 AND m.deleted_at IS NULL
                    ORDER BY m.sequence_number DESC
                    LIMIT $2 OFFSET $3
                    "#
                ),
                &[&conversation_id, &page.limit, &page.offset],
            )
            .await
            .map_err(db("list messages"))?;
        Self::hydrate(&**client, rows).await
    }

    async fn update_content(
        &self,
        id: Uuid,
        content: Option<String>,
        media: Option<Vec<MediaInfo>>,
        edited_at: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        let media = media.map(|m| serde_json::to_value(&m)).transpose()?;
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE messages
                SET content = COALESCE($2, content),
                    media = COALESCE($3, media),
                    is_edited = TRUE,
                    edited_at = $4
                WHERE id = $1 AND deleted_at IS NULL
                "#,
                &[&id, &content, &media, &edited_at],
            )
            .await
            .map_err(db("edit message"))?;
        if updated == 0 {
            return Ok(None);
        }
        drop(client);
        self.get(id).await
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Message>> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE messages SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
                &[&id, &at],
            )
            .await
            .map_err(db("delete message"))?;
        if updated == 0 {
            return Ok(None);
        }
        drop(client);
        self.get(id).await
    }

    async fn adjust_reaction(
        &self,
        id: Uuid,
        kind: ReactionKind,
        action: ReactionAction,
    ) -> AppResult<Option<Message>> {
        let client = self.pool.get().await?;
        let statement = match action {
            ReactionAction::Add => {
                r#"
                INSERT INTO message_reactions (message_id, kind, count)
                SELECT $1::uuid, $2::text, 1
                WHERE EXISTS (SELECT 1 FROM messages WHERE id = $1 AND deleted_at IS NULL)
                ON CONFLICT (message_id, kind) DO UPDATE SET count = message_reactions.count + 1
                "#
            }
            ReactionAction::Remove => {
                r#"
                UPDATE message_reactions SET count = GREATEST(count - 1, 0)
                WHERE message_id = $1 AND kind = $2
                  AND EXISTS (SELECT 1 FROM messages WHERE id = $1 AND deleted_at IS NULL)
                "#
            }
        };
        client
            .execute(statement, &[&id, &kind.to_db()])
            .await
            .map_err(db("adjust reaction"))?;
        drop(client);

        Ok(self.get(id).await?.filter(|m| !m.is_deleted()))
    }

    async fn append_read_receipts(
        &self,
        conversation_id: Uuid,
        reader: Uuid,
        upto_sequence: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                INSERT INTO message_read_receipts (message_id, user_id, read_at)
                SELECT m.id, $2::uuid, $4::timestamptz
                FROM messages m
                WHERE m.conversation_id = $1
                  AND m.sequence_number <= $3
                  AND m.deleted_at IS NULL
                  AND m.sender_id <> $2
                ON CONFLICT (message_id, user_id) DO NOTHING
                RETURNING message_id
                "#,
                &[&conversation_id, &reader, &upto_sequence, &at],
            )
            .await
            .map_err(db("append read receipts"))?;
        Ok(rows.iter().map(|r| r.get("message_id")).collect())
    }

    async fn search(
        &self,
        conversation_ids: &[Uuid],
        query: &str,
        page: Page,
    ) -> AppResult<Vec<Message>> {
        if conversation_ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let pattern = like_pattern(query);
        let rows = client
            .query(
                &*format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages m
                    WHERE m.conversation_id = ANY($1)
                      AND m.deleted_at IS NULL
                      AND m.content ILIKE $2
                    ORDER BY m.sent_at DESC, m.sequence_number DESC
                    LIMIT $3 OFFSET $4
                    "#
                ),
                &[&conversation_ids, &pattern, &page.limit, &page.offset],
            )
            .await
            .map_err(db("search messages"))?;
        Self::hydrate(&**client, rows).await
    }

    async fn content_type_counts(&self, conversation_id: Uuid) -> AppResult<BTreeMap<String, i64>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT content_type, COUNT(*) AS total FROM messages
                WHERE conversation_id = $1 AND deleted_at IS NULL
                GROUP BY content_type
                "#,
                &[&conversation_id],
            )
            .await
            .map_err(db("content type counts"))?;
        Ok(rows
            .iter()
            .map(|r| (r.get("content_type"), r.get("total")))
            .collect())
    }
}
