use crate::models::UserSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

const PREVIEW_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Video,
    Audio,
    File,
    System,
}

impl ContentType {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "file" => Some(Self::File),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub url: String,
    #[serde(rename = "type")]
    pub media_type: String,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Love,
    Haha,
    Wow,
    Sad,
    Angry,
    Support,
}

impl ReactionKind {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "love" => Some(Self::Love),
            "haha" => Some(Self::Haha),
            "wow" => Some(Self::Wow),
            "sad" => Some(Self::Sad),
            "angry" => Some(Self::Angry),
            "support" => Some(Self::Support),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Love => "love",
            Self::Haha => "haha",
            Self::Wow => "wow",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Support => "support",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

impl ReactionAction {
    pub fn delta(&self) -> i64 {
        match self {
            Self::Add => 1,
            Self::Remove => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

/// Terminal state is explicit: a deleted message carries its deletion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageState {
    Active,
    Deleted { deleted_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub content_type: ContentType,
    pub media: Vec<MediaInfo>,
    pub reply_to_id: Option<Uuid>,
    pub reactions_count: BTreeMap<ReactionKind, i64>,
    pub read_by: Vec<ReadReceipt>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub sent_at: DateTime<Utc>,
    /// Position inside the conversation, assigned by the store at insert.
    pub sequence_number: i64,
    #[serde(flatten)]
    pub state: MessageState,
}

/// Insert payload; the store assigns the sequence number.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub content_type: ContentType,
    pub media: Vec<MediaInfo>,
    pub reply_to_id: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn into_message(self, sequence_number: i64) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            content_type: self.content_type,
            media: self.media,
            reply_to_id: self.reply_to_id,
            reactions_count: BTreeMap::new(),
            read_by: Vec::new(),
            is_edited: false,
            edited_at: None,
            sent_at: self.sent_at,
            sequence_number,
            state: MessageState::Active,
        }
    }
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        matches!(self.state, MessageState::Deleted { .. })
    }

    pub fn has_read(&self, user_id: Uuid) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }

    /// Appends a receipt unless `user_id` is the sender or already present.
    pub fn append_receipt(&mut self, user_id: Uuid, read_at: DateTime<Utc>) -> bool {
        if user_id == self.sender_id || self.has_read(user_id) {
            return false;
        }
        self.read_by.push(ReadReceipt { user_id, read_at });
        true
    }

    /// Counter floored at zero; a zero entry is removed.
    pub fn apply_reaction(&mut self, kind: ReactionKind, action: ReactionAction) {
        let count = self.reactions_count.entry(kind).or_insert(0);
        *count = (*count + action.delta()).max(0);
        if *count == 0 {
            self.reactions_count.remove(&kind);
        }
    }

    pub fn preview(&self) -> String {
        preview_of(self.content_type, &self.content)
    }

    pub fn summary(&self) -> ReplySummary {
        ReplySummary {
            id: self.id,
            sender_id: self.sender_id,
            preview: self.preview(),
            content_type: self.content_type,
            sent_at: self.sent_at,
        }
    }
}

/// Short text used for conversation listings and notifications.
pub fn preview_of(content_type: ContentType, content: &str) -> String {
    match content_type {
        ContentType::Text | ContentType::System => {
            if content.chars().count() > PREVIEW_MAX_CHARS {
                let cut: String = content.chars().take(PREVIEW_MAX_CHARS - 3).collect();
                format!("{cut}...")
            } else {
                content.to_string()
            }
        }
        ContentType::Image => "[image]".to_string(),
        ContentType::Video => "[video]".to_string(),
        ContentType::Audio => "[audio]".to_string(),
        ContentType::File => "[file]".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplySummary {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub preview: String,
    pub content_type: ContentType,
    pub sent_at: DateTime<Utc>,
}

/// Message as returned over REST and pushed over the live transport.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplySummary>,
}

impl MessageView {
    pub fn bare(message: Message) -> Self {
        Self {
            message,
            sender: None,
            reply_to: None,
        }
    }
}

/// Receipts written by one mark-read call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadOutcome {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub up_to_message_id: Uuid,
    /// Messages that gained a receipt; empty when nothing changed.
    pub message_ids: Vec<Uuid>,
    pub read_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        NewMessage {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: "hi".into(),
            content_type: ContentType::Text,
            media: vec![],
            reply_to_id: None,
            sent_at: Utc::now(),
        }
        .into_message(1)
    }

    #[test]
    fn receipts_skip_sender_and_duplicates() {
        let mut msg = sample();
        let reader = Uuid::new_v4();
        assert!(!msg.append_receipt(msg.sender_id, Utc::now()));
        assert!(msg.append_receipt(reader, Utc::now()));
        assert!(!msg.append_receipt(reader, Utc::now()));
        assert_eq!(msg.read_by.len(), 1);
    }

    #[test]
    fn reaction_counts_floor_at_zero() {
        let mut msg = sample();
        msg.apply_reaction(ReactionKind::Like, ReactionAction::Remove);
        assert!(msg.reactions_count.get(&ReactionKind::Like).is_none());
        msg.apply_reaction(ReactionKind::Like, ReactionAction::Add);
        msg.apply_reaction(ReactionKind::Like, ReactionAction::Add);
        msg.apply_reaction(ReactionKind::Like, ReactionAction::Remove);
        assert_eq!(msg.reactions_count[&ReactionKind::Like], 1);
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "a".repeat(150);
        let preview = preview_of(ContentType::Text, &long);
        assert_eq!(preview.chars().count(), 100);
        assert!(preview.ends_with("..."));
        assert_eq!(preview_of(ContentType::Image, ""), "[image]");
    }

    #[test]
    fn deleted_state_serializes_flat() {
        let mut msg = sample();
        msg.state = MessageState::Deleted {
            deleted_at: Utc::now(),
        };
        let json = serde_json::to_value(MessageView::bare(msg)).unwrap();
        assert_eq!(json["state"], "deleted");
        assert!(json["deleted_at"].is_string());
        assert!(json.get("sender").is_none());
    }
}
