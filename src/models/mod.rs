pub mod conversation;
pub mod member;
pub mod message;
pub mod user;

pub use conversation::{
    Conversation, ConversationKind, ConversationStats, ConversationView, LastMessageRef,
    Lifecycle,
};
pub use member::{Participant, ParticipantRole, ParticipantView};
pub use message::{
    ContentType, MediaInfo, Message, MessageState, MessageView, NewMessage, ReactionAction,
    ReactionKind, ReadOutcome, ReadReceipt, ReplySummary,
};
pub use user::UserSummary;

use serde::Deserialize;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Offset pagination shared by every listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }.normalized()
    }

    /// Clamps limit into 1..=MAX_PAGE_SIZE and offset to >= 0.
    pub fn normalized(self) -> Self {
        Self {
            limit: self.limit.clamp(1, MAX_PAGE_SIZE),
            offset: self.offset.max(0),
        }
    }

    pub fn skip(&self) -> usize {
        self.offset as usize
    }

    pub fn take(&self) -> usize {
        self.limit as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_is_clamped() {
        assert_eq!(Page::new(500, -3), Page { limit: 100, offset: 0 });
        assert_eq!(Page::new(0, 10), Page { limit: 1, offset: 10 });
    }
}
