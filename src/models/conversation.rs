use crate::models::{Participant, ParticipantRole, ParticipantView, UserSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// Exactly two fixed participants
    Direct,
    /// Dynamic roster managed by admins
    Group,
}

impl ConversationKind {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

/// Pointer to the newest message, stamped with its sequence number so that a
/// late write never replaces a newer reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessageRef {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub preview: String,
    pub sent_at: DateTime<Utc>,
    pub sequence_number: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Deleted { at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub description: Option<String>,
    pub participants: Vec<Participant>,
    pub last_message: Option<LastMessageRef>,
    pub message_count: i64,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lifecycle: Lifecycle,
    /// Bumped by every roster change (add, remove, role update).
    pub roster_version: i64,
}

impl Conversation {
    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: Uuid) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn participant_ids(&self) -> Vec<Uuid> {
        self.participants.iter().map(|p| p.user_id).collect()
    }

    pub fn admin_count(&self) -> usize {
        self.participants.iter().filter(|p| p.role.is_admin()).count()
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Deleted { .. })
    }

    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }

    /// Order-independent key of a user pair.
    pub fn direct_key_for(a: Uuid, b: Uuid) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        format!("{lo}:{hi}")
    }

    pub fn direct_key(&self) -> Option<String> {
        match (self.kind, self.participants.as_slice()) {
            (ConversationKind::Direct, [a, b]) => Some(Self::direct_key_for(a.user_id, b.user_id)),
            _ => None,
        }
    }

    /// Replaces the last message reference only with a newer one.
    pub fn apply_last_message(&mut self, candidate: LastMessageRef) -> bool {
        let newer = self
            .last_message
            .as_ref()
            .map_or(true, |current| candidate.sequence_number > current.sequence_number);
        if newer {
            self.last_message = Some(candidate);
        }
        newer
    }

    pub fn to_view(&self, viewer: Uuid, users: &HashMap<Uuid, UserSummary>) -> ConversationView {
        let me = self.participant(viewer);
        ConversationView {
            id: self.id,
            kind: self.kind,
            title: self.title.clone(),
            description: self.description.clone(),
            participants: self
                .participants
                .iter()
                .map(|p| ParticipantView {
                    user_id: p.user_id,
                    role: p.role,
                    joined_at: p.joined_at,
                    user: users.get(&p.user_id).cloned(),
                })
                .collect(),
            last_message: self.last_message.clone(),
            message_count: self.message_count,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            role: me.map(|p| p.role),
            unread_count: me.map_or(0, |p| p.unread_count),
            muted: me.map_or(false, |p| p.is_muted_at(Utc::now())),
            muted_until: me.and_then(|p| p.muted_until),
            archived: me.map_or(false, |p| p.archived),
        }
    }
}

/// Conversation as seen by one participant.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub kind: ConversationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub participants: Vec<ParticipantView>,
    pub last_message: Option<LastMessageRef>,
    pub message_count: i64,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub role: Option<ParticipantRole>,
    pub unread_count: i64,
    pub muted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muted_until: Option<DateTime<Utc>>,
    pub archived: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationStats {
    pub conversation_id: Uuid,
    pub participant_count: usize,
    pub admin_count: usize,
    pub message_count: i64,
    pub unread_count: i64,
    pub content_types: BTreeMap<String, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn last(seq: i64) -> LastMessageRef {
        LastMessageRef {
            message_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            preview: format!("m{seq}"),
            sent_at: Utc::now(),
            sequence_number: seq,
        }
    }

    fn group() -> Conversation {
        let now = Utc::now();
        let creator = Uuid::new_v4();
        Conversation {
            id: Uuid::new_v4(),
            kind: ConversationKind::Group,
            title: Some("team".into()),
            description: None,
            participants: vec![Participant::new(creator, ParticipantRole::Admin, now)],
            last_message: None,
            message_count: 0,
            created_by: creator,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
            roster_version: 0,
        }
    }

    #[test]
    fn last_message_never_regresses() {
        let mut conv = group();
        assert!(conv.apply_last_message(last(2)));
        assert!(!conv.apply_last_message(last(1)));
        assert_eq!(conv.last_message.as_ref().map(|m| m.sequence_number), Some(2));
        assert!(conv.apply_last_message(last(3)));
    }

    #[test]
    fn direct_key_is_order_independent() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(
            Conversation::direct_key_for(a, b),
            Conversation::direct_key_for(b, a)
        );
        assert_eq!(group().direct_key(), None);
    }

    #[test]
    fn view_exposes_only_viewer_settings() {
        let mut conv = group();
        let viewer = conv.created_by;
        conv.participant_mut(viewer).unwrap().unread_count = 4;

        let view = conv.to_view(viewer, &HashMap::new());
        assert_eq!(view.unread_count, 4);
        assert_eq!(view.role, Some(ParticipantRole::Admin));

        let outsider = conv.to_view(Uuid::new_v4(), &HashMap::new());
        assert_eq!(outsider.unread_count, 0);
        assert_eq!(outsider.role, None);
    }
}
