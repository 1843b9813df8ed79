//! Participant roles and roster entries

use crate::models::UserSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Role of a participant inside one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// Regular participant - can send, edit and delete own messages
    Member = 0,
    /// Admin - manages the roster, roles and group settings
    Admin = 1,
}

impl ParticipantRole {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "member" => Some(Self::Member),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

impl std::str::FromStr for ParticipantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db(s).ok_or_else(|| format!("Invalid role: {}", s))
    }
}

/// One roster entry. Removed participants are dropped from the roster, so every
/// entry is an active participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub muted: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub archived: bool,
    pub unread_count: i64,
    pub last_read_message_id: Option<Uuid>,
    pub last_read_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn new(user_id: Uuid, role: ParticipantRole, joined_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            role,
            joined_at,
            muted: false,
            muted_until: None,
            archived: false,
            unread_count: 0,
            last_read_message_id: None,
            last_read_at: None,
        }
    }

    /// A mute with an expiry stops applying once the expiry has passed.
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.muted && self.muted_until.map_or(true, |until| until > now)
    }
}

/// Public roster entry. Unread counters of other participants stay private.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantView {
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
}
