//! Live event envelope
//!
//! Payloads are the REST shapes, wrapped as
//! `{"type": "message", "action": "new"|"updated"|"deleted"|"read", "data": {...}}`.

use serde::Serialize;
use uuid::Uuid;

use crate::models::{MessageView, ReadOutcome};

#[derive(Debug, Clone)]
pub enum HubEvent {
    MessageNew(MessageView),
    MessageUpdated(MessageView),
    MessageDeleted(MessageView),
    MessageRead(ReadOutcome),
}

#[derive(Serialize)]
struct Frame<'a, T: Serialize> {
    #[serde(rename = "type")]
    frame_type: &'static str,
    action: &'static str,
    data: &'a T,
}

impl HubEvent {
    /// Dotted name used for logs and metrics labels.
    pub fn event_type(&self) -> &'static str {
        match self {
            HubEvent::MessageNew(_) => "message.new",
            HubEvent::MessageUpdated(_) => "message.updated",
            HubEvent::MessageDeleted(_) => "message.deleted",
            HubEvent::MessageRead(_) => "message.read",
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            HubEvent::MessageNew(_) => "new",
            HubEvent::MessageUpdated(_) => "updated",
            HubEvent::MessageDeleted(_) => "deleted",
            HubEvent::MessageRead(_) => "read",
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        match self {
            HubEvent::MessageNew(view)
            | HubEvent::MessageUpdated(view)
            | HubEvent::MessageDeleted(view) => view.message.conversation_id,
            HubEvent::MessageRead(outcome) => outcome.conversation_id,
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        match self {
            HubEvent::MessageNew(view)
            | HubEvent::MessageUpdated(view)
            | HubEvent::MessageDeleted(view) => self.encode(view),
            HubEvent::MessageRead(outcome) => self.encode(outcome),
        }
    }

    fn encode<T: Serialize>(&self, data: &T) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Frame {
            frame_type: "message",
            action: self.action(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn read_frame_wraps_outcome() {
        let outcome = ReadOutcome {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            up_to_message_id: Uuid::new_v4(),
            message_ids: vec![Uuid::new_v4()],
            read_at: Utc::now(),
        };
        let event = HubEvent::MessageRead(outcome.clone());
        let frame: serde_json::Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();

        assert_eq!(event.event_type(), "message.read");
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["action"], "read");
        assert_eq!(frame["data"]["conversation_id"], outcome.conversation_id.to_string());
        assert_eq!(frame["data"]["message_ids"].as_array().unwrap().len(), 1);
    }
}
