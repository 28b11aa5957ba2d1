//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket event protocol between the browser client and the
//! API server for the goal-coach chat.
//!
//! Both directions are closed tagged-variant sets; payloads that do not
//! match a known variant are rejected at the parse boundary rather than
//! trusted.

use chrono::{DateTime, Utc};
use goal_coach_core::domain::ChatTurn;
use serde::{Deserialize, Serialize};

//=========================================================================================
// Events Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured events a client can send on an active connection.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A new conversational turn from the user, optionally tied to a goal.
    SubmitMessage {
        text: String,
        #[serde(default)]
        goal_id: Option<i64>,
    },

    /// The user started or stopped typing. Side-channel only; never persisted.
    SetTyping { is_typing: bool },

    /// Requests one page of the caller's chat history.
    GetHistory {
        #[serde(default)]
        goal_id: Option<i64>,
        #[serde(default)]
        limit: Option<i64>,
        #[serde(default)]
        offset: Option<i64>,
    },
}

//=========================================================================================
// Events Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// One chat turn as delivered to clients.
#[derive(Serialize, Debug, Clone)]
pub struct TurnPayload {
    pub id: i64,
    pub goal_id: Option<i64>,
    pub text: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

impl From<ChatTurn> for TurnPayload {
    fn from(turn: ChatTurn) -> Self {
        Self {
            id: turn.id,
            goal_id: turn.goal_id,
            text: turn.message,
            sender: turn.sender.as_str().to_string(),
            timestamp: turn.timestamp,
        }
    }
}

/// Represents the structured events the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Confirms that a turn was persisted. Sent for the user's own turn
    /// (round-trip acknowledgment) and again for the finalized AI turn.
    MessageConfirmed {
        id: i64,
        goal_id: Option<i64>,
        text: String,
        sender: String,
        timestamp: DateTime<Utc>,
    },

    /// Another connection under the same identity started or stopped typing.
    UserTyping { user_id: i64, is_typing: bool },

    /// One page of history, oldest-first.
    History {
        messages: Vec<TurnPayload>,
        has_more: bool,
    },

    /// The assistant started or stopped composing a reply.
    AssistantTyping { is_typing: bool },

    /// One incremental unit of generated text. `is_complete` is always false;
    /// completion is signaled by the final `MessageConfirmed`.
    AssistantChunk { text: String, is_complete: bool },

    /// Reports a recoverable failure; the connection stays open.
    Error { message: String },
}

impl ServerEvent {
    /// Builds the confirmation event for a stored turn.
    pub fn confirmed(turn: ChatTurn) -> Self {
        let payload = TurnPayload::from(turn);
        ServerEvent::MessageConfirmed {
            id: payload.id,
            goal_id: payload.goal_id,
            text: payload.text,
            sender: payload.sender,
            timestamp: payload.timestamp,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_message_deserializes_with_and_without_goal() {
        let ev: ClientEvent =
            serde_json::from_str(r#"{"type":"submit_message","text":"hi","goal_id":3}"#).unwrap();
        match ev {
            ClientEvent::SubmitMessage { text, goal_id } => {
                assert_eq!(text, "hi");
                assert_eq!(goal_id, Some(3));
            }
            other => panic!("wrong variant: {other:?}"),
        }

        let ev: ClientEvent =
            serde_json::from_str(r#"{"type":"submit_message","text":"hi"}"#).unwrap();
        assert!(matches!(
            ev,
            ClientEvent::SubmitMessage { goal_id: None, .. }
        ));
    }

    #[test]
    fn unrecognized_event_type_is_rejected() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"type":"drop_tables"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"type":"set_typing"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn server_events_carry_their_tag() {
        let json = serde_json::to_string(&ServerEvent::AssistantChunk {
            text: "hel".to_string(),
            is_complete: false,
        })
        .unwrap();
        assert!(json.contains(r#""type":"assistant_chunk""#));
        assert!(json.contains(r#""is_complete":false"#));
    }
}
