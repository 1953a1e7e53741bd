use crate::models::Message;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Inbound WebSocket events from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsInboundEvent {
    JoinConversation {
        conversation_id: Uuid,
    },
    /// The id is accepted for symmetry and ignored: a connection holds at
    /// most one conversation.
    LeaveConversation {
        #[serde(default)]
        conversation_id: Option<Uuid>,
    },
    SendMessage {
        conversation_id: Uuid,
        #[serde(default)]
        content: String,
        /// Anything that is not a UUID string counts as absent
        #[serde(default, deserialize_with = "lenient_uuid")]
        reply_to: Option<Uuid>,
    },
    Typing {
        conversation_id: Uuid,
        #[serde(default)]
        is_typing: bool,
    },
    MarkAsRead {
        message_id: Uuid,
        conversation_id: Uuid,
    },
    AddReaction {
        message_id: Uuid,
        emoji: String,
        conversation_id: Uuid,
    },
}

fn lenient_uuid<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s.trim()).ok()))
}

/// Outbound WebSocket events from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutboundEvent {
    ConnectionEstablished {
        message: String,
    },
    JoinedConversation {
        conversation_id: Uuid,
    },
    Error {
        message: String,
    },
    NewMessage {
        message: Message,
    },
    Typing {
        user_id: Uuid,
        username: String,
        is_typing: bool,
    },
    MessageRead {
        message_id: Uuid,
        user_id: Uuid,
        username: String,
    },
    ConversationUpdated {
        conversation_id: Uuid,
        last_message: Message,
    },
    ReactionAdded {
        message_id: Uuid,
        emoji: String,
        user_id: Uuid,
        username: String,
    },
}

impl WsOutboundEvent {
    pub fn error(message: impl Into<String>) -> Self {
        WsOutboundEvent::Error {
            message: message.into(),
        }
    }

    /// Wire name, also used as the metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            WsOutboundEvent::ConnectionEstablished { .. } => "connection_established",
            WsOutboundEvent::JoinedConversation { .. } => "joined_conversation",
            WsOutboundEvent::Error { .. } => "error",
            WsOutboundEvent::NewMessage { .. } => "new_message",
            WsOutboundEvent::Typing { .. } => "typing",
            WsOutboundEvent::MessageRead { .. } => "message_read",
            WsOutboundEvent::ConversationUpdated { .. } => "conversation_updated",
            WsOutboundEvent::ReactionAdded { .. } => "reaction_added",
        }
    }
}

/// Why an inbound frame could not be turned into an event
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

/// Decode one text frame at the protocol boundary
pub fn decode_inbound(text: &str) -> Result<WsInboundEvent, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| DecodeError::InvalidJson)?;
    if !value.is_object() {
        return Err(DecodeError::InvalidEvent(
            "expected a JSON object".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidEvent(e.to_string()))
}
