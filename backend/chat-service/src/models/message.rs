use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    File,
}

impl MessageType {
    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "file" => Ok(Self::File),
            other => Err(format!("unknown message type `{other}`")),
        }
    }
}

/// Short view of the message being replied to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub id: Uuid,
    pub content: String,
    pub sender_username: String,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    /// May be empty when the message only carries a file
    pub content: String,
    pub message_type: MessageType,
    /// Reference to an attachment held by the media store
    pub file: Option<String>,
    pub reply_to: Option<ReplyPreview>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn preview(&self) -> ReplyPreview {
        ReplyPreview {
            id: self.id,
            content: self.content.clone(),
            sender_username: self.sender_username.clone(),
            message_type: self.message_type,
        }
    }
}

/// Input of `MessageStore::create_message`
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub file: Option<String>,
    /// Dropped when it does not name a message of the same conversation
    pub reply_to_id: Option<Uuid>,
}

impl NewMessage {
    pub fn text(conversation_id: Uuid, sender_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            sender_id,
            content: content.into(),
            message_type: MessageType::Text,
            file: None,
            reply_to_id: None,
        }
    }

    pub fn with_reply_to(mut self, reply_to_id: Option<Uuid>) -> Self {
        self.reply_to_id = reply_to_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Cursor page over a conversation's history
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct MessagePage {
    /// Only messages created before this one
    pub before: Option<Uuid>,
    pub limit: Option<i64>,
}

impl MessagePage {
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}
