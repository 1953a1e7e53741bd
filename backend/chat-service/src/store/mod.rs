//! Persistence seams of the chat core.
//!
//! Every backend implements all four traits; services hold an
//! `Arc<dyn ChatStore>` and never know which one they talk to.

use crate::error::AppResult;
use crate::models::{
    Conversation, ConversationSummary, Message, MessagePage, NewMessage, Reaction, ReadReceipt,
    UserSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryChatStore;
pub use postgres::PgChatStore;

/// Durable, per-conversation ordered message log plus receipt and reaction tables
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// `NotFound` when the conversation does not exist. Bumps the
    /// conversation's last activity in the same write.
    async fn create_message(&self, new: NewMessage) -> AppResult<Message>;

    async fn get_message(&self, id: Uuid) -> AppResult<Message>;

    /// Get-or-create on (message, user)
    async fn upsert_read_receipt(&self, message_id: Uuid, user_id: Uuid)
        -> AppResult<ReadReceipt>;

    /// Get-or-create on (message, user, emoji)
    async fn upsert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<Reaction>;

    async fn list_participants(&self, conversation_id: Uuid) -> AppResult<Vec<Uuid>>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Idempotent: at most one direct conversation per unordered pair
    async fn get_or_create_direct(&self, user_a: Uuid, user_b: Uuid) -> AppResult<Conversation>;

    async fn get_conversation(&self, id: Uuid) -> AppResult<Conversation>;

    /// Newest activity first
    async fn list_conversations(&self, user_id: Uuid) -> AppResult<Vec<ConversationSummary>>;

    /// Non-deleted messages in creation order
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: MessagePage,
    ) -> AppResult<Vec<Message>>;

    /// Returns the number of receipts created
    async fn mark_conversation_read(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<u64>;

    /// Only the sender may delete. Idempotent for the sender.
    async fn soft_delete_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<Message>;
}

#[async_trait]
pub trait MembershipProvider: Send + Sync {
    /// `false` for a conversation that does not exist
    async fn is_participant(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<bool>;
}

/// Read-only view of the account service's users
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `None` for unknown or inactive users
    async fn find_user(&self, user_id: Uuid) -> AppResult<Option<UserSummary>>;
}

pub trait ChatStore: MessageStore + ConversationStore + MembershipProvider + UserDirectory {}

impl<T> ChatStore for T where T: MessageStore + ConversationStore + MembershipProvider + UserDirectory
{}

/// Creation timestamp for the next message of a conversation.
///
/// Strictly greater than `last`, at microsecond precision so PostgreSQL
/// stores exactly what was compared.
pub(crate) fn next_message_timestamp(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    }
}
