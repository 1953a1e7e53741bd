//! In-process store used for local runs and tests.
//!
//! One `RwLock` guards the whole state; every trait call is a single
//! critical section, which gives the same atomicity as a PostgreSQL
//! transaction.

use super::{
    next_message_timestamp, ConversationStore, MembershipProvider, MessageStore, UserDirectory,
};
use crate::error::{AppError, AppResult, Resource};
use crate::models::{
    conversation::pair_key, Conversation, ConversationSummary, ConversationType, Message,
    MessagePage, MessageType, NewMessage, Reaction, ReadReceipt, UserSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

struct UserRecord {
    summary: UserSummary,
    is_active: bool,
}

struct StoredMessage {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    message_type: MessageType,
    file: Option<String>,
    reply_to_id: Option<Uuid>,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, UserRecord>,
    conversations: HashMap<Uuid, Conversation>,
    direct_pairs: HashMap<String, Uuid>,
    messages: HashMap<Uuid, StoredMessage>,
    /// conversation id -> message ids in creation order
    timelines: HashMap<Uuid, Vec<Uuid>>,
    receipts: HashMap<(Uuid, Uuid), ReadReceipt>,
    reactions: HashMap<(Uuid, Uuid, String), Reaction>,
}

impl MemoryState {
    fn username(&self, user_id: Uuid) -> String {
        self.users
            .get(&user_id)
            .map(|u| u.summary.username.clone())
            .unwrap_or_default()
    }

    fn render(&self, stored: &StoredMessage) -> Message {
        let reply_to = stored
            .reply_to_id
            .and_then(|id| self.messages.get(&id))
            .map(|reply| self.render_flat(reply).preview());

        Message {
            reply_to,
            ..self.render_flat(stored)
        }
    }

    fn render_flat(&self, stored: &StoredMessage) -> Message {
        Message {
            id: stored.id,
            conversation_id: stored.conversation_id,
            sender_id: stored.sender_id,
            sender_username: self.username(stored.sender_id),
            content: stored.content.clone(),
            message_type: stored.message_type,
            file: stored.file.clone(),
            reply_to: None,
            is_deleted: stored.is_deleted,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }

    fn conversation(&self, id: Uuid) -> AppResult<&Conversation> {
        self.conversations
            .get(&id)
            .ok_or(AppError::NotFound(Resource::Conversation))
    }

    fn summary_of(&self, user_id: Uuid) -> UserSummary {
        self.users
            .get(&user_id)
            .map(|u| u.summary.clone())
            .unwrap_or(UserSummary {
                id: user_id,
                username: String::new(),
            })
    }

    fn summarize(&self, conversation: &Conversation, viewer: Uuid) -> ConversationSummary {
        let timeline = self
            .timelines
            .get(&conversation.id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let live = || {
            timeline
                .iter()
                .filter_map(|id| self.messages.get(id))
                .filter(|m| !m.is_deleted)
        };

        let last_message = live().last().map(|m| self.render(m));
        let unread_count = live()
            .filter(|m| m.sender_id != viewer && !self.receipts.contains_key(&(m.id, viewer)))
            .count() as i64;
        let other_user = match conversation.conversation_type {
            ConversationType::Direct => conversation
                .participants
                .iter()
                .find(|id| **id != viewer)
                .map(|id| self.summary_of(*id)),
            ConversationType::Group => None,
        };

        ConversationSummary {
            id: conversation.id,
            conversation_type: conversation.conversation_type,
            participants: conversation
                .participants
                .iter()
                .map(|id| self.summary_of(*id))
                .collect(),
            last_message,
            unread_count,
            other_user,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

#[derive(Default)]
pub struct InMemoryChatStore {
    state: RwLock<MemoryState>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user the way the account service would
    pub async fn insert_user(&self, id: Uuid, username: &str) -> UserSummary {
        let summary = UserSummary {
            id,
            username: username.to_string(),
        };
        self.state.write().await.users.insert(
            id,
            UserRecord {
                summary: summary.clone(),
                is_active: true,
            },
        );
        summary
    }

    pub async fn deactivate_user(&self, id: Uuid) {
        if let Some(user) = self.state.write().await.users.get_mut(&id) {
            user.is_active = false;
        }
    }

    /// Group conversations are created by the out-of-scope group feature;
    /// this seeds one.
    pub async fn create_group(&self, participants: &[Uuid]) -> AppResult<Conversation> {
        let mut unique = Vec::with_capacity(participants.len());
        for id in participants {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }
        if unique.len() < 2 {
            return Err(AppError::BadRequest(
                "a conversation needs at least two participants".into(),
            ));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            conversation_type: ConversationType::Group,
            participants: unique,
            created_at: now,
            updated_at: now,
        };
        self.state
            .write()
            .await
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    pub async fn receipt_count(&self, message_id: Uuid) -> usize {
        let state = self.state.read().await;
        state.receipts.keys().filter(|(m, _)| *m == message_id).count()
    }

    pub async fn reaction_count(&self, message_id: Uuid) -> usize {
        let state = self.state.read().await;
        state
            .reactions
            .keys()
            .filter(|(m, _, _)| *m == message_id)
            .count()
    }

    pub async fn message_count(&self, conversation_id: Uuid) -> usize {
        let state = self.state.read().await;
        state
            .timelines
            .get(&conversation_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for InMemoryChatStore {
    async fn create_message(&self, new: NewMessage) -> AppResult<Message> {
        let mut state = self.state.write().await;
        state.conversation(new.conversation_id)?;

        let reply_to_id = new.reply_to_id.filter(|id| {
            state
                .messages
                .get(id)
                .is_some_and(|m| m.conversation_id == new.conversation_id)
        });

        let last = state
            .timelines
            .get(&new.conversation_id)
            .and_then(|t| t.last())
            .and_then(|id| state.messages.get(id))
            .map(|m| m.created_at);
        let created_at = next_message_timestamp(last);

        let stored = StoredMessage {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            content: new.content,
            message_type: new.message_type,
            file: new.file,
            reply_to_id,
            is_deleted: false,
            created_at,
            updated_at: created_at,
        };
        let id = stored.id;

        if let Some(conversation) = state.conversations.get_mut(&new.conversation_id) {
            conversation.updated_at = created_at;
        }
        state
            .timelines
            .entry(new.conversation_id)
            .or_default()
            .push(id);
        state.messages.insert(id, stored);

        let stored = state
            .messages
            .get(&id)
            .ok_or(AppError::Internal)?;
        Ok(state.render(stored))
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Message> {
        let state = self.state.read().await;
        state
            .messages
            .get(&id)
            .map(|m| state.render(m))
            .ok_or(AppError::NotFound(Resource::Message))
    }

    async fn upsert_read_receipt(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<ReadReceipt> {
        let mut state = self.state.write().await;
        if !state.messages.contains_key(&message_id) {
            return Err(AppError::NotFound(Resource::Message));
        }

        let receipt = state
            .receipts
            .entry((message_id, user_id))
            .or_insert_with(|| ReadReceipt {
                id: Uuid::new_v4(),
                message_id,
                user_id,
                read_at: Utc::now(),
            });
        Ok(receipt.clone())
    }

    async fn upsert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<Reaction> {
        let mut state = self.state.write().await;
        if !state.messages.contains_key(&message_id) {
            return Err(AppError::NotFound(Resource::Message));
        }

        let reaction = state
            .reactions
            .entry((message_id, user_id, emoji.to_string()))
            .or_insert_with(|| Reaction {
                id: Uuid::new_v4(),
                message_id,
                user_id,
                emoji: emoji.to_string(),
                created_at: Utc::now(),
            });
        Ok(reaction.clone())
    }

    async fn list_participants(&self, conversation_id: Uuid) -> AppResult<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state.conversation(conversation_id)?.participants.clone())
    }
}

#[async_trait]
impl ConversationStore for InMemoryChatStore {
    async fn get_or_create_direct(&self, user_a: Uuid, user_b: Uuid) -> AppResult<Conversation> {
        if user_a == user_b {
            return Err(AppError::BadRequest(
                "cannot start a conversation with yourself".into(),
            ));
        }

        let key = pair_key(user_a, user_b);
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .direct_pairs
            .get(&key)
            .and_then(|id| state.conversations.get(id))
        {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            conversation_type: ConversationType::Direct,
            participants: vec![user_a, user_b],
            created_at: now,
            updated_at: now,
        };
        state.direct_pairs.insert(key, conversation.id);
        state
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> AppResult<Conversation> {
        let state = self.state.read().await;
        state.conversation(id).cloned()
    }

    async fn list_conversations(&self, user_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let state = self.state.read().await;
        let mut summaries: Vec<ConversationSummary> = state
            .conversations
            .values()
            .filter(|c| c.has_participant(user_id))
            .map(|c| state.summarize(c, user_id))
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: MessagePage,
    ) -> AppResult<Vec<Message>> {
        let state = self.state.read().await;
        state.conversation(conversation_id)?;

        let cutoff = match page.before {
            Some(before) => Some(
                state
                    .messages
                    .get(&before)
                    .filter(|m| m.conversation_id == conversation_id)
                    .map(|m| m.created_at)
                    .ok_or(AppError::NotFound(Resource::Message))?,
            ),
            None => None,
        };

        let limit = page.effective_limit() as usize;
        let mut newest_first: Vec<Message> = state
            .timelines
            .get(&conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .rev()
            .filter_map(|id| state.messages.get(id))
            .filter(|m| !m.is_deleted)
            .filter(|m| cutoff.map_or(true, |c| m.created_at < c))
            .take(limit)
            .map(|m| state.render(m))
            .collect();
        newest_first.reverse();
        Ok(newest_first)
    }

    async fn mark_conversation_read(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<u64> {
        let mut state = self.state.write().await;
        state.conversation(conversation_id)?;

        let unread: Vec<Uuid> = state
            .timelines
            .get(&conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|id| state.messages.get(id))
            .filter(|m| !m.is_deleted && m.sender_id != user_id)
            .filter(|m| !state.receipts.contains_key(&(m.id, user_id)))
            .map(|m| m.id)
            .collect();

        let now = Utc::now();
        for message_id in &unread {
            state.receipts.insert(
                (*message_id, user_id),
                ReadReceipt {
                    id: Uuid::new_v4(),
                    message_id: *message_id,
                    user_id,
                    read_at: now,
                },
            );
        }
        Ok(unread.len() as u64)
    }

    async fn soft_delete_message(&self, message_id: Uuid, user_id: Uuid) -> AppResult<Message> {
        let mut state = self.state.write().await;
        let stored = state
            .messages
            .get_mut(&message_id)
            .ok_or(AppError::NotFound(Resource::Message))?;
        if stored.sender_id != user_id {
            return Err(AppError::Forbidden);
        }
        if !stored.is_deleted {
            stored.is_deleted = true;
            stored.updated_at = Utc::now();
        }

        let stored = state
            .messages
            .get(&message_id)
            .ok_or(AppError::NotFound(Resource::Message))?;
        Ok(state.render(stored))
    }
}

#[async_trait]
impl MembershipProvider for InMemoryChatStore {
    async fn is_participant(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .get(&conversation_id)
            .is_some_and(|c| c.has_participant(user_id)))
    }
}

#[async_trait]
impl UserDirectory for InMemoryChatStore {
    async fn find_user(&self, user_id: Uuid) -> AppResult<Option<UserSummary>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .get(&user_id)
            .filter(|u| u.is_active)
            .map(|u| u.summary.clone()))
    }
}
