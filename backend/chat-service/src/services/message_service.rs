//! # Message Service
//!
//! Owns the write path of chat messages: persist, then fan out.
//!
//! Sends to one conversation are serialized by a per-conversation
//! sequencing lock held across persist + publish, so every subscriber sees
//! `new_message` events in the order the store assigned.

use crate::error::{AppError, AppResult};
use crate::metrics::MESSAGES_PERSISTED_TOTAL;
use crate::models::{Message, MessageType, NewMessage, Reaction, ReadReceipt};
use crate::services::identity::Identity;
use crate::services::notifier::OfflineNotifier;
use crate::store::ChatStore;
use crate::websocket::message_types::WsOutboundEvent;
use crate::websocket::{ConnectionRegistry, Group};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const MAX_EMOJI_CHARS: usize = 10;

/// A message as submitted by a client, before validation
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub conversation_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub file: Option<String>,
    pub reply_to: Option<Uuid>,
}

impl MessageDraft {
    pub fn text(conversation_id: Uuid, content: impl Into<String>, reply_to: Option<Uuid>) -> Self {
        Self {
            conversation_id,
            content: content.into(),
            message_type: MessageType::Text,
            file: None,
            reply_to,
        }
    }
}

/// Trimmed, non-blank emoji of at most [`MAX_EMOJI_CHARS`] characters
pub fn validate_emoji(emoji: &str) -> AppResult<&str> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(AppError::BadRequest("Emoji is required".into()));
    }
    if emoji.chars().count() > MAX_EMOJI_CHARS {
        return Err(AppError::BadRequest(format!(
            "Emoji must be at most {MAX_EMOJI_CHARS} characters"
        )));
    }
    Ok(emoji)
}

#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn ChatStore>,
    registry: ConnectionRegistry,
    notifier: OfflineNotifier,
    sequencers: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        registry: ConnectionRegistry,
        notifier: OfflineNotifier,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            sequencers: Arc::new(DashMap::new()),
        }
    }

    /// `Forbidden` unless `user_id` participates in the conversation
    pub async fn ensure_participant(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<()> {
        if self.store.is_participant(user_id, conversation_id).await? {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    pub async fn get_message(&self, message_id: Uuid) -> AppResult<Message> {
        self.store.get_message(message_id).await
    }

    /// Persist a message and fan it out.
    ///
    /// Returns `Ok(None)` when the draft has neither text nor a file: such
    /// drafts are dropped without persistence or events.
    pub async fn send(&self, sender: &Identity, draft: MessageDraft) -> AppResult<Option<Message>> {
        let content = draft.content.trim();
        if content.is_empty() && draft.file.is_none() {
            return Ok(None);
        }
        let new = NewMessage {
            conversation_id: draft.conversation_id,
            sender_id: sender.user_id,
            content: content.to_string(),
            message_type: draft.message_type,
            file: draft.file,
            reply_to_id: draft.reply_to,
        };

        let sequencer = self.sequencer(draft.conversation_id);
        let persisted = {
            let _turn = sequencer.lock().await;
            let persisted = self.store.create_message(new).await;
            if let Ok(message) = &persisted {
                MESSAGES_PERSISTED_TOTAL.inc();
                self.fan_out(message).await;
            }
            persisted
        };
        drop(sequencer);
        self.release_sequencer(draft.conversation_id);

        persisted.map(Some)
    }

    /// Idempotent read receipt; publishes `message_read` every time
    pub async fn mark_read(&self, reader: &Identity, message: &Message) -> AppResult<ReadReceipt> {
        let receipt = self
            .store
            .upsert_read_receipt(message.id, reader.user_id)
            .await?;

        self.registry.publish(
            Group::Conversation(message.conversation_id),
            &WsOutboundEvent::MessageRead {
                message_id: message.id,
                user_id: reader.user_id,
                username: reader.username.clone(),
            },
            None,
        );
        Ok(receipt)
    }

    /// Idempotent reaction on (message, user, emoji); publishes `reaction_added`
    pub async fn add_reaction(
        &self,
        user: &Identity,
        message: &Message,
        emoji: &str,
    ) -> AppResult<Reaction> {
        let emoji = validate_emoji(emoji)?;
        let reaction = self
            .store
            .upsert_reaction(message.id, user.user_id, emoji)
            .await?;

        self.registry.publish(
            Group::Conversation(message.conversation_id),
            &WsOutboundEvent::ReactionAdded {
                message_id: message.id,
                emoji: reaction.emoji.clone(),
                user_id: user.user_id,
                username: user.username.clone(),
            },
            None,
        );
        Ok(reaction)
    }

    pub async fn delete_message(&self, user_id: Uuid, message_id: Uuid) -> AppResult<Message> {
        self.store.soft_delete_message(message_id, user_id).await
    }

    async fn fan_out(&self, message: &Message) {
        let conversation_id = message.conversation_id;
        self.registry.publish(
            Group::Conversation(conversation_id),
            &WsOutboundEvent::NewMessage {
                message: message.clone(),
            },
            None,
        );

        // The message is committed; a failure here only costs list refreshes.
        let participants = match self.store.list_participants(conversation_id).await {
            Ok(participants) => participants,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "could not load participants for conversation_updated"
                );
                return;
            }
        };

        let updated = WsOutboundEvent::ConversationUpdated {
            conversation_id,
            last_message: message.clone(),
        };
        for user_id in &participants {
            self.registry.publish(Group::User(*user_id), &updated, None);
        }

        self.notifier.notify_offline(message, &participants);
    }

    fn sequencer(&self, conversation_id: Uuid) -> Arc<Mutex<()>> {
        self.sequencers
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget an idle sequencer; a later send creates a fresh one.
    fn release_sequencer(&self, conversation_id: Uuid) {
        self.sequencers
            .remove_if(&conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifier::LogNotificationSink;
    use crate::store::{ConversationStore, InMemoryChatStore};

    #[test]
    fn emoji_validation() {
        assert_eq!(validate_emoji(" 👍 ").unwrap(), "👍");
        assert!(validate_emoji("   ").is_err());
        assert!(validate_emoji("abcdefghijk").is_err());
        assert!(validate_emoji("abcdefghij").is_ok());
    }

    fn service(store: Arc<InMemoryChatStore>) -> MessageService {
        let registry = ConnectionRegistry::new(8);
        let (notifier, _workers) =
            OfflineNotifier::start(registry.clone(), 8, 1, Arc::new(LogNotificationSink));
        MessageService::new(store, registry, notifier)
    }

    #[tokio::test]
    async fn sequencer_is_released_after_failed_and_successful_sends() {
        let store = Arc::new(InMemoryChatStore::new());
        let alice = store.insert_user(Uuid::new_v4(), "alice").await;
        let bob = store.insert_user(Uuid::new_v4(), "bob").await;
        let conversation = store.get_or_create_direct(alice.id, bob.id).await.unwrap();
        let messages = service(store);
        let sender = Identity {
            user_id: alice.id,
            username: alice.username.clone(),
        };

        let missing = Uuid::new_v4();
        let err = messages
            .send(&sender, MessageDraft::text(missing, "hello", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(!messages.sequencers.contains_key(&missing));

        let sent = messages
            .send(&sender, MessageDraft::text(conversation.id, "hello", None))
            .await
            .unwrap();
        assert!(sent.is_some());
        assert!(messages.sequencers.is_empty());
    }
}
