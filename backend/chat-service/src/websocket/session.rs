//! Per-connection chat protocol, independent of the transport.
//!
//! A session is created after the handshake authenticated its user, so it
//! starts out `Idle`. It processes inbound frames strictly one at a time and
//! releases every group membership when its inbound channel closes.

use super::message_types::{decode_inbound, WsInboundEvent, WsOutboundEvent};
use super::{ConnectionHandle, ConnectionId, ConnectionRegistry, Group};
use crate::error::{AppError, AppResult, Resource};
use crate::models::Message;
use crate::services::identity::Identity;
use crate::services::message_service::{MessageDraft, MessageService};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    InConversation(Uuid),
    Closed,
}

pub struct ChatSession {
    identity: Identity,
    handle: ConnectionHandle,
    registry: ConnectionRegistry,
    messages: MessageService,
    send_timeout: Duration,
    state: SessionState,
}

impl ChatSession {
    pub fn new(
        identity: Identity,
        handle: ConnectionHandle,
        registry: ConnectionRegistry,
        messages: MessageService,
        send_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            handle,
            registry,
            messages,
            send_timeout,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.handle.id
    }

    /// Drive the session until the transport drops its side of `inbound`.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<String>) {
        self.open().await;
        while let Some(frame) = inbound.recv().await {
            self.handle_frame(&frame).await;
        }
        self.close();
    }

    /// Join the personal group and confirm the connection to the client
    pub async fn open(&mut self) {
        self.registry
            .join(Group::User(self.identity.user_id), self.handle.id);
        tracing::info!(
            connection_id = %self.handle.id,
            user_id = %self.identity.user_id,
            "chat session established"
        );
        self.reply(WsOutboundEvent::ConnectionEstablished {
            message: "Connected to chat server".to_string(),
        })
        .await;
    }

    /// Release every group membership. Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let released = self.registry.disconnect(self.handle.id);
        self.state = SessionState::Closed;
        tracing::info!(
            connection_id = %self.handle.id,
            user_id = %self.identity.user_id,
            groups = released.len(),
            "chat session closed"
        );
    }

    /// Handle one inbound text frame. Malformed frames produce an `error`
    /// event and leave the state untouched.
    pub async fn handle_frame(&mut self, text: &str) {
        if self.state == SessionState::Closed {
            return;
        }

        let event = match decode_inbound(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(connection_id = %self.handle.id, error = %e, "malformed frame");
                self.reply(WsOutboundEvent::error(e.to_string())).await;
                return;
            }
        };

        let outcome = match event {
            WsInboundEvent::JoinConversation { conversation_id } => {
                self.join_conversation(conversation_id).await
            }
            WsInboundEvent::LeaveConversation { .. } => {
                self.leave_conversation();
                Ok(())
            }
            WsInboundEvent::SendMessage {
                conversation_id,
                content,
                reply_to,
            } => self.send_message(conversation_id, content, reply_to).await,
            WsInboundEvent::Typing {
                conversation_id,
                is_typing,
            } => self.typing(conversation_id, is_typing).await,
            WsInboundEvent::MarkAsRead {
                message_id,
                conversation_id,
            } => self.mark_as_read(message_id, conversation_id).await,
            WsInboundEvent::AddReaction {
                message_id,
                emoji,
                conversation_id,
            } => self.add_reaction(message_id, conversation_id, &emoji).await,
        };

        if let Err(e) = outcome {
            self.report(e).await;
        }
    }

    async fn join_conversation(&mut self, conversation_id: Uuid) -> AppResult<()> {
        self.messages
            .ensure_participant(self.identity.user_id, conversation_id)
            .await?;

        if let SessionState::InConversation(current) = self.state {
            if current != conversation_id {
                self.registry
                    .leave(Group::Conversation(current), self.handle.id);
            }
        }
        self.registry
            .join(Group::Conversation(conversation_id), self.handle.id);
        self.state = SessionState::InConversation(conversation_id);

        self.reply(WsOutboundEvent::JoinedConversation { conversation_id })
            .await;
        Ok(())
    }

    fn leave_conversation(&mut self) {
        if let SessionState::InConversation(current) = self.state {
            self.registry
                .leave(Group::Conversation(current), self.handle.id);
            self.state = SessionState::Idle;
        }
    }

    async fn send_message(
        &mut self,
        conversation_id: Uuid,
        content: String,
        reply_to: Option<Uuid>,
    ) -> AppResult<()> {
        if content.trim().is_empty() {
            return Ok(());
        }
        self.authorize(conversation_id).await?;

        let draft = MessageDraft::text(conversation_id, content, reply_to);
        if let Some(message) = self.messages.send(&self.identity, draft).await? {
            tracing::debug!(
                connection_id = %self.handle.id,
                conversation_id = %conversation_id,
                message_id = %message.id,
                "message sent"
            );
        }
        Ok(())
    }

    async fn typing(&mut self, conversation_id: Uuid, is_typing: bool) -> AppResult<()> {
        self.authorize(conversation_id).await?;
        self.registry.publish(
            Group::Conversation(conversation_id),
            &WsOutboundEvent::Typing {
                user_id: self.identity.user_id,
                username: self.identity.username.clone(),
                is_typing,
            },
            Some(self.handle.id),
        );
        Ok(())
    }

    async fn mark_as_read(&mut self, message_id: Uuid, conversation_id: Uuid) -> AppResult<()> {
        let message = self.message_in(message_id, conversation_id).await?;
        self.messages.mark_read(&self.identity, &message).await?;
        Ok(())
    }

    async fn add_reaction(
        &mut self,
        message_id: Uuid,
        conversation_id: Uuid,
        emoji: &str,
    ) -> AppResult<()> {
        let message = self.message_in(message_id, conversation_id).await?;
        self.messages
            .add_reaction(&self.identity, &message, emoji)
            .await?;
        Ok(())
    }

    /// The message, provided it belongs to a conversation this user is in
    async fn message_in(&self, message_id: Uuid, conversation_id: Uuid) -> AppResult<Message> {
        self.authorize(conversation_id).await?;
        let message = self.messages.get_message(message_id).await?;
        if message.conversation_id != conversation_id {
            return Err(AppError::NotFound(Resource::Message));
        }
        Ok(message)
    }

    /// Membership was already verified for the joined conversation.
    async fn authorize(&self, conversation_id: Uuid) -> AppResult<()> {
        if self.state == SessionState::InConversation(conversation_id) {
            return Ok(());
        }
        self.messages
            .ensure_participant(self.identity.user_id, conversation_id)
            .await
    }

    async fn report(&self, error: AppError) {
        if error.status_code() >= 500 {
            tracing::error!(
                connection_id = %self.handle.id,
                user_id = %self.identity.user_id,
                error = %error,
                "chat event failed"
            );
        } else {
            tracing::debug!(
                connection_id = %self.handle.id,
                user_id = %self.identity.user_id,
                error = %error,
                "chat event rejected"
            );
        }
        self.reply(WsOutboundEvent::error(error.client_message()))
            .await;
    }

    async fn reply(&self, event: WsOutboundEvent) {
        if !self.handle.send(&event, self.send_timeout).await {
            tracing::warn!(
                connection_id = %self.handle.id,
                event = event.kind(),
                "reply not delivered to own connection"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifier::{LogNotificationSink, OfflineNotifier};
    use crate::store::InMemoryChatStore;
    use std::sync::Arc;

    async fn next_event(rx: &mut super::super::OutboundReceiver) -> WsOutboundEvent {
        let frame = rx.recv().await.expect("frame");
        serde_json::from_str(&frame).expect("outbound json")
    }

    #[tokio::test]
    async fn leave_while_idle_is_a_noop_and_close_is_idempotent() {
        let store = Arc::new(InMemoryChatStore::new());
        let alice = store.insert_user(Uuid::new_v4(), "alice").await;
        let registry = ConnectionRegistry::new(16);
        let (notifier, _pool) =
            OfflineNotifier::start(registry.clone(), 8, 1, Arc::new(LogNotificationSink));
        let messages = MessageService::new(store.clone(), registry.clone(), notifier);

        let (handle, mut rx) = registry.register(alice.id);
        let mut session = ChatSession::new(
            Identity {
                user_id: alice.id,
                username: alice.username.clone(),
            },
            handle,
            registry.clone(),
            messages,
            Duration::from_millis(100),
        );
        session.open().await;
        assert!(matches!(
            next_event(&mut rx).await,
            WsOutboundEvent::ConnectionEstablished { .. }
        ));

        session
            .handle_frame(r#"{"type":"leave_conversation"}"#)
            .await;
        assert_eq!(session.state(), SessionState::Idle);
        assert!(rx.try_recv().is_err());

        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(registry.subscriber_count(Group::User(alice.id)), 0);
        assert_eq!(registry.connection_count(), 0);
    }
}
