use crate::error::{AppError, AppResult, Resource};
use crate::middleware::guards::ConversationMember;
use crate::models::{ConversationSummary, Message, MessagePage};
use crate::store::ChatStore;
use std::sync::Arc;
use uuid::Uuid;

/// Read side of conversations plus direct-conversation creation
#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ChatStore>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Create or fetch the direct conversation between `initiator` and
    /// `participant_id`, summarized for the initiator.
    pub async fn create_direct(
        &self,
        initiator: Uuid,
        participant_id: Uuid,
    ) -> AppResult<ConversationSummary> {
        if initiator == participant_id {
            return Err(AppError::BadRequest(
                "cannot start a conversation with yourself".into(),
            ));
        }
        if self.store.find_user(participant_id).await?.is_none() {
            return Err(AppError::NotFound(Resource::User));
        }

        let conversation = self
            .store
            .get_or_create_direct(initiator, participant_id)
            .await?;
        tracing::debug!(
            conversation_id = %conversation.id,
            user_id = %initiator,
            "direct conversation ready"
        );
        self.summary_for(initiator, conversation.id).await
    }

    pub async fn list(&self, user_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        self.store.list_conversations(user_id).await
    }

    /// `NotFound` for unknown conversations, `Forbidden` for non-participants
    pub async fn get(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<ConversationSummary> {
        self.authorize(user_id, conversation_id).await?;
        self.summary_for(user_id, conversation_id).await
    }

    pub async fn history(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        page: MessagePage,
    ) -> AppResult<Vec<Message>> {
        self.authorize(user_id, conversation_id).await?;
        self.store.list_messages(conversation_id, page).await
    }

    pub async fn mark_all_read(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<u64> {
        self.authorize(user_id, conversation_id).await?;
        self.store
            .mark_conversation_read(conversation_id, user_id)
            .await
    }

    pub async fn authorize(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<ConversationMember> {
        ConversationMember::verify(self.store.as_ref(), user_id, conversation_id).await
    }

    async fn summary_for(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<ConversationSummary> {
        self.store
            .list_conversations(user_id)
            .await?
            .into_iter()
            .find(|summary| summary.id == conversation_id)
            .ok_or(AppError::NotFound(Resource::Conversation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryChatStore;

    async fn setup() -> (Arc<InMemoryChatStore>, ConversationService, Uuid, Uuid) {
        let store = Arc::new(InMemoryChatStore::new());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.insert_user(alice, "alice").await;
        store.insert_user(bob, "bob").await;
        let service = ConversationService::new(store.clone());
        (store, service, alice, bob)
    }

    #[tokio::test]
    async fn create_direct_is_idempotent_across_initiators() {
        let (_store, service, alice, bob) = setup().await;

        let first = service.create_direct(alice, bob).await.unwrap();
        let second = service.create_direct(bob, alice).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.other_user.as_ref().map(|u| u.id), Some(bob));
        assert_eq!(second.other_user.as_ref().map(|u| u.id), Some(alice));
    }

    #[tokio::test]
    async fn create_direct_rejects_self_and_unknown_users() {
        let (_store, service, alice, _bob) = setup().await;

        assert!(matches!(
            service.create_direct(alice, alice).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            service.create_direct(alice, Uuid::new_v4()).await,
            Err(AppError::NotFound(Resource::User))
        ));
    }

    #[tokio::test]
    async fn outsiders_are_forbidden() {
        let (store, service, alice, bob) = setup().await;
        let carol = Uuid::new_v4();
        store.insert_user(carol, "carol").await;
        let conversation = service.create_direct(alice, bob).await.unwrap();

        assert!(matches!(
            service.get(carol, conversation.id).await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            service
                .history(carol, conversation.id, MessagePage::default())
                .await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            service.get(alice, Uuid::new_v4()).await,
            Err(AppError::NotFound(Resource::Conversation))
        ));
    }
}
