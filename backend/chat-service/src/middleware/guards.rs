//! Authorization guards that enforce permission checks at the type level.
//! A handler holding a [`ConversationMember`] has already been checked.

use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

use crate::error::AppError;
use crate::store::ChatStore;
use actix_middleware::UserId;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};

/// Represents an authenticated user extracted from JWT claims
#[derive(Debug, Clone, Copy)]
pub struct User {
    pub id: Uuid,
}

impl FromRequest for User {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let extensions = req.extensions();
        let user_id = extensions.get::<UserId>().map(|u| u.0);

        Box::pin(async move {
            let user_id = user_id.ok_or(AppError::Unauthorized)?;
            Ok(User { id: user_id })
        })
    }
}

/// A user verified to participate in a conversation
#[derive(Debug, Clone)]
pub struct ConversationMember {
    pub conversation_id: Uuid,
}

impl ConversationMember {
    /// `NotFound` when the conversation is missing, `Forbidden` when the
    /// user is not one of its participants.
    pub async fn verify(
        store: &dyn ChatStore,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Self, AppError> {
        let conversation = store.get_conversation(conversation_id).await?;
        if !conversation.has_participant(user_id) {
            tracing::debug!(
                user_id = %user_id,
                conversation_id = %conversation_id,
                "not a participant"
            );
            return Err(AppError::Forbidden);
        }

        Ok(ConversationMember { conversation_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Resource;
    use crate::store::{ConversationStore, InMemoryChatStore};

    #[tokio::test]
    async fn verify_distinguishes_missing_and_foreign_conversations() {
        let store = InMemoryChatStore::new();
        let alice = store.insert_user(Uuid::new_v4(), "alice").await.id;
        let bob = store.insert_user(Uuid::new_v4(), "bob").await.id;
        let carol = store.insert_user(Uuid::new_v4(), "carol").await.id;
        let group = store.create_group(&[alice, bob, carol]).await.unwrap();
        let direct = store.get_or_create_direct(alice, bob).await.unwrap();

        let member = ConversationMember::verify(&store, carol, group.id)
            .await
            .unwrap();
        assert_eq!(member.conversation_id, group.id);

        assert!(matches!(
            ConversationMember::verify(&store, carol, direct.id).await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            ConversationMember::verify(&store, alice, Uuid::new_v4()).await,
            Err(AppError::NotFound(Resource::Conversation))
        ));
    }
}
