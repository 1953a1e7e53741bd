use crate::error::{AppError, AppResult};
use crate::store::UserDirectory;
use async_trait::async_trait;
use crypto_core::JwtValidator;
use std::sync::Arc;
use uuid::Uuid;

/// Authenticated principal of a connection or request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

/// Resolves an opaque bearer credential to a user
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Unauthorized` for invalid, expired or orphaned credentials
    async fn resolve(&self, credential: &str) -> AppResult<Identity>;
}

/// Validates account-service JWTs and confirms the user is still active
pub struct JwtIdentityProvider<U: ?Sized = dyn UserDirectory> {
    validator: Arc<JwtValidator>,
    users: Arc<U>,
}

impl<U: UserDirectory + ?Sized> JwtIdentityProvider<U> {
    pub fn new(validator: Arc<JwtValidator>, users: Arc<U>) -> Self {
        Self { validator, users }
    }
}

#[async_trait]
impl<U: UserDirectory + ?Sized + 'static> IdentityProvider for JwtIdentityProvider<U> {
    async fn resolve(&self, credential: &str) -> AppResult<Identity> {
        let user_id = self.validator.user_id(credential).map_err(|e| {
            tracing::debug!(error = %e, "bearer credential rejected");
            AppError::Unauthorized
        })?;

        let user = self.users.find_user(user_id).await?.ok_or_else(|| {
            tracing::debug!(user_id = %user_id, "token subject is unknown or inactive");
            AppError::Unauthorized
        })?;

        Ok(Identity {
            user_id: user.id,
            username: user.username,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryChatStore;
    use chrono::Duration;

    const SECRET: &[u8] = b"test-secret-that-is-at-least-32-bytes-long";

    async fn provider() -> (
        JwtIdentityProvider<InMemoryChatStore>,
        Arc<JwtValidator>,
        Arc<InMemoryChatStore>,
    ) {
        let validator = Arc::new(JwtValidator::from_secret(SECRET).unwrap());
        let store = Arc::new(InMemoryChatStore::new());
        let provider = JwtIdentityProvider::new(validator.clone(), store.clone());
        (provider, validator, store)
    }

    #[tokio::test]
    async fn resolves_active_user() {
        let (provider, validator, store) = provider().await;
        let user_id = Uuid::new_v4();
        store.insert_user(user_id, "alice").await;
        let token = validator
            .issue_access_token(user_id, "alice", Duration::minutes(5))
            .unwrap();

        let identity = provider.resolve(&token).await.unwrap();
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.username, "alice");
    }

    #[tokio::test]
    async fn rejects_garbage_and_unknown_users() {
        let (provider, validator, store) = provider().await;
        assert!(matches!(
            provider.resolve("not-a-jwt").await,
            Err(AppError::Unauthorized)
        ));

        let user_id = Uuid::new_v4();
        let token = validator
            .issue_access_token(user_id, "ghost", Duration::minutes(5))
            .unwrap();
        assert!(matches!(
            provider.resolve(&token).await,
            Err(AppError::Unauthorized)
        ));

        store.insert_user(user_id, "ghost").await;
        store.deactivate_user(user_id).await;
        assert!(matches!(
            provider.resolve(&token).await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let (provider, validator, store) = provider().await;
        let user_id = Uuid::new_v4();
        store.insert_user(user_id, "alice").await;
        let token = validator
            .issue_access_token(user_id, "alice", Duration::minutes(-10))
            .unwrap();

        assert!(matches!(
            provider.resolve(&token).await,
            Err(AppError::Unauthorized)
        ));
    }
}
