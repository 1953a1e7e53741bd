use crate::{
    config::Config,
    services::{
        ConversationService, IdentityProvider, JwtIdentityProvider, MessageService,
        OfflineNotifier,
    },
    store::ChatStore,
    websocket::ConnectionRegistry,
};
use crypto_core::JwtValidator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ChatStore>,
    pub registry: ConnectionRegistry,
    /// Resolves socket handshake credentials
    pub identity: Arc<dyn IdentityProvider>,
    /// Backs `JwtAuthMiddleware` on the REST scope
    pub jwt: Arc<JwtValidator>,
    pub messages: MessageService,
    pub conversations: ConversationService,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ChatStore>,
        registry: ConnectionRegistry,
        notifier: OfflineNotifier,
        jwt: Arc<JwtValidator>,
    ) -> Self {
        let identity: Arc<dyn IdentityProvider> =
            Arc::new(JwtIdentityProvider::new(jwt.clone(), store.clone()));
        Self {
            messages: MessageService::new(store.clone(), registry.clone(), notifier),
            conversations: ConversationService::new(store.clone()),
            config,
            store,
            registry,
            identity,
            jwt,
        }
    }
}
