use actix_web::{web, App, HttpServer};
use anyhow::Context;
use chat_service::{
    config::{self, StoreBackend},
    db,
    error::AppError,
    logging, routes,
    services::{LogNotificationSink, OfflineNotifier},
    state::AppState,
    store::{ChatStore, InMemoryChatStore, PgChatStore},
    websocket::ConnectionRegistry,
};
use crypto_core::JwtValidator;
use std::sync::Arc;
use std::time::Duration;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);
    tracing::info!(config = ?cfg, "starting chat-service");

    let store: Arc<dyn ChatStore> = match cfg.store {
        StoreBackend::Postgres => {
            let db_cfg = cfg
                .database
                .as_ref()
                .ok_or_else(|| AppError::Config("DATABASE_URL is required".into()))?;
            let pool = db::init_pool(db_cfg).await.context("connect to PostgreSQL")?;
            db::run_migrations(&pool)
                .await
                .context("apply migrations")?;
            Arc::new(PgChatStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store; nothing survives a restart");
            Arc::new(InMemoryChatStore::new())
        }
    };

    let jwt = Arc::new(
        JwtValidator::from_secret(cfg.jwt_secret.as_bytes())
            .map_err(|e| AppError::Config(format!("JWT_SECRET: {e}")))?,
    );

    let registry = ConnectionRegistry::new(cfg.ws.outbound_buffer);
    let (notifier, notify_workers) = OfflineNotifier::start(
        registry.clone(),
        cfg.notify.queue_capacity,
        cfg.notify.workers,
        Arc::new(LogNotificationSink),
    );

    let state = AppState::new(cfg.clone(), store, registry, notifier, jwt.clone());

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(addr = %bind_addr, "listening");

    let rest_state = state.clone();
    // actix-web HttpServer futures are not Send, so the server runs in the
    // foreground instead of on a spawned task.
    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);
        let jwt = rest_state.jwt.clone();

        App::new()
            .wrap(cors)
            .wrap(actix_middleware::Logging)
            .wrap(actix_middleware::RequestId)
            .app_data(web::Data::new(rest_state.clone()))
            .configure(|cfg| routes::configure(cfg, jwt))
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("HTTP server: {e}")))?;

    drop(state);
    if tokio::time::timeout(SHUTDOWN_DRAIN, notify_workers.join())
        .await
        .is_err()
    {
        tracing::warn!("notification workers did not drain before shutdown");
    }
    tracing::info!("chat-service stopped");
    Ok(())
}
