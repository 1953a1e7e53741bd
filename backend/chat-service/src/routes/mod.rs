pub mod conversations;
pub mod messages;
pub mod wsroute;

use crate::metrics;
use actix_middleware::JwtAuthMiddleware;
use actix_web::{get, web, HttpResponse};
use crypto_core::JwtValidator;
use std::sync::Arc;

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

#[get("/metrics")]
pub async fn metrics_handler() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::render())
}

/// Register every route. The socket handshake authenticates itself; the
/// REST scope goes through `JwtAuthMiddleware`.
pub fn configure(cfg: &mut web::ServiceConfig, jwt: Arc<JwtValidator>) {
    cfg.service(health)
        .service(metrics_handler)
        .service(wsroute::ws_handler)
        .service(
            web::scope("/api/v1")
                .wrap(JwtAuthMiddleware::new(jwt))
                .service(conversations::create_conversation)
                .service(conversations::list_conversations)
                .service(conversations::get_conversation)
                .service(conversations::get_messages)
                .service(conversations::mark_conversation_read)
                .service(messages::send_message)
                .service(messages::mark_message_read)
                .service(messages::delete_message),
        );
}
