use crate::{
    error::AppError,
    middleware::guards::User,
    models::{ConversationSummary, MessagePage},
    state::AppState,
};
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub participant_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkedResponse {
    pub marked: u64,
}

/// POST /conversations
/// Create or fetch the direct conversation with another user
#[post("/conversations")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let summary: ConversationSummary = state
        .conversations
        .create_direct(user.id, body.participant_id)
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// GET /conversations
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let summaries = state.conversations.list(user.id).await?;
    Ok(HttpResponse::Ok().json(summaries))
}

/// GET /conversations/{id}
#[get("/conversations/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let summary = state
        .conversations
        .get(user.id, conversation_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// GET /conversations/{id}/messages?before=&limit=
/// Oldest first within the page
#[get("/conversations/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    page: web::Query<MessagePage>,
) -> Result<HttpResponse, AppError> {
    let messages = state
        .conversations
        .history(user.id, conversation_id.into_inner(), page.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// POST /conversations/{id}/read
/// Mark every message from other participants as read
#[post("/conversations/{id}/read")]
pub async fn mark_conversation_read(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let marked = state
        .conversations
        .mark_all_read(user.id, conversation_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(MarkedResponse { marked }))
}
