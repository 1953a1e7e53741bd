use crate::{
    error::AppError,
    middleware::guards::{ConversationMember, User},
    models::MessageType,
    services::{Identity, MessageDraft},
    state::AppState,
};
use actix_web::{delete, post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub file: Option<String>,
    pub reply_to: Option<Uuid>,
}

/// Username is not carried by the token; read it from the directory.
async fn identity_of(state: &AppState, user: User) -> Result<Identity, AppError> {
    let summary = state
        .store
        .find_user(user.id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Identity {
        user_id: summary.id,
        username: summary.username,
    })
}

/// POST /conversations/{id}/messages
/// Same persistence, ordering and fan-out as `send_message` on the socket
#[post("/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let member =
        ConversationMember::verify(state.store.as_ref(), user.id, conversation_id.into_inner())
            .await?;
    let identity = identity_of(&state, user).await?;

    let body = body.into_inner();
    let draft = MessageDraft {
        conversation_id: member.conversation_id,
        content: body.content,
        message_type: body.message_type,
        file: body.file.filter(|f| !f.trim().is_empty()),
        reply_to: body.reply_to,
    };

    let message = state
        .messages
        .send(&identity, draft)
        .await?
        .ok_or_else(|| AppError::BadRequest("Message must have content or a file".into()))?;

    Ok(HttpResponse::Created().json(message))
}

/// POST /messages/{id}/read
#[post("/messages/{id}/read")]
pub async fn mark_message_read(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let message = state.messages.get_message(message_id.into_inner()).await?;
    ConversationMember::verify(state.store.as_ref(), user.id, message.conversation_id).await?;
    let identity = identity_of(&state, user).await?;

    let receipt = state.messages.mark_read(&identity, &message).await?;
    Ok(HttpResponse::Ok().json(receipt))
}

/// DELETE /messages/{id}
/// Soft delete; only the sender may delete
#[delete("/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    state
        .messages
        .delete_message(user.id, message_id.into_inner())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
