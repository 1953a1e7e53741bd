use crate::error::{AppError, Resource};
use actix_web::{http::StatusCode, HttpResponse};
use error_types::{error_codes, error_types as kinds, ErrorResponse};

/// Map domain errors to HTTP status + uniform error body
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::BadRequest(_) => (kinds::VALIDATION_ERROR, error_codes::INVALID_REQUEST),
        AppError::Unauthorized => (kinds::AUTHENTICATION_ERROR, error_codes::TOKEN_INVALID),
        AppError::Forbidden => (
            kinds::AUTHORIZATION_ERROR,
            error_codes::NOT_CONVERSATION_MEMBER,
        ),
        AppError::NotFound(Resource::Conversation) => {
            (kinds::NOT_FOUND_ERROR, error_codes::CONVERSATION_NOT_FOUND)
        }
        AppError::NotFound(Resource::Message) => {
            (kinds::NOT_FOUND_ERROR, error_codes::MESSAGE_NOT_FOUND)
        }
        AppError::NotFound(Resource::User) => (kinds::NOT_FOUND_ERROR, error_codes::USER_NOT_FOUND),
        AppError::Config(_) | AppError::StartServer(_) => {
            (kinds::SERVER_ERROR, error_codes::CONFIG_ERROR)
        }
        AppError::Database(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
        AppError::Internal => (kinds::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR),
        AppError::ServiceUnavailable(_) => (
            kinds::SERVICE_UNAVAILABLE_ERROR,
            error_codes::SERVICE_UNAVAILABLE,
        ),
    };

    // Server-side failures are logged, not echoed.
    let message = if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
        err.client_message()
    } else {
        err.to_string()
    };

    let response = ErrorResponse::for_status(status.as_u16(), &message, error_type, code);

    (status, response)
}

pub fn into_response(err: AppError) -> HttpResponse {
    let (status, response) = map_error(&err);
    HttpResponse::build(status).json(response)
}
