use crate::middleware::error_handling;
use actix_web::{HttpResponse, ResponseError};
use std::fmt;
use thiserror::Error;

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self.clone())
    }

    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Entity a `NotFound` refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Conversation,
    Message,
    User,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Conversation => "conversation",
            Resource::Message => "message",
            Resource::User => "user",
        })
    }
}

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal server error")]
    Internal,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        match e {
            deadpool_postgres::PoolError::Timeout(t) => {
                AppError::ServiceUnavailable(format!("database pool timeout: {t:?}"))
            }
            other => AppError::Database(other.to_string()),
        }
    }
}

// actix-web provides `impl<T: ResponseError> From<T> for actix_web::Error`,
// so handlers can return `AppResult` directly.

impl AppError {
    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden => 403,
            AppError::NotFound(_) => 404,
            AppError::ServiceUnavailable(_) => 503,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal => 500,
        }
    }

    /// Text that is safe to put in an in-band `error` event.
    ///
    /// Infrastructure details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Unauthorized => "Authentication required".to_string(),
            AppError::Forbidden => "You are not a participant in this conversation".to_string(),
            AppError::NotFound(Resource::Conversation) => "Conversation not found".to_string(),
            AppError::NotFound(Resource::Message) => "Message not found".to_string(),
            AppError::NotFound(Resource::User) => "User not found".to_string(),
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal
            | AppError::ServiceUnavailable(_) => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_http_semantics() {
        assert_eq!(AppError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(AppError::Unauthorized.status_code(), 401);
        assert_eq!(AppError::Forbidden.status_code(), 403);
        assert_eq!(AppError::NotFound(Resource::Message).status_code(), 404);
        assert_eq!(AppError::Database("boom".into()).status_code(), 500);
        assert_eq!(AppError::ServiceUnavailable("db".into()).status_code(), 503);
    }

    #[test]
    fn client_message_hides_infrastructure_details() {
        let err = AppError::Database("connection refused to 10.0.0.3".into());
        assert_eq!(err.client_message(), "Internal server error");

        let err = AppError::NotFound(Resource::Conversation);
        assert_eq!(err.client_message(), "Conversation not found");
        assert_eq!(err.to_string(), "conversation not found");
    }
}
