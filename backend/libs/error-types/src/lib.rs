//! Uniform error body shared by every Pixora HTTP surface.
//!
//! Services map their own error enums onto [`ErrorResponse`] so clients can
//! branch on `error_type` / `code` without parsing messages.

use serde::{Deserialize, Serialize};

/// JSON body returned for every failed HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short reason phrase ("Not Found", "Forbidden", ...)
    pub error: String,

    /// Human readable explanation
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Coarse category, one of [`error_types`]
    pub error_type: String,

    /// Stable machine code, one of [`error_codes`]
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Request id of the failing request, for log correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// RFC 3339 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            details: None,
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Build a response whose `error` field is the canonical reason phrase for `status`.
    pub fn for_status(status: u16, message: &str, error_type: &str, code: &str) -> Self {
        Self::new(reason_phrase(status), message, status, error_type, code)
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

/// Reason phrase for the status codes our services emit.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        503 => "Service Unavailable",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

/// Stable error codes
pub mod error_codes {
    // Authentication
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const TOKEN_MISSING: &str = "TOKEN_MISSING";
    pub const USER_NOT_FOUND: &str = "USER_NOT_FOUND";

    // Chat
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const NOT_CONVERSATION_MEMBER: &str = "NOT_CONVERSATION_MEMBER";
    pub const NOT_MESSAGE_SENDER: &str = "NOT_MESSAGE_SENDER";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

    // System
    pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

/// Error categories
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const SERVER_ERROR: &str = "server_error";
    pub const SERVICE_UNAVAILABLE_ERROR: &str = "service_unavailable_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_creation() {
        let error = ErrorResponse::for_status(
            404,
            "Message not found",
            error_types::NOT_FOUND_ERROR,
            error_codes::MESSAGE_NOT_FOUND,
        );

        assert_eq!(error.status, 404);
        assert_eq!(error.error, "Not Found");
        assert_eq!(error.error_type, error_types::NOT_FOUND_ERROR);
        assert_eq!(error.code, error_codes::MESSAGE_NOT_FOUND);
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let error = ErrorResponse::for_status(
            400,
            "content is required",
            error_types::VALIDATION_ERROR,
            error_codes::INVALID_REQUEST,
        );
        let json = serde_json::to_value(&error).unwrap();

        assert!(json.get("details").is_none());
        assert!(json.get("trace_id").is_none());

        let json = serde_json::to_value(error.with_trace_id("req-1".into())).unwrap();
        assert_eq!(json["trace_id"], "req-1");
    }
}
