//! # Actix Middleware Library
//!
//! Middleware shared by the Pixora actix services
//!
//! ## Modules
//! - `jwt_auth`: bearer token authentication, exposes [`UserId`] to handlers
//! - `request_id`: `x-request-id` propagation
//! - `logging`: request/response logging through `tracing`

pub mod jwt_auth;
pub mod logging;
pub mod request_id;

pub use jwt_auth::{JwtAuthMiddleware, UserId};
pub use logging::Logging;
pub use request_id::{RequestId, RequestIdValue, REQUEST_ID_HEADER};
