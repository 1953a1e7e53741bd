//! Real-time chat delivery core: connection registry and group router,
//! per-connection chat sessions, durable message store and the REST surface.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod websocket;
