//! Shared credential handling for Pixora services.

pub mod jwt;

pub use jwt::{Claims, JwtError, JwtValidator};
