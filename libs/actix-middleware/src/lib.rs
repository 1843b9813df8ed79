//! # Actix Middleware Library
//!
//! Shared middleware for the chat HTTP surface
//!
//! ## Modules
//! - `jwt_auth`: JWT bearer authentication, exposes the caller as [`UserId`]
//! - `logging`: request/response logging through `tracing`
//! - `correlation_id`: `x-correlation-id` propagation

pub mod correlation_id;
pub mod jwt_auth;
pub mod logging;

pub use correlation_id::{CorrelationId, CorrelationIdMiddleware};
pub use jwt_auth::{Claims, JwtAuthMiddleware, JwtValidator, UserId};
pub use logging::Logging;
