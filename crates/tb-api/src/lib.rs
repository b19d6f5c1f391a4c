//! tb-api: HTTP API for the tutorbook booking engine
//!
//! REST endpoints over the booking engine: slot queries, idempotent
//! booking mutations, payment settlement callbacks and provider
//! schedule management. Built with axum for async HTTP handling.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::{ApiError, Result};
pub use server::{AppState, start_server};
