//! Axum API server for video redaction.
//!
//! Exposes batch redaction of uploaded videos over HTTP and per-frame live
//! redaction over WebSocket, both backed by one shared frame processor.

pub mod config;
pub mod error;
pub mod handlers;
pub mod live;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
