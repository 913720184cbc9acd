//! HTTP and WebSocket API surface

pub mod error;
pub mod handlers;
pub mod routes;
pub mod ws_dashboard;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
