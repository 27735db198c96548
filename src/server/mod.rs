//! OpenAI-compatible HTTP server.

mod api;
mod app;
mod error;
mod handlers;

pub use api::{DeleteSessionResponse, HealthConfig, HealthResponse, SessionsResponse};
pub use app::ProxyServer;
pub use error::{process_error_body, ApiError, ServerError};
pub use handlers::AppState;
