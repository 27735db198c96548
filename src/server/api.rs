//! Response types for the non-OpenAI endpoints.

use serde::{Deserialize, Serialize};

use crate::session::SessionInfo;

/// Response for GET /health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Accepted model names.
    pub models: Vec<String>,
    /// Number of known conversations.
    pub sessions: usize,
    /// CLI processes currently running.
    pub active_invocations: usize,
    pub config: HealthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub default_model: String,
    /// Invocation timeout, e.g. `"120s"`.
    pub timeout: String,
    pub max_concurrent: usize,
}

/// Response for GET /sessions.
#[derive(Debug, Clone, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
    pub total: usize,
}

impl SessionsResponse {
    #[must_use]
    pub fn new(sessions: Vec<SessionInfo>) -> Self {
        let total = sessions.len();
        Self { sessions, total }
    }
}

/// Response for DELETE /sessions/{id}.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSessionResponse {
    /// False when the id was unknown.
    pub deleted: bool,
    pub id: String,
}

/// Render a duration in seconds the way `/health` reports it.
#[must_use]
pub fn format_seconds(duration: std::time::Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}s", duration.as_secs_f64())
    }
}
