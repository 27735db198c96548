//! Server and HTTP API error types.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::cli::ProcessError;
use crate::openai::ErrorBody;

/// Errors that stop the HTTP server itself.
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed.
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Failure of one API request, rendered as an OpenAI error envelope.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// Malformed body or missing fields.
    #[error("{0}")]
    BadRequest(String),

    /// No route for this path.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The CLI invocation failed or was refused.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Process(ProcessError::ConcurrencyLimit(_)) => StatusCode::TOO_MANY_REQUESTS,
            Self::Process(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Envelope sent to the client.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        match self {
            Self::BadRequest(_) => ErrorBody::new(self.to_string(), "invalid_request_error", None),
            Self::NotFound(_) => {
                ErrorBody::new(self.to_string(), "invalid_request_error", Some("not_found"))
            }
            Self::Process(err) => process_error_body(err),
        }
    }
}

/// Envelope for a CLI failure, also used for mid-stream error frames.
#[must_use]
pub fn process_error_body(err: &ProcessError) -> ErrorBody {
    let (kind, code) = match err {
        ProcessError::ConcurrencyLimit(_) => ("rate_limit_error", "concurrency_limit"),
        ProcessError::Timeout { .. } => ("server_error", "timeout"),
        ProcessError::Spawn(_) => ("server_error", "spawn_failed"),
        ProcessError::Execution { .. } | ProcessError::Io(_) | ProcessError::MissingPipe(_) => {
            ("server_error", "cli_error")
        }
    };
    ErrorBody::new(err.to_string(), kind, Some(code))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let mut response = (status, Json(self.body())).into_response();
        if let Self::Process(err) = &self {
            if let Some(retry_after) = err.retry_after() {
                // Whole seconds, never zero.
                let secs = retry_after.as_secs().max(1);
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs));
            }
        }
        response
    }
}
