//! HTTP handlers for the proxy API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream;
use serde::Serialize;

use super::api::{
    format_seconds, DeleteSessionResponse, HealthConfig, HealthResponse, SessionsResponse,
};
use super::error::{process_error_body, ApiError};
use crate::cli::{ClaudeRunner, ProcessError, SessionHint, StreamEvent, StreamHandle};
use crate::config::ProxyConfig;
use crate::openai::{
    build_chat_response, model_list, new_request_id, request_to_invocation, resolve_model,
    ChatCompletionRequest, ChunkBuilder, ModelList,
};
use crate::session::{extract_external_id, SessionRegistry};

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub runner: ClaudeRunner,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    /// Create state with an empty session registry.
    #[must_use]
    pub fn new(config: ProxyConfig, runner: ClaudeRunner) -> Self {
        Self {
            config: Arc::new(config),
            runner,
            sessions: Arc::new(SessionRegistry::new()),
        }
    }
}

/// Conversation a request belongs to, if any.
struct Conversation {
    external_id: String,
    is_new: bool,
}

impl Conversation {
    /// Point the conversation at the session id the CLI reported.
    fn capture(&self, sessions: &SessionRegistry, token: &str) {
        sessions.rebind(&self.external_id, token);
    }

    /// Drop a freshly minted mapping whose CLI session was never created.
    fn abandon_if_unused(&self, sessions: &SessionRegistry, err: &ProcessError) {
        if self.is_new && matches!(err, ProcessError::ConcurrencyLimit(_) | ProcessError::Spawn(_)) {
            sessions.remove(&self.external_id);
        }
    }
}

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("messages array is required".to_string()));
    }

    let mut hint = SessionHint::Stateless;
    let conversation = extract_external_id(&headers, request.session_id.as_deref()).map(|id| {
        let resolved = state.sessions.resolve(&id);
        let is_new = resolved.is_new;
        hint = resolved.into();
        Conversation {
            external_id: id,
            is_new,
        }
    });

    let tool = &state.config.tool;
    let model = resolve_model(
        request.model.as_deref(),
        &tool.default_model,
        &state.config.models,
    );
    let invocation = request_to_invocation(&request, &model, hint, tool);

    tracing::debug!(
        model = %model,
        stream = request.is_stream(),
        messages = request.messages.len(),
        session = conversation.as_ref().map(|c| c.external_id.as_str()),
        "Chat completion request"
    );

    if request.is_stream() {
        let handle = match state.runner.stream(&invocation) {
            Ok(handle) => handle,
            Err(err) => {
                if let Some(conversation) = &conversation {
                    conversation.abandon_if_unused(&state.sessions, &err);
                }
                return Err(err.into());
            }
        };
        let frames = SseFrames {
            handle,
            chunks: ChunkBuilder::new(&new_request_id(), model),
            sessions: Arc::clone(&state.sessions),
            conversation,
            phase: Phase::Streaming,
        };
        return Ok(Sse::new(frames.into_stream())
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    match state.runner.run(&invocation).await {
        Ok(output) => {
            if let (Some(conversation), Some(token)) = (&conversation, &output.resume_token) {
                conversation.capture(&state.sessions, token);
            }
            Ok(Json(build_chat_response(output.text, &model)).into_response())
        }
        Err(err) => {
            if let Some(conversation) = &conversation {
                conversation.abandon_if_unused(&state.sessions, &err);
            }
            Err(err.into())
        }
    }
}

enum Phase {
    Streaming,
    /// The stop chunk went out; only `[DONE]` is left.
    Finishing,
    Done,
}

/// State of one SSE response body.
///
/// Dropping it (client disconnect) drops the [`StreamHandle`], which kills
/// the child.
struct SseFrames {
    handle: StreamHandle,
    chunks: ChunkBuilder,
    sessions: Arc<SessionRegistry>,
    conversation: Option<Conversation>,
    phase: Phase,
}

impl SseFrames {
    fn into_stream(self) -> impl futures_core::Stream<Item = Result<Event, Infallible>> {
        stream::unfold(self, |mut frames| async move {
            let event = frames.next_frame().await?;
            Some((Ok(event), frames))
        })
    }

    async fn next_frame(&mut self) -> Option<Event> {
        loop {
            match self.phase {
                Phase::Done => return None,
                Phase::Finishing => {
                    self.phase = Phase::Done;
                    return Some(Event::default().data("[DONE]"));
                }
                Phase::Streaming => {}
            }

            let Some(event) = self.handle.next_event().await else {
                self.phase = Phase::Done;
                return None;
            };

            match event {
                StreamEvent::TextDelta(text) => return Some(json_event(&self.chunks.delta(text))),
                StreamEvent::ResumeToken(token) => {
                    if let Some(conversation) = &self.conversation {
                        conversation.capture(&self.sessions, &token);
                    }
                }
                StreamEvent::Completed => {
                    self.phase = Phase::Finishing;
                    return Some(json_event(&self.chunks.finish()));
                }
                StreamEvent::Failed(err) => {
                    tracing::error!(error = %err, id = self.chunks.id(), "Streaming completion failed");
                    self.phase = Phase::Done;
                    return Some(json_event(&process_error_body(&err)));
                }
            }
        }
    }
}

fn json_event<T: Serialize>(value: &T) -> Event {
    let data = serde_json::to_string(value).unwrap_or_default();
    Event::default().data(data)
}

/// GET /v1/models
pub async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    Json(model_list(&state.config.models))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let gate = state.runner.gate();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        models: state.config.models.keys().cloned().collect(),
        sessions: state.sessions.count(),
        active_invocations: gate.active_count(),
        config: HealthConfig {
            default_model: state.config.tool.default_model.clone(),
            timeout: format_seconds(state.runner.timeout()),
            max_concurrent: gate.limit(),
        },
    })
}

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(SessionsResponse::new(state.sessions.list()))
}

/// DELETE /sessions/{id}
///
/// Only forgets the mapping; the CLI's own session files are untouched.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<DeleteSessionResponse> {
    let deleted = state.sessions.remove(&id);
    tracing::info!(id = %id, deleted, "Session deleted");
    Json(DeleteSessionResponse { deleted, id })
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}
