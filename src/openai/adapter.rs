//! Translation between OpenAI requests/responses and Claude CLI invocations.

use std::collections::BTreeMap;

use chrono::Utc;

use super::{
    AssistantMessage, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    ChatMessage, Choice, ChunkChoice, ChunkDelta, ModelList, ModelObject, Role, Usage,
};
use crate::cli::{Invocation, OutputMode, SessionHint};
use crate::config::ToolConfig;

const MODEL_PREFIX: &str = "openai/";
const FINISH_STOP: &str = "stop";
const ASSISTANT: &str = "assistant";

/// Flatten a message list into one prompt for `claude -p`.
///
/// System (and developer) messages are wrapped in `<system>`, earlier
/// assistant turns in `<previous_response>`, user text is kept verbatim.
/// Other roles are dropped.
#[must_use]
pub fn messages_to_prompt(messages: &[ChatMessage]) -> String {
    let blocks: Vec<String> = messages
        .iter()
        .filter_map(|msg| {
            let content = msg.text();
            match msg.role {
                Role::System | Role::Developer => Some(format!("<system>\n{content}\n</system>")),
                Role::Assistant => Some(format!(
                    "<previous_response>\n{content}\n</previous_response>"
                )),
                Role::User => Some(content),
                Role::Other => None,
            }
        })
        .collect();

    blocks.join("\n\n").trim().to_string()
}

/// Map a requested model name onto a CLI model id.
///
/// A missing name selects `default_model`; a leading `openai/` is stripped
/// and aliases are looked up, unknown names pass through unchanged.
#[must_use]
pub fn resolve_model(
    requested: Option<&str>,
    default_model: &str,
    aliases: &BTreeMap<String, String>,
) -> String {
    let Some(requested) = requested.filter(|model| !model.is_empty()) else {
        return default_model.to_string();
    };
    let cleaned = requested.strip_prefix(MODEL_PREFIX).unwrap_or(requested);
    aliases
        .get(cleaned)
        .cloned()
        .unwrap_or_else(|| cleaned.to_string())
}

/// Build the CLI invocation for `request`.
#[must_use]
pub fn request_to_invocation(
    request: &ChatCompletionRequest,
    model: &str,
    session: SessionHint,
    tool: &ToolConfig,
) -> Invocation {
    let invocation = Invocation::new(messages_to_prompt(&request.messages), model).session(session);
    if request.is_stream() {
        invocation
            .output(OutputMode::StreamJson)
            .extra_args(tool.stream_extra_args.iter().cloned())
    } else {
        invocation.output(OutputMode::Json)
    }
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Id shared by every chunk of one streaming response: 24 hex characters.
#[must_use]
pub fn new_request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(24);
    id
}

/// Wrap generated text in a `chat.completion` object.
#[must_use]
pub fn build_chat_response(content: impl Into<String>, model: &str) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created: unix_now(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage {
                role: ASSISTANT.to_string(),
                content: content.into(),
            },
            finish_reason: Some(FINISH_STOP.to_string()),
        }],
        usage: Usage::default(),
    }
}

/// Produces the `chat.completion.chunk` sequence of one streaming response.
#[derive(Debug, Clone)]
pub struct ChunkBuilder {
    id: String,
    model: String,
    first: bool,
}

impl ChunkBuilder {
    #[must_use]
    pub fn new(request_id: &str, model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{request_id}"),
            model: model.into(),
            first: true,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Chunk carrying `text`. The first one also carries the assistant role.
    pub fn delta(&mut self, text: impl Into<String>) -> ChatCompletionChunk {
        let role = std::mem::take(&mut self.first).then(|| ASSISTANT.to_string());
        self.chunk(
            ChunkDelta {
                role,
                content: Some(text.into()),
            },
            None,
        )
    }

    /// Terminal chunk: empty delta, `finish_reason = "stop"`.
    #[must_use]
    pub fn finish(&self) -> ChatCompletionChunk {
        self.chunk(ChunkDelta::default(), Some(FINISH_STOP.to_string()))
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: unix_now(),
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }
}

/// Model listing built from the alias table.
#[must_use]
pub fn model_list(aliases: &BTreeMap<String, String>) -> ModelList {
    let created = unix_now();
    ModelList {
        object: "list".to_string(),
        data: aliases
            .keys()
            .map(|id| ModelObject {
                id: id.clone(),
                object: "model".to_string(),
                created,
                owned_by: "anthropic".to_string(),
            })
            .collect(),
    }
}
