//! End-to-end requests over TCP.

use std::time::Duration;

use claude_openai_proxy::cli::ClaudeRunner;
use claude_openai_proxy::config::ProxyConfig;
use claude_openai_proxy::runtime::ConcurrencyGate;
use claude_openai_proxy::server::{AppState, ProxyServer};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::support::{FakeClaude, DELTA_HEL, DELTA_LO, MESSAGE_START, RESULT_LINE};

struct TestServer {
    base: String,
    state: AppState,
    shutdown: CancellationToken,
    _fake: FakeClaude,
}

impl TestServer {
    async fn start(fake: FakeClaude) -> Self {
        let mut config = ProxyConfig::default();
        config.tool = fake.tool_config(Duration::from_secs(10));
        let gate = ConcurrencyGate::new(config.tool.max_concurrent, config.tool.retry_after());
        let runner = ClaudeRunner::new(&config.tool, gate);
        let server = ProxyServer::new(AppState::new(config, runner));
        let state = server.state().clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(server.serve(listener, shutdown.clone()));

        Self {
            base,
            state,
            shutdown,
            _fake: fake,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn chat(&self, body: Value, session: Option<&str>) -> reqwest::Response {
        let mut request = reqwest::Client::new()
            .post(self.url("/v1/chat/completions"))
            .json(&body);
        if let Some(session) = session {
            request = request.header("X-Session-Id", session);
        }
        request.send().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn user_message(text: &str) -> Value {
    json!({"model": "claude-sonnet-4", "messages": [{"role": "user", "content": text}]})
}

fn streaming(text: &str) -> Value {
    let mut body = user_message(text);
    body["stream"] = json!(true);
    body
}

/// `data:` payloads of an SSE body, in order.
fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|frame| {
            frame
                .lines()
                .find_map(|line| line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")))
                .map(|data| data.trim().to_string())
        })
        .collect()
}

#[tokio::test]
async fn unary_completion() {
    let server = TestServer::start(FakeClaude::printing(&[
        r#"{"type":"result","result":"ok","session_id":"s1"}"#,
    ]))
    .await;

    let response = server.chat(user_message("hi"), None).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "claude-sonnet-4-6");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "ok");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 0);
    // No conversation id, nothing remembered.
    assert_eq!(server.state.sessions.count(), 0);
}

#[tokio::test]
async fn stateless_requests_pass_no_session_flags() {
    let server = TestServer::start(FakeClaude::new(
        r#"case "$*" in *--session-id*|*--resume*) exit 9 ;; esac
printf '%s' '{"result":"stateless"}'"#,
    ))
    .await;

    let response = server.chat(user_message("hi"), None).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "stateless");
}

#[tokio::test]
async fn conversation_is_resumed_with_cli_reported_id() {
    let server = TestServer::start(FakeClaude::new(
        r#"case "$*" in
  *"--resume cli-1"*) printf '%s' '{"result":"resumed","session_id":"cli-1"}' ;;
  *--session-id*) printf '%s' '{"result":"fresh","session_id":"cli-1"}' ;;
  *) exit 9 ;;
esac"#,
    ))
    .await;

    let first: Value = server
        .chat(user_message("hi"), Some("conv-1"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["choices"][0]["message"]["content"], "fresh");

    let entry = server.state.sessions.get("conv-1").unwrap();
    assert_eq!(entry.resume_token, "cli-1");
    assert_eq!(entry.request_count, 1);

    // Body field works as well as the header.
    let mut body = user_message("again");
    body["session_id"] = json!("conv-1");
    let second: Value = server.chat(body, None).await.json().await.unwrap();
    assert_eq!(second["choices"][0]["message"]["content"], "resumed");
    assert_eq!(server.state.sessions.get("conv-1").unwrap().request_count, 2);

    let listing: Value = reqwest::get(server.url("/sessions"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["sessions"][0]["external_id"], "conv-1");
}

#[tokio::test]
async fn cli_failure_is_500_with_error_envelope() {
    let server = TestServer::start(FakeClaude::new("echo 'bad model' >&2\nexit 1")).await;

    let response = server.chat(user_message("hi"), None).await;
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "server_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("bad model"));
}

#[tokio::test]
async fn streaming_completion() {
    let server = TestServer::start(FakeClaude::printing(&[
        MESSAGE_START,
        DELTA_HEL,
        DELTA_LO,
        RESULT_LINE,
    ]))
    .await;

    let response = server.chat(streaming("hi"), Some("conv-s")).await;
    assert_eq!(response.status(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let payloads = sse_payloads(&response.text().await.unwrap());
    assert_eq!(payloads.len(), 4, "{payloads:?}");
    assert_eq!(payloads[3], "[DONE]");

    let chunks: Vec<Value> = payloads[..3]
        .iter()
        .map(|p| serde_json::from_str(p).unwrap())
        .collect();
    assert!(chunks.iter().all(|c| c["object"] == "chat.completion.chunk"));
    assert!(chunks.iter().all(|c| c["id"] == chunks[0]["id"]));
    let id = chunks[0]["id"].as_str().unwrap();
    assert_eq!(id.strip_prefix("chatcmpl-").unwrap().len(), 24);

    assert_eq!(chunks[0]["choices"][0]["delta"], json!({"role": "assistant", "content": "Hel"}));
    assert_eq!(chunks[1]["choices"][0]["delta"], json!({"content": "lo"}));
    assert!(chunks[1]["choices"][0]["finish_reason"].is_null());
    assert_eq!(chunks[2]["choices"][0]["delta"], json!({}));
    assert_eq!(chunks[2]["choices"][0]["finish_reason"], "stop");

    assert_eq!(
        server.state.sessions.get("conv-s").unwrap().resume_token,
        "abc"
    );
    assert_eq!(server.state.runner.gate().active_count(), 0);
}

#[tokio::test]
async fn streaming_failure_ends_with_one_error_frame() {
    let server = TestServer::start(FakeClaude::new(&format!(
        "printf '%s\\n' '{DELTA_HEL}'\necho 'overloaded' >&2\nexit 2"
    )))
    .await;

    let response = server.chat(streaming("hi"), None).await;
    let payloads = sse_payloads(&response.text().await.unwrap());

    assert_eq!(payloads.len(), 2, "{payloads:?}");
    let chunk: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(chunk["choices"][0]["delta"]["content"], "Hel");

    let error: Value = serde_json::from_str(&payloads[1]).unwrap();
    assert_eq!(error["error"]["type"], "server_error");
    assert!(error["error"]["message"]
        .as_str()
        .unwrap()
        .contains("overloaded"));
}

#[tokio::test]
async fn delete_session_forgets_mapping() {
    let server = TestServer::start(FakeClaude::printing(&[r#"{"result":"ok"}"#])).await;
    server.chat(user_message("hi"), Some("conv-d")).await;
    assert_eq!(server.state.sessions.count(), 1);

    let body: Value = reqwest::Client::new()
        .delete(server.url("/sessions/conv-d"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body, json!({"deleted": true, "id": "conv-d"}));
    assert_eq!(server.state.sessions.count(), 0);
}

#[tokio::test]
async fn cors_preflight_allows_session_header() {
    let server = TestServer::start(FakeClaude::printing(&["{}"])).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, server.url("/v1/chat/completions"))
        .header("Origin", "http://localhost:5173")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "x-session-id")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}
