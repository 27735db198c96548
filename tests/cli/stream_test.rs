//! Streaming invocations.

use std::time::Duration;

use claude_openai_proxy::cli::{Invocation, KillReason, OutputMode, ProcessError, StreamEvent};
use tokio::time::timeout;

use crate::support::{wait_until_idle, FakeClaude, DELTA_HEL, DELTA_LO, MESSAGE_START, RESULT_LINE};

const TIMEOUT: Duration = Duration::from_secs(10);

fn invocation() -> Invocation {
    Invocation::new("hi", "m").output(OutputMode::StreamJson)
}

async fn next(handle: &mut claude_openai_proxy::cli::StreamHandle) -> Option<StreamEvent> {
    timeout(Duration::from_secs(5), handle.next_event())
        .await
        .expect("stream stalled")
}

#[tokio::test]
async fn deltas_arrive_in_order_then_complete() {
    let fake = FakeClaude::printing(&[
        MESSAGE_START,
        DELTA_HEL,
        "not json",
        "",
        DELTA_LO,
        RESULT_LINE,
    ]);
    let runner = fake.runner(2, TIMEOUT);
    let mut handle = runner.stream(&invocation()).unwrap();

    let mut texts = Vec::new();
    let mut tokens = Vec::new();
    let terminal = loop {
        match next(&mut handle).await.expect("missing terminal event") {
            StreamEvent::TextDelta(text) => texts.push(text),
            StreamEvent::ResumeToken(token) => tokens.push(token),
            terminal => break terminal,
        }
    };

    assert!(matches!(terminal, StreamEvent::Completed));
    assert_eq!(texts, ["Hel", "lo"]);
    // Repeated ids are reported once.
    assert_eq!(tokens, ["abc"]);
    assert!(next(&mut handle).await.is_none());
    assert!(handle.kill_reason().is_none());
    assert_eq!(runner.gate().active_count(), 0);
}

#[tokio::test]
async fn flat_and_fallback_shapes_are_decoded() {
    let fake = FakeClaude::printing(&[
        r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"a"}}"#,
        r#"{"type":"ping"}"#,
        r#"{"delta":{"type":"text_delta","text":"b"}}"#,
        r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{}"}}"#,
    ]);
    let runner = fake.runner(1, TIMEOUT);

    let output = runner.stream(&invocation()).unwrap().collect().await.unwrap();

    assert_eq!(output.deltas, ["a", "b"]);
    assert!(output.resume_token.is_none());
}

#[tokio::test]
async fn trailing_line_without_newline_is_decoded() {
    let fake = FakeClaude::new(&format!("printf '%s' '{DELTA_HEL}'"));
    let runner = fake.runner(1, TIMEOUT);

    let output = runner.stream(&invocation()).unwrap().collect().await.unwrap();

    assert_eq!(output.text(), "Hel");
    assert_eq!(output.resume_token.as_deref(), Some("abc"));
}

#[tokio::test]
async fn nonzero_exit_fails_the_stream() {
    let fake = FakeClaude::new(&format!(
        "printf '%s\\n' '{DELTA_HEL}'\necho 'rate limited' >&2\nexit 2"
    ));
    let runner = fake.runner(1, TIMEOUT);
    let mut handle = runner.stream(&invocation()).unwrap();

    let mut failures = 0;
    let mut texts = Vec::new();
    while let Some(event) = next(&mut handle).await {
        match event {
            StreamEvent::TextDelta(text) => texts.push(text),
            StreamEvent::Failed(ProcessError::Execution { code, stderr }) => {
                assert_eq!(code, Some(2));
                assert_eq!(stderr, "rate limited");
                failures += 1;
            }
            StreamEvent::ResumeToken(_) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    assert_eq!(texts, ["Hel"]);
    assert_eq!(failures, 1);
    assert_eq!(runner.gate().active_count(), 0);
}

#[tokio::test]
async fn kill_is_idempotent_and_completes() {
    let fake = FakeClaude::new(&format!("printf '%s\\n' '{DELTA_HEL}'\nexec sleep 10"));
    let runner = fake.runner(1, TIMEOUT);
    let mut handle = runner.stream(&invocation()).unwrap();

    // Wait for output so the child is known to be running.
    loop {
        if let StreamEvent::TextDelta(text) = next(&mut handle).await.unwrap() {
            assert_eq!(text, "Hel");
            break;
        }
    }

    handle.kill();
    handle.kill();

    let mut terminals = Vec::new();
    while let Some(event) = next(&mut handle).await {
        if event.is_terminal() {
            terminals.push(event);
        }
    }

    assert_eq!(terminals.len(), 1);
    assert!(matches!(terminals[0], StreamEvent::Completed));
    assert_eq!(handle.kill_reason(), Some(KillReason::ClientCancelled));
    assert_eq!(runner.gate().active_count(), 0);
}

#[tokio::test]
async fn kill_after_completion_is_a_noop() {
    let fake = FakeClaude::printing(&[DELTA_HEL]);
    let runner = fake.runner(1, TIMEOUT);
    let mut handle = runner.stream(&invocation()).unwrap();

    while let Some(event) = next(&mut handle).await {
        if event.is_terminal() {
            assert!(matches!(event, StreamEvent::Completed));
        }
    }
    handle.kill();

    assert!(handle.kill_reason().is_none());
}

#[tokio::test]
async fn timeout_fails_the_stream() {
    let fake = FakeClaude::new(&format!("printf '%s\\n' '{DELTA_HEL}'\nexec sleep 10"));
    let runner = fake.runner(1, Duration::from_millis(300));
    let handle = runner.stream(&invocation()).unwrap();

    let started = std::time::Instant::now();
    let err = handle.collect().await.unwrap_err();

    assert!(matches!(err, ProcessError::Timeout { .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(runner.gate().active_count(), 0);
}

#[tokio::test]
async fn stream_timeout_carries_stderr() {
    let fake = FakeClaude::new("echo 'still thinking' >&2\nexec sleep 10");
    let runner = fake.runner(1, Duration::from_millis(300));
    let handle = runner.stream(&invocation()).unwrap();

    let err = handle.collect().await.unwrap_err();

    assert!(
        matches!(err, ProcessError::Timeout { ref stderr, .. } if stderr == "still thinking"),
        "{err:?}"
    );
    assert!(err.to_string().contains("still thinking"));
}

#[tokio::test]
async fn dropping_the_handle_kills_the_child() {
    let fake = FakeClaude::new("exec sleep 10");
    let runner = fake.runner(1, TIMEOUT);

    let handle = runner.stream(&invocation()).unwrap();
    assert_eq!(runner.gate().active_count(), 1);
    drop(handle);

    wait_until_idle(runner.gate()).await;
    assert!(runner.stream(&invocation()).is_ok());
}

#[tokio::test]
async fn terminate_token_stops_streams_as_shutdown() {
    let fake = FakeClaude::new("exec sleep 10");
    let terminate = tokio_util::sync::CancellationToken::new();
    let runner = fake.runner(1, TIMEOUT).with_terminate_token(terminate.clone());
    let mut handle = runner.stream(&invocation()).unwrap();

    terminate.cancel();
    let mut terminal = None;
    while let Some(event) = next(&mut handle).await {
        if event.is_terminal() {
            terminal = Some(event);
        }
    }

    assert!(matches!(terminal, Some(StreamEvent::Completed)));
    assert_eq!(handle.kill_reason(), Some(KillReason::ShutdownDrain));
    assert_eq!(runner.gate().active_count(), 0);
}

#[tokio::test]
async fn stream_handle_is_a_stream() {
    use futures_util::StreamExt;

    let fake = FakeClaude::printing(&[DELTA_HEL, DELTA_LO]);
    let runner = fake.runner(1, TIMEOUT);
    let handle = runner.stream(&invocation()).unwrap();

    let events: Vec<StreamEvent> = StreamExt::collect(handle).await;
    let texts: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::TextDelta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();

    assert_eq!(texts, ["Hel", "lo"]);
    assert!(matches!(events.last(), Some(StreamEvent::Completed)));
}
