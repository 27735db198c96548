//! Unary invocations.

use std::time::Duration;

use claude_openai_proxy::cli::{Invocation, OutputMode, ProcessError, SessionHint};

use crate::support::FakeClaude;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn json_result_yields_text_and_token() {
    let fake = FakeClaude::printing(&[r#"{"type":"result","result":"ok","session_id":"s1"}"#]);
    let runner = fake.runner(2, TIMEOUT);

    let output = runner.run(&Invocation::new("hi", "m")).await.unwrap();

    assert_eq!(output.text, "ok");
    assert_eq!(output.resume_token.as_deref(), Some("s1"));
    assert_eq!(runner.gate().active_count(), 0);
}

#[tokio::test]
async fn unparsable_stdout_falls_back_to_trimmed_text() {
    let fake = FakeClaude::new("echo '  ok  '");
    let runner = fake.runner(2, TIMEOUT);

    let output = runner.run(&Invocation::new("hi", "m")).await.unwrap();

    assert_eq!(output.text, "ok");
    assert!(output.resume_token.is_none());
}

#[tokio::test]
async fn nonzero_exit_is_execution_error() {
    let fake = FakeClaude::new("echo 'model not found' >&2\nexit 3");
    let runner = fake.runner(2, TIMEOUT);

    let err = runner.run(&Invocation::new("hi", "m")).await.unwrap_err();

    match err {
        ProcessError::Execution { code, stderr } => {
            assert_eq!(code, Some(3));
            assert_eq!(stderr, "model not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(runner.gate().active_count(), 0);
}

#[tokio::test]
async fn nonzero_exit_without_stderr_reports_unknown_error() {
    let fake = FakeClaude::new("exit 1");
    let runner = fake.runner(1, TIMEOUT);

    let err = runner.run(&Invocation::new("hi", "m")).await.unwrap_err();

    assert!(matches!(
        err,
        ProcessError::Execution { ref stderr, .. } if stderr == "unknown error"
    ));
}

#[tokio::test]
async fn slow_child_times_out_and_releases_slot() {
    let fake = FakeClaude::new("exec sleep 10");
    let runner = fake.runner(1, Duration::from_millis(200));

    let started = std::time::Instant::now();
    let err = runner.run(&Invocation::new("hi", "m")).await.unwrap_err();

    assert!(matches!(err, ProcessError::Timeout { .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(runner.gate().active_count(), 0);
}

#[tokio::test]
async fn timeout_keeps_stderr_written_before_the_kill() {
    let fake = FakeClaude::new("echo 'upstream overloaded' >&2\nexec sleep 10");
    let runner = fake.runner(1, Duration::from_millis(300));

    let err = runner.run(&Invocation::new("hi", "m")).await.unwrap_err();

    assert!(
        matches!(err, ProcessError::Timeout { ref stderr, .. } if stderr == "upstream overloaded"),
        "{err:?}"
    );
    assert!(err.to_string().ends_with(": upstream overloaded"), "{err}");
    assert_eq!(runner.gate().active_count(), 0);
}

#[tokio::test]
async fn arguments_and_environment_reach_the_child() {
    let fake = FakeClaude::new(
        r#"printf '%s\n' "$@"
printf 'CI=%s\n' "$CI"
printf 'ENTRY=%s\n' "$CLAUDE_CODE_ENTRYPOINT"
printf 'TITLE=%s\n' "$CLAUDE_CODE_DISABLE_TERMINAL_TITLE"
printf 'NESTED=%s\n' "${CLAUDECODE:-unset}""#,
    );
    let runner = fake.runner(1, TIMEOUT);
    let invocation = Invocation::new("two words", "claude-haiku-4-5")
        .output(OutputMode::Text)
        .session(SessionHint::NewSession("tok-1".into()));

    let output = runner.run(&invocation).await.unwrap();
    let lines: Vec<&str> = output.text.lines().collect();

    assert_eq!(
        &lines[..8],
        [
            "-p",
            "two words",
            "--model",
            "claude-haiku-4-5",
            "--output-format",
            "text",
            "--session-id",
            "tok-1"
        ]
    );
    assert!(lines.contains(&"CI=true"));
    assert!(lines.contains(&"ENTRY=claude-openai-proxy"));
    assert!(lines.contains(&"TITLE=1"));
    assert!(lines.contains(&"NESTED=unset"));
}

#[tokio::test]
async fn saturated_gate_refuses_without_spawning() {
    let fake = FakeClaude::new("exec sleep 10");
    let runner = fake.runner(1, TIMEOUT);

    let first = runner.stream(&Invocation::new("a", "m")).unwrap();
    let err = runner.run(&Invocation::new("b", "m")).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    assert_eq!(runner.gate().active_count(), 1);

    first.kill();
    first.collect().await.unwrap();
    assert_eq!(runner.gate().active_count(), 0);
    assert!(fake.path().exists());
}
