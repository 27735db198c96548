//! Fake `claude` executables for exercising real child processes.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use claude_openai_proxy::cli::ClaudeRunner;
use claude_openai_proxy::config::ToolConfig;
use claude_openai_proxy::runtime::ConcurrencyGate;
use tempfile::TempDir;

/// A shell script standing in for the Claude CLI. Removed on drop.
pub struct FakeClaude {
    _dir: TempDir,
    path: PathBuf,
}

impl FakeClaude {
    /// Write `body` as a `/bin/sh` script.
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claude");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        Self { _dir: dir, path }
    }

    /// Script printing each line of `lines` to stdout.
    pub fn printing(lines: &[&str]) -> Self {
        let body: String = lines
            .iter()
            .map(|line| format!("printf '%s\\n' '{line}'\n"))
            .collect();
        Self::new(&body)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tool_config(&self, timeout: Duration) -> ToolConfig {
        ToolConfig {
            claude_path: self.path.clone(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap(),
            ..ToolConfig::default()
        }
    }

    pub fn runner(&self, limit: usize, timeout: Duration) -> ClaudeRunner {
        ClaudeRunner::new(
            &self.tool_config(timeout),
            ConcurrencyGate::new(limit, Duration::from_secs(2)),
        )
    }
}

/// Poll until the gate is empty; slots are released by a background task.
pub async fn wait_until_idle(gate: &ConcurrencyGate) {
    for _ in 0..200 {
        if gate.active_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("gate still holds {} slot(s)", gate.active_count());
}

pub const DELTA_HEL: &str = r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}},"session_id":"abc"}"#;
pub const DELTA_LO: &str = r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}},"session_id":"abc"}"#;
pub const MESSAGE_START: &str = r#"{"type":"stream_event","event":{"type":"message_start"},"session_id":"abc"}"#;
pub const RESULT_LINE: &str = r#"{"type":"result","subtype":"success","result":"Hello","session_id":"abc"}"#;
