//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whether to enable permissive CORS.
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3456
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_permissive: true,
        }
    }
}

impl ServerConfig {
    /// Get the configured address as a string.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for invoking the external Claude CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Path to the `claude` executable.
    #[serde(default = "default_claude_path")]
    pub claude_path: PathBuf,
    /// Model used when a request does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Wall-clock limit per invocation, measured from spawn.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum number of child processes alive at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Retry delay suggested to callers refused by the concurrency gate.
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
    /// Extra arguments appended in streaming mode.
    #[serde(default = "default_stream_extra_args")]
    pub stream_extra_args: Vec<String>,
    /// Value forced into `CLAUDE_CODE_ENTRYPOINT` for child processes.
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
}

fn default_claude_path() -> PathBuf {
    PathBuf::from("claude")
}

fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_max_concurrent() -> usize {
    4
}

fn default_retry_after_secs() -> u64 {
    5
}

// stream-json in print mode only emits partial deltas with these flags.
fn default_stream_extra_args() -> Vec<String> {
    vec!["--verbose".to_string(), "--include-partial-messages".to_string()]
}

fn default_entrypoint() -> String {
    "claude-openai-proxy".to_string()
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            claude_path: default_claude_path(),
            default_model: default_model(),
            timeout_ms: default_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            retry_after_secs: default_retry_after_secs(),
            stream_extra_args: default_stream_extra_args(),
            entrypoint: default_entrypoint(),
        }
    }
}

impl ToolConfig {
    /// Invocation timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Suggested retry delay as a `Duration`.
    #[must_use]
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }
}

/// Graceful shutdown tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long in-flight invocations may keep running after a signal.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// How often the drain loop checks the active invocation count.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_grace_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ShutdownConfig {
    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top-level proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tool: ToolConfig,
    /// Request model alias to CLI model id.
    #[serde(default = "default_models")]
    pub models: BTreeMap<String, String>,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    /// Log every request and spawn at info level.
    #[serde(default)]
    pub verbose: bool,
}

fn default_models() -> BTreeMap<String, String> {
    [
        ("claude-opus-4", "claude-opus-4-6"),
        ("claude-opus-4-6", "claude-opus-4-6"),
        ("claude-sonnet-4", "claude-sonnet-4-6"),
        ("claude-sonnet-4-6", "claude-sonnet-4-6"),
        ("claude-haiku-4-5", "claude-haiku-4-5"),
    ]
    .into_iter()
    .map(|(alias, id)| (alias.to_string(), id.to_string()))
    .collect()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            tool: ToolConfig::default(),
            models: default_models(),
            shutdown: ShutdownConfig::default(),
            verbose: false,
        }
    }
}
