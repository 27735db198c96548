//! Argument and environment construction for Claude CLI invocations.
//!
//! Both builders are pure: the same invocation and parent environment always
//! produce the same argument vector and child environment.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};

/// Output format requested from the CLI via `--output-format`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Plain text on stdout.
    Text,
    /// One JSON result object on stdout.
    #[default]
    Json,
    /// Newline-delimited JSON events on stdout.
    StreamJson,
}

impl OutputMode {
    /// The value passed after `--output-format`.
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::StreamJson => "stream-json",
        }
    }
}

/// How an invocation relates to CLI-side conversation state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionHint {
    /// No session semantics; the CLI starts an unlabelled conversation.
    #[default]
    Stateless,
    /// Continue the conversation with this CLI session id (`--resume`).
    Resume(String),
    /// Start a new conversation labelled with this id (`--session-id`).
    NewSession(String),
}

/// Environment variables removed from the inherited environment.
///
/// `ANTHROPIC_API_KEY` would make the CLI bill the API key instead of the
/// logged-in subscription. The rest are set by a parent Claude Code session
/// and make the child believe it is nested inside one.
pub const STRIPPED_ENV_VARS: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "CLAUDECODE",
    "CLAUDE_CODE_SSE_PORT",
    "CLAUDE_ARGS",
];

/// One immutable description of a CLI launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    prompt: String,
    model: String,
    output: OutputMode,
    session: SessionHint,
    extra_args: Vec<String>,
}

impl Invocation {
    /// Create a new invocation for the given prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set the output format.
    #[must_use]
    pub fn output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Attach session semantics.
    #[must_use]
    pub fn session(mut self, session: SessionHint) -> Self {
        self.session = session;
        self
    }

    /// Append raw arguments after the generated ones.
    #[must_use]
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn output_mode(&self) -> OutputMode {
        self.output
    }

    #[must_use]
    pub fn session_hint(&self) -> &SessionHint {
        &self.session
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.prompt.clone(),
            "--model".to_string(),
            self.model.clone(),
            "--output-format".to_string(),
            self.output.as_arg().to_string(),
        ];

        match &self.session {
            SessionHint::Stateless => {}
            SessionHint::Resume(id) => {
                args.push("--resume".to_string());
                args.push(id.clone());
            }
            SessionHint::NewSession(id) => {
                args.push("--session-id".to_string());
                args.push(id.clone());
            }
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Shell-escaped argument line for logs, with the prompt elided.
    #[must_use]
    pub fn display_args(&self) -> String {
        let mut args = self.build_args();
        args[1] = format!("<prompt:{} bytes>", self.prompt.len());
        args.iter()
            .map(|arg| shell_escape::escape(arg.as_str().into()).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build the child environment from the parent's.
///
/// Inherits `parent`, forces the non-interactive markers and the entrypoint
/// identity, then strips [`STRIPPED_ENV_VARS`].
pub fn build_env<I, K, V>(parent: I, entrypoint: &str) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let mut env: BTreeMap<OsString, OsString> = parent
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_os_string(), v.as_ref().to_os_string()))
        .collect();

    env.insert("CI".into(), "true".into());
    env.insert("CLAUDE_CODE_DISABLE_TERMINAL_TITLE".into(), "1".into());
    env.insert("CLAUDE_CODE_ENTRYPOINT".into(), entrypoint.into());

    for key in STRIPPED_ENV_VARS {
        env.remove(OsStr::new(key));
    }

    env
}
