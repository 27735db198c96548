//! Claude OpenAI Proxy - OpenAI-compatible chat completions backed by the Claude Code CLI.

pub mod cli;
pub mod config;
pub mod display;
pub mod openai;
pub mod runtime;
pub mod server;
pub mod session;
