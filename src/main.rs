//! Claude OpenAI Proxy - OpenAI-compatible chat completions backed by the Claude Code CLI.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_openai_proxy::cli::ClaudeRunner;
use claude_openai_proxy::config::{ConfigError, ConfigLoader, ProxyConfig};
use claude_openai_proxy::display;
use claude_openai_proxy::runtime::{ConcurrencyGate, ShutdownCoordinator};
use claude_openai_proxy::server::{AppState, ProxyServer};

/// How long open connections get to close after the drain.
const CONNECTION_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "claude-openai-proxy",
    about = "OpenAI-compatible chat completions API backed by the Claude Code CLI",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (default: ./.claude-openai-proxy.toml, then the user config dir).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the claude executable.
    #[arg(long)]
    claude_path: Option<PathBuf>,

    /// Per-invocation timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Maximum number of concurrent claude processes.
    #[arg(long)]
    max_concurrent: Option<usize>,
}

impl Cli {
    /// File, then environment, then flags.
    fn load_config(&self) -> Result<ProxyConfig, ConfigError> {
        let loader = match &self.config {
            Some(path) => ConfigLoader::with_path(path.clone()),
            None => ConfigLoader::new(),
        };
        let mut config = loader.load_with_env()?;

        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(path) = &self.claude_path {
            config.tool.claude_path.clone_from(path);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.tool.timeout_ms = timeout_ms;
        }
        if let Some(limit) = self.max_concurrent {
            config.tool.max_concurrent = limit;
        }
        if self.verbose > 0 {
            config.verbose = true;
        }
        Ok(config)
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(cli.verbose);
            display::print_error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };
    init_tracing(cli.verbose.max(u8::from(config.verbose)));

    let gate = ConcurrencyGate::new(config.tool.max_concurrent, config.tool.retry_after());
    let shutdown = ShutdownCoordinator::new(gate.clone(), &config.shutdown);
    let runner =
        ClaudeRunner::new(&config.tool, gate).with_terminate_token(shutdown.terminate_token());

    tracing::info!(
        claude_path = %config.tool.claude_path.display(),
        default_model = %config.tool.default_model,
        timeout_ms = config.tool.timeout_ms,
        max_concurrent = config.tool.max_concurrent,
        "Starting Claude OpenAI proxy"
    );

    let banner_config = config.clone();
    let server = ProxyServer::new(AppState::new(config, runner));
    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            display::print_error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };
    display::print_banner(&banner_config);

    let mut serving = tokio::spawn(server.serve(listener, shutdown.accept_token()));

    let outcome = tokio::select! {
        outcome = shutdown.run_until_signal() => outcome,
        result = &mut serving => {
            match result {
                Ok(Ok(())) => tracing::error!("Server stopped unexpectedly"),
                Ok(Err(e)) => display::print_error(&e.to_string()),
                Err(e) => display::print_error(&format!("Server task failed: {e}")),
            }
            return ExitCode::FAILURE;
        }
    };
    display::print_shutdown(outcome);

    match tokio::time::timeout(CONNECTION_CLOSE_TIMEOUT, serving).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Server reported an error while closing"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Server task failed while closing"),
        Err(_) => tracing::warn!("Connections still open, exiting anyway"),
    }
    ExitCode::SUCCESS
}
