//! Colored terminal output for startup and shutdown.

use std::fmt::Write as _;
use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::config::ProxyConfig;
use crate::runtime::DrainOutcome;

/// Routes served by the proxy, as `(method, path, description)`.
pub const ENDPOINTS: &[(&str, &str, &str)] = &[
    ("POST", "/v1/chat/completions", "Chat completions (OpenAI compatible)"),
    ("GET", "/v1/models", "Model list"),
    ("GET", "/health", "Health check"),
    ("GET", "/sessions", "Active sessions"),
    ("DELETE", "/sessions/:id", "Forget a session"),
];

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Startup banner text.
#[must_use]
pub fn format_banner(config: &ProxyConfig) -> String {
    let url = format!("http://{}", config.server.address());
    let timeout = format!("{}s", config.tool.timeout().as_secs());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {}",
        env!("CARGO_PKG_NAME").bold(),
        concat!("v", env!("CARGO_PKG_VERSION")).dimmed()
    );
    let _ = writeln!(out, "  {:<12}{}", "Listening", url.cyan());
    let _ = writeln!(out, "  {:<12}{}", "Model", config.tool.default_model.green());
    let _ = writeln!(out, "  {:<12}{}", "Timeout", timeout);
    let _ = writeln!(
        out,
        "  {:<12}{}",
        "Concurrency",
        config.tool.max_concurrent
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "Endpoints:".bold());
    for (method, path, description) in ENDPOINTS {
        let _ = writeln!(
            out,
            "  {:<7} {:<22} {}",
            method.yellow(),
            path,
            description.dimmed()
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "  {:<12}{}/v1", "Base URL", url.cyan());
    out
}

/// Print the startup banner.
pub fn print_banner(config: &ProxyConfig) {
    println!("{}", format_banner(config));
    let _ = io::stdout().flush();
}

/// Print the result of a shutdown drain.
pub fn print_shutdown(outcome: DrainOutcome) {
    let ts = timestamp();
    match outcome {
        DrainOutcome::Drained => println!(
            "{} {} All requests finished, exiting",
            ts.dimmed(),
            "[SHUTDOWN]".blue().bold()
        ),
        DrainOutcome::Forced { outstanding } => println!(
            "{} {} Grace period elapsed with {} invocation(s) running, exiting",
            ts.dimmed(),
            "[SHUTDOWN]".yellow().bold(),
            outstanding
        ),
    }
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message.red());
}
