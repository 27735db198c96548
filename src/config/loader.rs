//! Configuration file loader.

use std::path::PathBuf;
use std::str::FromStr;

use super::ProxyConfig;

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = ".claude-openai-proxy.toml";

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: .claude-openai-proxy.toml
        search_paths.push(PathBuf::from(LOCAL_CONFIG_FILE));

        // 2. User config directory: ~/.config/claude-openai-proxy/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("claude-openai-proxy").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(&self) -> Result<ProxyConfig, ConfigError> {
        for path in &self.search_paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config file");
                return Self::load_from_path(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(ProxyConfig::default())
    }

    /// Load configuration, then apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or an override is invalid.
    pub fn load_with_env(&self) -> Result<ProxyConfig, ConfigError> {
        let mut config = self.load()?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_from_path(path: &PathBuf) -> Result<ProxyConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find the first config file that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply the `PROXY_*` / `CLAUDE_*` environment overrides to `config`.
///
/// `lookup` resolves a variable name to its value; pass `std::env::var` in
/// production and a map in tests.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnv` when a numeric variable does not parse.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("PROXY_HOST") {
        config.server.host = host;
    }
    if let Some(port) = parse_var(&lookup, "PROXY_PORT")? {
        config.server.port = port;
    }
    if let Some(path) = lookup("CLAUDE_PATH") {
        config.tool.claude_path = PathBuf::from(path);
    }
    if let Some(model) = lookup("DEFAULT_MODEL") {
        config.tool.default_model = model;
    }
    if let Some(timeout) = parse_var(&lookup, "CLAUDE_TIMEOUT")? {
        config.tool.timeout_ms = timeout;
    }
    if let Some(limit) = parse_var(&lookup, "MAX_CONCURRENT")? {
        config.tool.max_concurrent = limit;
    }
    if lookup("VERBOSE").as_deref() == Some("true") {
        config.verbose = true;
    }
    Ok(())
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}
