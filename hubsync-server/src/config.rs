//! Configuration management for the hubsync server.
//!
//! Loads configuration from a TOML file with environment variable overrides.
//! Every field has a default so a partial file (or no file at all) works.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interval between SSE keep-alive comments
    #[serde(default = "default_keepalive_secs")]
    pub sse_keepalive_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// REST API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Total timeout per request (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,

    /// Connect timeout per request (seconds)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// JSON file with `{"identities": [...]}`; ignored when missing
    #[serde(default = "default_credentials_file")]
    pub credentials_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Branch used when a tool call does not name one
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Upper bound on files per upload/sync scan
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Files larger than this are reported as scan errors (GitHub rejects them)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Total bytes one upload/sync may push
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Parallel blob uploads per commit
    #[serde(default = "default_blob_concurrency")]
    pub blob_concurrency: usize,

    /// Keep byte-identical remote files instead of re-uploading them
    #[serde(default)]
    pub skip_unchanged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Operations older than this are evicted (seconds)
    #[serde(default = "default_tracker_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of tracked operations
    #[serde(default = "default_max_operations")]
    pub max_operations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Concurrent tool executions across all clients
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent: usize,

    /// Overall timeout for one tool call (seconds)
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional file that receives a copy of every log line
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_keepalive_secs() -> u64 {
    15
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("hubsync-server/{}", env!("CARGO_PKG_VERSION"))
}

fn default_credentials_file() -> Option<PathBuf> {
    Some(PathBuf::from("credentials.json"))
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_max_files() -> usize {
    5000
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024 // GitHub blob limit
}

fn default_max_upload_bytes() -> u64 {
    500 * 1024 * 1024
}

fn default_blob_concurrency() -> usize {
    8
}

fn default_tracker_ttl_secs() -> u64 {
    2 * 60 * 60
}

fn default_max_operations() -> usize {
    50
}

fn default_max_concurrent_tools() -> usize {
    20
}

fn default_tool_timeout_secs() -> u64 {
    120
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            sse_keepalive_secs: default_keepalive_secs(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials_file: default_credentials_file(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            max_files: default_max_files(),
            max_file_size: default_max_file_size(),
            max_upload_bytes: default_max_upload_bytes(),
            blob_concurrency: default_blob_concurrency(),
            skip_unchanged: false,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_tracker_ttl_secs(),
            max_operations: default_max_operations(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent_tools(),
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the optional file, then apply `.env` and process environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(api_base) = lookup("GITHUB_API_BASE") {
            self.github.api_base = api_base;
        }
        if let Some(file) = lookup("HUBSYNC_CREDENTIALS_FILE") {
            self.auth.credentials_file = Some(PathBuf::from(file));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8001);
        assert_eq!(config.tracker.ttl_secs, 7200);
        assert_eq!(config.tracker.max_operations, 50);
        assert_eq!(config.tools.max_concurrent, 20);
        assert_eq!(config.sync.default_branch, "main");
        assert!(!config.sync.skip_unchanged);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9100

            [sync]
            skip_unchanged = true
            blob_concurrency = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.sync.skip_unchanged);
        assert_eq!(config.sync.blob_concurrency, 2);
        assert_eq!(config.sync.max_files, 5000);
        assert_eq!(config.github.api_base, "https://api.github.com");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "PORT" => Some("9200".to_string()),
            "GITHUB_API_BASE" => Some("http://localhost:1234".to_string()),
            "LOG_LEVEL" => Some("debug".to_string()),
            _ => None,
        });

        assert_eq!(config.server.port, 9200);
        assert_eq!(config.github.api_base, "http://localhost:1234");
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let mut config = Config::default();
        config.apply_env(|key| (key == "PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.server.port, 8001);
    }
}
