//! # Agent Configuration
//!
//! `tinit` takes no command-line arguments: the image that builds a template
//! exports the three mandatory variables below before the agent is started.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Default log file name used when `TINIT_LOG_FILE` is not set.
pub const DEFAULT_LOG_FILE: &str = "tinit.log";

/// Validated agent configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Path to the Unix-domain socket the Runner listens on.
    pub runner_socket_path: PathBuf,

    /// Root directory that scopes every virtual path on the wire.
    pub root_dir: PathBuf,

    /// Shell command string that starts the template (e.g. `"npm run dev"`).
    pub start_cmd: String,

    /// Optional override for the structured log file path.
    pub log_file: Option<PathBuf>,
}

impl AgentConfig {
    /// Load configuration from the process environment.
    ///
    /// All three of `runner_socket_path`, `root_dir`, and `start_cmd` are
    /// mandatory; an empty or missing value is fatal.
    pub fn from_env() -> Result<Self, ConfigError> {
        let runner_socket_path = read_required("runner_socket_path")?;
        let root_dir = read_required("root_dir")?;
        let start_cmd = read_required("start_cmd")?;
        let log_file = std::env::var("TINIT_LOG_FILE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            runner_socket_path: PathBuf::from(runner_socket_path),
            root_dir: PathBuf::from(root_dir),
            start_cmd,
            log_file,
        })
    }
}

fn read_required(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(name)),
    }
}
