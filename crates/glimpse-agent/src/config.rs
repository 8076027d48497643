//! Agent configuration.
//!
//! Defaults are usable as-is; a JSON config file (pointed at by
//! `GLIMPSE_CONFIG`) and a handful of environment variables can override
//! them. Everything is read once at startup.

use std::path::PathBuf;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONTROLLER_BASE_URL: &str =
    "https://clouddebugger.googleapis.com/v2/controller";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Cloud project this debuggee registers under. Falls back to the
    /// environment when unset.
    pub project_id: Option<String>,
    /// Root for the file scanner and for breakpoint path resolution.
    pub working_directory: PathBuf,
    /// Rebases server-supplied paths before scanner lookup when the deployed
    /// app lives in a subdirectory of its repository.
    pub app_path_relative_to_repository: Option<PathBuf>,
    /// Per-breakpoint TTL.
    pub breakpoint_expiration_sec: u64,
    /// Minimum gap between successive updates for the same breakpoint.
    pub breakpoint_update_interval_sec: u64,
    pub capture: CaptureConfig,
    pub log: LogConfig,
    pub log_level: String,
    pub enabled: bool,
    pub force_new_agent: bool,
    pub controller_base_url: String,
    pub service_context: ServiceContext,
    /// Bearer token for controller requests, when the host supplies one.
    pub token: Option<String>,
    /// File extensions eligible for direct (non-source-mapped) breakpoints.
    pub source_file_extensions: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            working_directory: PathBuf::from("."),
            app_path_relative_to_repository: None,
            breakpoint_expiration_sec: 24 * 60 * 60,
            breakpoint_update_interval_sec: 10,
            capture: CaptureConfig::default(),
            log: LogConfig::default(),
            log_level: "info".to_string(),
            enabled: true,
            force_new_agent: false,
            controller_base_url: DEFAULT_CONTROLLER_BASE_URL.to_string(),
            service_context: ServiceContext::default(),
            token: None,
            source_file_extensions: vec![".js".to_string()],
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    /// Total frames captured.
    pub max_frames: usize,
    /// Frames for which arguments and locals are materialized.
    pub max_expand_frames: usize,
    /// Own-property children emitted per compound value.
    pub max_properties: usize,
    /// Cumulative byte budget for captured values, shared between locals and
    /// watch expressions.
    pub max_data_size: usize,
    /// Strings longer than this are truncated.
    pub max_string_length: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_frames: 20,
            max_expand_frames: 5,
            max_properties: 10,
            max_data_size: 20_000,
            max_string_length: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// Logpoint emissions allowed per one-second window, per breakpoint.
    pub max_logs_per_second: u32,
    /// How long an over-budget logpoint stays disabled.
    pub log_delay_seconds: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_logs_per_second: 50,
            log_delay_seconds: 1,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceContext {
    pub service: Option<String>,
    pub version: Option<String>,
}

impl AgentConfig {
    /// Defaults, then the `GLIMPSE_CONFIG` file if set, then individual
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("GLIMPSE_CONFIG") {
            Some(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.project_id.is_none() {
            self.project_id = std::env::var("GLIMPSE_PROJECT_ID")
                .or_else(|_| std::env::var("GOOGLE_CLOUD_PROJECT"))
                .ok();
        }
        if let Ok(service) = std::env::var("GLIMPSE_SERVICE") {
            self.service_context.service = Some(service);
        }
        if let Ok(version) = std::env::var("GLIMPSE_SERVICE_VERSION") {
            self.service_context.version = Some(version);
        }
        if let Ok(level) = std::env::var("GLIMPSE_LOG_LEVEL") {
            self.log_level = level;
        }
        if std::env::var_os("GLIMPSE_DISABLE").is_some() {
            self.enabled = false;
        }
        if let Ok(path) = std::env::var("GLIMPSE_APP_PATH") {
            self.app_path_relative_to_repository = Some(PathBuf::from(path));
        }
    }

    /// Regex matching files eligible for direct breakpoints, built from
    /// `source_file_extensions`.
    pub fn source_file_regex(&self) -> Regex {
        let alternatives: Vec<String> = self
            .source_file_extensions
            .iter()
            .map(|ext| regex::escape(ext))
            .collect();
        Regex::new(&format!("(?:{})$", alternatives.join("|"))).expect("escaped extension regex")
    }

    pub fn has_source_extension(&self, path: &str) -> bool {
        self.source_file_extensions
            .iter()
            .any(|ext| path.ends_with(ext.as_str()))
    }
}
