// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for Agent Switchboard.
//!
//! This crate provides [`HubConfig`], the top-level runtime settings,
//! together with helpers for loading from TOML files, applying environment
//! and command-line overrides, and producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// The per-request timeout is unusually large.
    LargeTimeout {
        /// Timeout value in seconds.
        secs: u64,
    },
    /// The worker pool is larger than the hub can keep busy.
    ManyWorkers {
        /// Configured worker count.
        workers: usize,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeTimeout { secs } => {
                write!(f, "request_timeout is very large ({secs}s)")
            }
            ConfigWarning::ManyWorkers { workers } => {
                write!(f, "dispatcher.workers = {workers} is unusually high")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for the hub.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct HubConfig {
    /// Root of the hub working tree (inboxes, archive, registry).
    #[serde(default = "default_hub_dir")]
    pub hub_dir: PathBuf,

    /// Port the external façade listens on, when one is attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Agent command invoked for local executions.
    #[serde(default = "default_agent_cmd")]
    pub agent_cmd: String,

    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Dispatcher and scheduler settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub_dir: default_hub_dir(),
            port: None,
            agent_cmd: default_agent_cmd(),
            log_level: Some("info".into()),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

/// The `[dispatcher]` section.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DispatcherConfig {
    /// Maximum number of concurrently executing requests.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds between scheduler ticks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Requests processed before a dispatch-session rollover.
    #[serde(default = "default_session_max_requests")]
    pub session_max_requests: u32,

    /// Hours before a dispatch-session rollover.
    #[serde(default = "default_session_max_age_hours")]
    pub session_max_age_hours: u64,

    /// Hard per-request timeout in seconds (local executions) and the
    /// idle timeout between remote stream events.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Execution attempts per request before escalation.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Preferred model passed to the agent command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Budget cap passed to the agent command, in US dollars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,

    /// Verbose dispatcher logging.
    #[serde(default)]
    pub debug: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval: default_poll_interval(),
            session_max_requests: default_session_max_requests(),
            session_max_age_hours: default_session_max_age_hours(),
            request_timeout: default_request_timeout(),
            max_attempts: default_max_attempts(),
            model: None,
            max_budget_usd: None,
            debug: false,
        }
    }
}

fn default_hub_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_agent_cmd() -> String {
    "claude".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_poll_interval() -> u64 {
    60
}

fn default_session_max_requests() -> u32 {
    50
}

fn default_session_max_age_hours() -> u64 {
    24
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Threshold above which a request timeout generates a warning.
const LARGE_TIMEOUT_THRESHOLD: u64 = 3_600;

/// Threshold above which a worker count generates a warning.
const MANY_WORKERS_THRESHOLD: usize = 32;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`HubConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`HubConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<HubConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => HubConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`HubConfig`].
pub fn parse_toml(content: &str) -> Result<HubConfig, ConfigError> {
    toml::from_str::<HubConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `ASB_HUB_DIR`
/// - `ASB_LOG_LEVEL`
/// - `ASB_AGENT_CMD`
pub fn apply_env_overrides(config: &mut HubConfig) {
    if let Ok(val) = std::env::var("ASB_HUB_DIR") {
        config.hub_dir = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("ASB_LOG_LEVEL") {
        config.log_level = Some(val);
    }
    if let Ok(val) = std::env::var("ASB_AGENT_CMD") {
        config.agent_cmd = val;
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (zero workers, zero timeout, unknown log level) come back
/// as a [`ConfigError::ValidationError`]; soft issues come back as
/// warnings.
pub fn validate_config(config: &HubConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }

    if config.agent_cmd.trim().is_empty() {
        errors.push("agent_cmd must not be empty".into());
    }

    let d = &config.dispatcher;
    if d.workers == 0 {
        errors.push("dispatcher.workers must be at least 1".into());
    }
    if d.poll_interval == 0 {
        errors.push("dispatcher.poll_interval must be at least 1 second".into());
    }
    if d.request_timeout == 0 {
        errors.push("dispatcher.request_timeout must be at least 1 second".into());
    }
    if d.max_attempts == 0 {
        errors.push("dispatcher.max_attempts must be at least 1".into());
    }
    if let Some(budget) = d.max_budget_usd
        && budget <= 0.0
    {
        errors.push("dispatcher.max_budget_usd must be positive".into());
    }

    if d.request_timeout > LARGE_TIMEOUT_THRESHOLD {
        warnings.push(ConfigWarning::LargeTimeout {
            secs: d.request_timeout,
        });
    }
    if d.workers > MANY_WORKERS_THRESHOLD {
        warnings.push(ConfigWarning::ManyWorkers { workers: d.workers });
    }
    if d.model.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "dispatcher.model".into(),
            hint: "local executions will use the agent's default model".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}
