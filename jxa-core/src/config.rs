//! Configuration system for jxa-bridge.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/jxa-bridge/config.toml` and/or
//! `.jxa-bridge/config.toml` in the workspace directory.

use crate::error::ConfigError;
use crate::validator::ResultChannel;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub application: ApplicationConfig,
    pub execution: ExecutionConfig,
    pub validation: ValidationConfig,
}

/// The automated application and the interpreter used to reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Name passed to `Application(...)` in the script preamble.
    pub name: String,
    /// Interpreter executable.
    pub interpreter: String,
    /// Arguments placed before the script path.
    pub interpreter_args: Vec<String>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "DEVONthink".to_string(),
            interpreter: "osascript".to_string(),
            interpreter_args: vec!["-l".to_string(), "JavaScript".to_string()],
        }
    }
}

/// Timeouts, retries, and temp-file handling for script execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub timeout_ms: u64,
    /// Retries after the first attempt, for transient failures only.
    pub retries: u32,
    pub retry_delay_ms: u64,
    /// Treat timeouts as transient.
    pub retry_on_timeout: bool,
    /// Keep temporary script files and log their paths.
    pub debug: bool,
    /// Directory for temporary script files (platform temp dir when unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 2,
            retry_delay_ms: 1_000,
            retry_on_timeout: false,
            debug: false,
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    #[default]
    Full,
    Quick,
}

impl std::fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationMode::Full => write!(f, "full"),
            ValidationMode::Quick => write!(f, "quick"),
        }
    }
}

/// Pre-flight validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub enabled: bool,
    pub mode: ValidationMode,
    pub result_channel: ResultChannel,
    /// Refuse to execute scripts with warnings as well as errors.
    pub fail_on_warnings: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ValidationMode::Full,
            result_channel: ResultChannel::Stdout,
            fail_on_warnings: false,
        }
    }
}

impl BridgeConfig {
    /// Report problems with the configuration without rejecting it.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.application.name.trim().is_empty() {
            problems.push("application.name must not be empty".to_string());
        }
        if self.application.interpreter.trim().is_empty() {
            problems.push("application.interpreter must not be empty".to_string());
        }
        if self.execution.timeout_ms == 0 {
            problems.push("execution.timeout_ms must be greater than 0".to_string());
        }
        if self.execution.retries > 10 {
            problems.push(format!(
                "execution.retries ({}) is unusually high; transient failures rarely clear after 10 attempts",
                self.execution.retries
            ));
        }
        if let Some(dir) = &self.execution.temp_dir {
            if !dir.is_dir() {
                problems.push(format!(
                    "execution.temp_dir '{}' is not a directory",
                    dir.display()
                ));
            }
        }
        problems
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "jxa-bridge", "jxa-bridge")
}

/// Load configuration from all sources, merging in priority order.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `JXA_BRIDGE_`)
/// 3. Workspace-local config (`.jxa-bridge/config.toml`)
/// 4. User config (`~/.config/jxa-bridge/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&BridgeConfig>,
) -> Result<BridgeConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(BridgeConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".jxa-bridge").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // JXA_BRIDGE_EXECUTION__TIMEOUT_MS, JXA_BRIDGE_APPLICATION__NAME, etc.
    figment = figment.merge(Env::prefixed("JXA_BRIDGE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment
        .extract()
        .map_err(|e| ConfigError::Load(Box::new(e)))
}

/// Check whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs() {
        if dirs.config_dir().join("config.toml").exists() {
            return true;
        }
    }
    workspace.is_some_and(|ws| ws.join(".jxa-bridge").join("config.toml").exists())
}
