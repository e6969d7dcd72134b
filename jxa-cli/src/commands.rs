//! CLI subcommand handlers.

use crate::{Commands, ConfigAction};
use jxa_core::config::BridgeConfig;
use jxa_core::types::ToolOutput;
use jxa_core::{ExecutionOptions, ScriptExecutor, ScriptValidator};
use jxa_tools::{ToolContext, ToolRegistry, register_builtin_tools};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// What a command prints to stdout and whether it succeeded.
#[derive(Debug)]
pub struct Report {
    pub output: String,
    pub success: bool,
}

impl Report {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    fn json(value: &Value, success: bool) -> anyhow::Result<Self> {
        Ok(Self {
            output: serde_json::to_string_pretty(value)?,
            success,
        })
    }
}

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config: BridgeConfig,
) -> anyhow::Result<Report> {
    match command {
        Commands::Validate { file, quick } => handle_validate(&file, quick, &config).await,
        Commands::Run {
            file,
            timeout_ms,
            retries,
            debug,
            no_validate,
        } => {
            let mut config = config;
            if let Some(timeout_ms) = timeout_ms {
                config.execution.timeout_ms = timeout_ms;
            }
            if let Some(retries) = retries {
                config.execution.retries = retries;
            }
            config.execution.debug |= debug;
            if no_validate {
                config.validation.enabled = false;
            }
            handle_run(&file, &config).await
        }
        Commands::Tools => handle_tools(&config),
        Commands::Call { tool, args } => handle_call(&tool, args.as_deref(), &config).await,
        Commands::Config { action } => handle_config(action, workspace, &config),
    }
}

async fn read_script(file: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))
}

async fn handle_validate(
    file: &Path,
    quick: bool,
    config: &BridgeConfig,
) -> anyhow::Result<Report> {
    let script = read_script(file).await?;
    let validator = ScriptValidator::new(config.validation.result_channel);
    if quick {
        let result = validator.quick_validate(&script);
        Report::json(&serde_json::to_value(&result)?, result.valid)
    } else {
        let result = validator.validate(&script);
        Report::json(&serde_json::to_value(&result)?, result.valid)
    }
}

async fn handle_run(file: &Path, config: &BridgeConfig) -> anyhow::Result<Report> {
    let script = read_script(file).await?;
    let executor = ScriptExecutor::from_config(config);
    let options = ExecutionOptions::from(&config.execution);

    match executor.run_checked(&script, &options).await {
        Ok(value) => {
            let success = value.get("success").and_then(Value::as_bool) != Some(false);
            Report::json(&value, success)
        }
        Err(e) => {
            if let Some(stderr) = &e.stderr {
                debug!(stderr = %stderr, "Interpreter diagnostics");
            }
            Report::json(
                &json!({
                    "success": false,
                    "error": e.message,
                    "kind": e.kind,
                }),
                false,
            )
        }
    }
}

fn build_registry(config: &BridgeConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, Arc::new(ToolContext::from_config(config)));
    registry
}

fn handle_tools(config: &BridgeConfig) -> anyhow::Result<Report> {
    let registry = build_registry(config);
    Report::json(&serde_json::to_value(registry.list_definitions())?, true)
}

async fn handle_call(
    tool: &str,
    args: Option<&str>,
    config: &BridgeConfig,
) -> anyhow::Result<Report> {
    let args: Value = serde_json::from_str(args.unwrap_or("{}"))
        .map_err(|e| anyhow::anyhow!("Tool arguments must be a JSON object: {}", e))?;
    let registry = build_registry(config);

    let output = match registry.execute(tool, args).await {
        Ok(output) => output,
        Err(e) => ToolOutput::failure(e.to_string()),
    };
    let success = !output.is_error();
    match serde_json::from_str::<Value>(&output.content) {
        Ok(value) => Report::json(&value, success),
        Err(_) => Ok(Report {
            output: output.content,
            success,
        }),
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config: &BridgeConfig,
) -> anyhow::Result<Report> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".jxa-bridge");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                return Ok(Report::ok(format!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                )));
            }

            let toml_str = toml::to_string_pretty(&BridgeConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            Ok(Report::ok(format!(
                "Created default configuration at: {}",
                config_path.display()
            )))
        }
        ConfigAction::Show => Ok(Report::ok(toml::to_string_pretty(config)?)),
    }
}
