//! Shared plumbing for tools that script the configured application.
//!
//! Every tool builds its program with [`ScriptBuilder`], runs it through the
//! executor's checked path, and maps the outcome onto a [`ToolOutput`].
//! Script and execution failures never escape as errors: they become the
//! `{ "success": false, "error": ... }` payload with home paths stripped.

use async_trait::async_trait;
use jxa_core::config::BridgeConfig;
use jxa_core::error::{BuildError, ToolError};
use jxa_core::types::{RiskLevel, ToolOutput};
use jxa_core::{ExecutionOptions, ScriptBuilder, ScriptExecutor};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::registry::Tool;

/// Strip home-directory prefixes from a message before it leaves the process.
pub(crate) fn sanitize_error_message(msg: &str) -> String {
    let mut result = msg.to_string();
    for root in ["/Users/", "/home/"] {
        while let Some(start) = result.find(root) {
            let after_root = start + root.len();
            match result[after_root..].find('/') {
                Some(slash_pos) => {
                    let end = after_root + slash_pos + 1;
                    result.replace_range(start..end, "~/");
                }
                None => break,
            }
        }
    }
    result
}

/// Helper to extract a required, non-empty string argument.
pub(crate) fn require_str<'a>(
    args: &'a Value,
    field: &str,
    tool_name: &str,
) -> Result<&'a str, ToolError> {
    match args[field].as_str() {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(ToolError::InvalidArguments {
            name: tool_name.to_string(),
            reason: format!("'{field}' must not be empty"),
        }),
        None => Err(ToolError::InvalidArguments {
            name: tool_name.to_string(),
            reason: format!("missing required '{field}' parameter"),
        }),
    }
}

/// Builder errors come from argument content, so they are reported as such.
pub(crate) fn invalid_input(tool_name: &str, err: BuildError) -> ToolError {
    ToolError::InvalidArguments {
        name: tool_name.to_string(),
        reason: err.to_string(),
    }
}

/// The executor, target application, and options shared by all tools.
pub struct ToolContext {
    executor: Arc<ScriptExecutor>,
    application: String,
    options: ExecutionOptions,
}

impl ToolContext {
    pub fn new(
        executor: Arc<ScriptExecutor>,
        application: impl Into<String>,
        options: ExecutionOptions,
    ) -> Self {
        Self {
            executor,
            application: application.into(),
            options,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            Arc::new(ScriptExecutor::from_config(config)),
            config.application.name.clone(),
            ExecutionOptions::from(&config.execution),
        )
    }

    /// A builder targeting the configured application.
    pub fn builder(&self) -> ScriptBuilder {
        ScriptBuilder::new(self.application.as_str())
    }

    /// Worst-case time for one tool call: every attempt times out and every
    /// retry waits its delay, plus a second of slack.
    pub fn time_budget(&self) -> Duration {
        let attempts = self.options.retries + 1;
        self.options.timeout * attempts
            + self.options.retry_delay * self.options.retries
            + Duration::from_secs(1)
    }

    /// Build, check, and execute a script, mapping every outcome to output.
    pub async fn run(&self, tool_name: &str, builder: &ScriptBuilder) -> ToolOutput {
        let script = builder.build();
        debug!(tool = %tool_name, bytes = script.len(), "Running tool script");

        match self.executor.run_checked(&script, &self.options).await {
            Ok(value) => {
                if value.get("success").and_then(Value::as_bool) == Some(false) {
                    let message = value
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("Script reported failure without a message");
                    ToolOutput::failure(sanitize_error_message(message))
                } else {
                    ToolOutput::json(&value)
                }
            }
            Err(e) => {
                warn!(tool = %tool_name, kind = %e.kind, error = %e.message, "Tool script failed");
                ToolOutput::failure(sanitize_error_message(&e.message))
                    .with_metadata("kind", json!(e.kind))
            }
        }
    }
}

/// Reports whether the configured application is running.
pub struct IsRunningTool {
    context: Arc<ToolContext>,
}

impl IsRunningTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for IsRunningTool {
    fn name(&self) -> &str {
        "is_running"
    }

    fn description(&self) -> &str {
        "Check whether the automated application is running."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Value) -> Result<ToolOutput, ToolError> {
        let mut builder = self.context.builder();
        builder
            .add_try_catch(
                &ScriptBuilder::success_block(&[("running", "theApp.running()")]),
                None,
            )
            .map_err(|e| invalid_input(self.name(), e))?;
        Ok(self.context.run(self.name(), &builder).await)
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::ReadOnly
    }

    fn timeout(&self) -> Duration {
        self.context.time_budget()
    }
}
