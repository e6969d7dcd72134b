//! Tool dispatch: the `Tool` seam and a name-keyed registry.
//!
//! Every call is bounded by the tool's own time budget, on top of the
//! per-attempt timeout the executor already enforces.

use async_trait::async_trait;
use jxa_core::error::ToolError;
use jxa_core::types::{RiskLevel, ToolDefinition, ToolOutput};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A named operation against the configured application.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError>;

    fn risk_level(&self) -> RiskLevel;

    /// Upper bound for one call, retries included.
    fn timeout(&self) -> Duration;
}

/// Built-in tools keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; names must be unique.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered { name });
        }
        debug!(tool = %name, risk = %tool.risk_level(), "Registering tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Definitions for `tools` output, sorted by name.
    pub fn list_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Dispatch a call, failing with `Timeout` once the tool's budget runs out.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;

        let budget = tool.timeout();
        info!(tool = %name, budget_ms = budget.as_millis() as u64, "Calling tool");

        tokio::time::timeout(budget, tool.execute(args))
            .await
            .unwrap_or_else(|_| {
                Err(ToolError::Timeout {
                    name: name.to_string(),
                    timeout_secs: budget.as_secs(),
                })
            })
    }
}
