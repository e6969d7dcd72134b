//! Record tools: lookup by UUID, full-text search, and tagging.

use async_trait::async_trait;
use jxa_core::error::ToolError;
use jxa_core::types::{RiskLevel, ToolOutput};
use jxa_core::{ScriptBuilder, ValueKind};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::app::{ToolContext, invalid_input, require_str};
use crate::registry::Tool;

const DEFAULT_SEARCH_LIMIT: u64 = 20;
const MAX_SEARCH_LIMIT: u64 = 200;

/// Serializes the core properties of a record.
const RECORD_PROPS_FN: &str = r#"function recordProps(record) {
  var props = {};
  props["uuid"] = record.uuid();
  props["name"] = record.name();
  props["type"] = String(record.recordType());
  props["location"] = record.location();
  props["tags"] = record.tags();
  props["path"] = record.path();
  return props;
}"#;

/// Looks up `uuid` into `record`, returning a failure payload when absent.
///
/// The message must not look like an application-lookup failure, or the
/// executor would treat it as transient and retry.
fn lookup_record_code() -> String {
    format!(
        "var record = theApp.getRecordWithUuid(uuid);\nif (!record) {{\n{}\n}}",
        indent(&ScriptBuilder::failure_block("\"No record with UUID \" + uuid"))
    )
}

fn indent(code: &str) -> String {
    code.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Returns a record's core properties by UUID.
pub struct GetRecordTool {
    context: Arc<ToolContext>,
}

impl GetRecordTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for GetRecordTool {
    fn name(&self) -> &str {
        "get_record"
    }

    fn description(&self) -> &str {
        "Look up a record by UUID and return its name, type, location, tags, and path."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "uuid": {
                    "type": "string",
                    "description": "UUID of the record"
                }
            },
            "required": ["uuid"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let uuid = require_str(&args, "uuid", self.name())?;
        debug!(uuid = %uuid, "Looking up record");

        let mut builder = self.context.builder();
        builder
            .add_variable("uuid", uuid)
            .map_err(|e| invalid_input(self.name(), e))?
            .add_function("recordProps", RECORD_PROPS_FN)
            .add_try_catch(
                &format!(
                    "{}\n{}",
                    lookup_record_code(),
                    ScriptBuilder::success_block(&[("record", "recordProps(record)")])
                ),
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

/// Full-text search across the application's databases.
pub struct SearchRecordsTool {
    context: Arc<ToolContext>,
}

impl SearchRecordsTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for SearchRecordsTool {
    fn name(&self) -> &str {
        "search_records"
    }

    fn description(&self) -> &str {
        "Search records by text. Returns up to 'limit' matches with their core properties."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results (default: 20, max: 200)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let query = require_str(&args, "query", self.name())?;
        let limit = match &args["limit"] {
            Value::Null => DEFAULT_SEARCH_LIMIT,
            value => value
                .as_u64()
                .filter(|n| (1..=MAX_SEARCH_LIMIT).contains(n))
                .ok_or_else(|| ToolError::InvalidArguments {
                    name: self.name().to_string(),
                    reason: format!("'limit' must be an integer between 1 and {MAX_SEARCH_LIMIT}"),
                })?,
        };
        debug!(query = %query, limit, "Searching records");

        let search_code = [
            "var found = theApp.search(query);",
            "var records = [];",
            "for (var i = 0; i < found.length && i < limit; i++) {",
            "  records.push(recordProps(found[i]));",
            "}",
        ]
        .join("\n");

        let mut builder = self.context.builder();
        builder
            .add_variable("query", query)
            .map_err(|e| invalid_input(self.name(), e))?
            .add_variable_as("limit", limit, ValueKind::Number)
            .map_err(|e| invalid_input(self.name(), e))?
            .add_function("recordProps", RECORD_PROPS_FN)
            .add_try_catch(
                &format!(
                    "{search_code}\n{}",
                    ScriptBuilder::success_block(&[
                        ("total", "found.length"),
                        ("records", "records"),
                    ])
                ),
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

/// Adds tags to a record, keeping existing tags and skipping duplicates.
pub struct AddTagsTool {
    context: Arc<ToolContext>,
}

impl AddTagsTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for AddTagsTool {
    fn name(&self) -> &str {
        "add_tags"
    }

    fn description(&self) -> &str {
        "Add tags to a record by UUID. Existing tags are kept; duplicates are ignored."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "uuid": {
                    "type": "string",
                    "description": "UUID of the record"
                },
                "tags": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Tags to add"
                }
            },
            "required": ["uuid", "tags"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let uuid = require_str(&args, "uuid", self.name())?;
        let tags: Vec<&str> = args["tags"]
            .as_array()
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let provided = args["tags"].as_array().map_or(0, Vec::len);
        if tags.is_empty() || tags.len() != provided {
            return Err(ToolError::InvalidArguments {
                name: self.name().to_string(),
                reason: "'tags' must be a non-empty array of strings".to_string(),
            });
        }
        debug!(uuid = %uuid, count = tags.len(), "Adding tags");

        let merge_code = [
            "var merged = record.tags().slice();",
            "var added = 0;",
            "for (var i = 0; i < newTags.length; i++) {",
            "  if (merged.indexOf(newTags[i]) === -1) {",
            "    merged.push(newTags[i]);",
            "    added++;",
            "  }",
            "}",
            "record.tags = merged;",
        ]
        .join("\n");

        let mut builder = self.context.builder();
        builder
            .add_variable("uuid", uuid)
            .map_err(|e| invalid_input(self.name(), e))?
            .add_variable("newTags", json!(tags))
            .map_err(|e| invalid_input(self.name(), e))?
            .add_try_catch(
                &format!(
                    "{}\n{merge_code}\n{}",
                    lookup_record_code(),
                    ScriptBuilder::success_block(&[("added", "added"), ("tags", "merged")])
                ),
                None,
            )
            .map_err(|e| invalid_input(self.name(), e))?;
        Ok(self.context.run(self.name(), &builder).await)
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Write
    }

    fn timeout(&self) -> Duration {
        self.context.time_budget()
    }
}
