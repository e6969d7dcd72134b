//! # jxa-tools
//!
//! Tools that script the configured application through the jxa-core
//! pipeline: status check, record lookup, search, and tagging.

pub mod app;
pub mod records;
pub mod registry;

pub use app::ToolContext;
pub use registry::{Tool, ToolRegistry};

use std::sync::Arc;

/// Register all built-in tools against the given context.
pub fn register_builtin_tools(registry: &mut ToolRegistry, context: Arc<ToolContext>) {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(app::IsRunningTool::new(context.clone())),
        Arc::new(records::GetRecordTool::new(context.clone())),
        Arc::new(records::SearchRecordsTool::new(context.clone())),
        Arc::new(records::AddTagsTool::new(context)),
    ];

    for tool in tools {
        if let Err(e) = registry.register(tool) {
            tracing::warn!("Failed to register tool: {}", e);
        }
    }
}
